//! The published HTTP surface: board reads, the stats Top-N, and the chat
//! webhook receiver. The external user/session façade mounts alongside these
//! routes and reuses [`Envelope`] and the error mapping.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::bindings::{self, ChatEnrollment, EnrollmentOutcome};
use crate::db::articles;
use crate::db::subscriptions::SubKind;
use crate::errors::{AppError, Error};
use crate::telegram::Update;
use crate::{stats, Context};

/// The `{success, message}` shape every non-GET response uses.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
}

impl Envelope {
    pub fn success(message: impl Into<String>) -> Envelope {
        Envelope {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Envelope {
        Envelope {
            success: false,
            message: message.into(),
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

pub fn router(ctx: Arc<Context>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/boards", get(list_boards))
        .route("/boards/:name/articles", get(board_articles))
        .route("/boards/:name/articles/:code", get(board_article))
        .route("/api/stats/subscriptions", get(subscription_stats))
        .route("/telegram/:token", post(telegram_webhook))
        .layer(middleware::from_fn_with_state(ctx.clone(), cors))
        .with_state(ctx)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_boards(State(ctx): State<Arc<Context>>) -> Result<Response, AppError> {
    let db = ctx.db.get().await?;
    let boards = articles::list_boards(&db).await?;
    Ok(Json(boards).into_response())
}

async fn board_articles(
    State(ctx): State<Arc<Context>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let db = ctx.db.get().await?;
    let articles = articles::board_articles(&db, &name).await?;
    Ok(Json(articles).into_response())
}

async fn board_article(
    State(ctx): State<Arc<Context>>,
    Path((name, code)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let db = ctx.db.get().await?;
    let article = articles::find_article(&db, &code)
        .await?
        .filter(|a| a.board.eq_ignore_ascii_case(&name))
        .ok_or_else(|| Error::NotFound("article not found".into()))?;
    Ok(Json(article).into_response())
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    board: Option<String>,
    limit: Option<i64>,
}

async fn subscription_stats(
    State(ctx): State<Arc<Context>>,
    Query(params): Query<StatsParams>,
) -> Result<Response, AppError> {
    let kind = SubKind::parse(params.kind.as_deref().unwrap_or("keyword"))?;
    let rows = stats::top(
        &ctx,
        kind,
        params.board.as_deref(),
        params.limit.unwrap_or(stats::DEFAULT_TOP_LIMIT),
    )
    .await?;
    Ok(Json(rows).into_response())
}

/// Webhook receiver. The platform may redeliver updates, so processing is
/// keyed on the update id; anything that is not a bind-flow interaction is
/// acknowledged and left for the chat layer.
async fn telegram_webhook(
    State(ctx): State<Arc<Context>>,
    Path(token): Path<String>,
    body: String,
) -> Result<Response, AppError> {
    if token != ctx.config.telegram_token {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let mut deserializer = serde_json::Deserializer::from_str(&body);
    let update: Update = match serde_path_to_error::deserialize(&mut deserializer) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!("undecodable webhook payload: {e}");
            return Ok((StatusCode::BAD_REQUEST, Envelope::failure("bad payload")).into_response());
        }
    };

    if !ctx.cache.mark_update_handled(update.update_id).await? {
        return Ok(Envelope::success("duplicate update ignored").into_response());
    }

    let Some(message) = update.message else {
        return Ok(Envelope::success("ignored").into_response());
    };
    let chat_id = message.chat.id;
    let Some(text) = message.text else {
        return Ok(Envelope::success("ignored").into_response());
    };

    match bind_reply(&ctx, chat_id, text.trim()).await {
        Ok(Some(reply)) => {
            if let Err(e) = ctx.telegram.send_text(chat_id, &reply).await {
                tracing::warn!(chat_id, "webhook reply failed: {e:?}");
            }
            Ok(Envelope::success("processed").into_response())
        }
        Ok(None) => Ok(Envelope::success("ignored").into_response()),
        Err(e) => {
            // user-visible kinds become chat replies, not HTTP errors
            if let Some(domain) = e.downcast_ref::<Error>() {
                let reply = domain.to_string();
                if let Err(e) = ctx.telegram.send_text(chat_id, &reply).await {
                    tracing::warn!(chat_id, "webhook reply failed: {e:?}");
                }
                return Ok(Envelope::success("processed").into_response());
            }
            // transient failure: forget the update id so the 500 below makes
            // the platform redeliver something we will actually re-process
            if let Err(clear_err) = ctx.cache.clear_update_mark(update.update_id).await {
                tracing::warn!(
                    update_id = update.update_id,
                    "failed to clear update mark: {clear_err:?}"
                );
            }
            Err(e.into())
        }
    }
}

/// Resolves the binding-flow interactions the core owns. Returns the chat
/// reply, or `None` when the message belongs to the external chat layer.
async fn bind_reply(ctx: &Context, chat_id: i64, text: &str) -> anyhow::Result<Option<String>> {
    let chat = chat_id.to_string();

    let code = if let Some(args) = text.strip_prefix("/start BIND_") {
        Some(args.trim())
    } else {
        text.strip_prefix("/bind ").map(str::trim)
    };
    if let Some(code) = code.filter(|c| !c.is_empty()) {
        bindings::confirm_bind_code(ctx, crate::db::bindings::SERVICE_TELEGRAM, code, &chat)
            .await?;
        return Ok(Some(
            "綁定成功！通知將發送到此 Telegram。".to_string(),
        ));
    }

    if text == "/bind" {
        return Ok(Some(match bindings::begin_chat_enrollment(ctx, chat_id).await? {
            ChatEnrollment::AlreadyBound { email } => format!("已綁定帳號：{email}"),
            ChatEnrollment::AwaitingEmail => "請輸入您的 Email：".to_string(),
        }));
    }

    if ctx.cache.take_waiting_email(chat_id).await? {
        return Ok(Some(
            match bindings::complete_chat_enrollment(ctx, text, chat_id).await? {
                EnrollmentOutcome::Linked { email } => {
                    format!("綁定成功！帳號：{email}")
                }
                EnrollmentOutcome::Created { email, password } => format!(
                    "帳號建立成功！\nEmail: {email}\n臨時密碼: {password}\n請記得至網頁修改密碼"
                ),
            },
        ));
    }

    Ok(None)
}

/// Hand-rolled CORS against the configured allow-list; the external façade
/// shares the same layer.
async fn cors(
    State(ctx): State<Arc<Context>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|o| o.to_str().ok())
        .map(str::to_string);
    let allowed = origin
        .as_deref()
        .map(|o| ctx.config.cors_allow_origins.iter().any(|a| a == o))
        .unwrap_or(false);

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        if allowed {
            apply_cors_headers(&mut resp, origin.as_deref().unwrap());
        }
        return resp;
    }

    let mut resp = next.run(req).await;
    if allowed {
        apply_cors_headers(&mut resp, origin.as_deref().unwrap());
    }
    resp
}

fn apply_cors_headers(resp: &mut Response, origin: &str) {
    let headers = resp.headers_mut();
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
}
