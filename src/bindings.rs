//! Binding enrollment and identity resolution.
//!
//! Two flows map a chat identity onto an account: the web side issues a
//! short-lived bind code the user hands to the bot, or the bot collects an
//! email and links (or creates) the account directly. Either way the
//! `(user, service)` and `(service, service_id)` uniqueness rules hold and a
//! successful bind triggers a one-time projection sync.

use anyhow::Context as _;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::db::accounts;
use crate::db::bindings as repo;
use crate::db::bindings::{Binding, SERVICE_TELEGRAM};
use crate::errors::Error;
use crate::sync;
use crate::Context;

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

pub fn valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn known_service(service: &str) -> anyhow::Result<()> {
    if !repo::KNOWN_SERVICES.contains(&service) {
        anyhow::bail!(Error::Validation(format!("unknown service: {service}")));
    }
    Ok(())
}

/// Issues a fresh bind code for (user, service), replacing any pending one.
pub async fn issue_bind_code(
    ctx: &Context,
    user_id: i32,
    service: &str,
) -> anyhow::Result<String> {
    known_service(service)?;
    let db = ctx.db.get().await?;
    if accounts::find_account(&db, user_id).await?.is_none() {
        anyhow::bail!(Error::NotFound("account not found".into()));
    }
    if let Some(existing) = repo::find_by_user_and_service(&db, user_id, service).await? {
        if existing.is_confirmed() {
            anyhow::bail!(Error::Conflict(format!("{service} is already bound")));
        }
    }
    let code = Uuid::new_v4().simple().to_string();
    let expires_at = Utc::now() + chrono::Duration::minutes(repo::BIND_CODE_TTL_MINUTES);
    repo::set_bind_code(&db, user_id, service, &code, expires_at).await?;
    Ok(code)
}

/// Redeems a bind code presented by the chat side, attaching the chat
/// identity. Returns the owning user id.
pub async fn confirm_bind_code(
    ctx: &Context,
    service: &str,
    code: &str,
    service_id: &str,
) -> anyhow::Result<i32> {
    known_service(service)?;
    let code = code.trim();
    let db = ctx.db.get().await?;

    let binding = repo::find_by_bind_code(&db, service, code)
        .await?
        .ok_or_else(|| Error::NotFound("bind code expired or invalid".into()))?;
    if !binding.code_is_valid(code, Utc::now()) {
        anyhow::bail!(Error::NotFound("bind code expired or invalid".into()));
    }
    if binding.is_confirmed() {
        anyhow::bail!(Error::Conflict("this account is already bound".into()));
    }
    if let Some(taken) = repo::find_by_service_id(&db, service, service_id).await? {
        if taken.user_id != binding.user_id {
            anyhow::bail!(Error::Conflict(
                "this chat identity is bound to another account".into()
            ));
        }
    }
    repo::confirm(&db, binding.user_id, service, service_id).await?;
    drop(db);

    sync::sync_user(ctx, binding.user_id)
        .await
        .context("post-bind projection sync")?;
    Ok(binding.user_id)
}

/// What the chat side should do after a bare `/bind`.
#[derive(Debug, PartialEq)]
pub enum ChatEnrollment {
    AlreadyBound { email: String },
    AwaitingEmail,
}

/// Starts the chat-initiated flow: if the chat is already bound, say so;
/// otherwise arm the waiting-email flag.
pub async fn begin_chat_enrollment(ctx: &Context, chat_id: i64) -> anyhow::Result<ChatEnrollment> {
    let db = ctx.db.get().await?;
    if let Some(binding) =
        repo::find_by_service_id(&db, SERVICE_TELEGRAM, &chat_id.to_string()).await?
    {
        if let Some(account) = accounts::find_account(&db, binding.user_id).await? {
            return Ok(ChatEnrollment::AlreadyBound {
                email: account.email,
            });
        }
    }
    drop(db);
    ctx.cache.set_waiting_email(chat_id).await?;
    Ok(ChatEnrollment::AwaitingEmail)
}

#[derive(Debug)]
pub enum EnrollmentOutcome {
    /// Linked an existing account.
    Linked { email: String },
    /// Created a fresh account; the cleartext password is returned exactly
    /// once so the bot can hand it to the user.
    Created { email: String, password: String },
}

/// Finishes the chat-initiated flow with the email the user typed.
pub async fn complete_chat_enrollment(
    ctx: &Context,
    email: &str,
    chat_id: i64,
) -> anyhow::Result<EnrollmentOutcome> {
    let email = email.trim();
    if !valid_email(email) {
        anyhow::bail!(Error::Validation("invalid email address".into()));
    }
    let chat = chat_id.to_string();
    let db = ctx.db.get().await?;

    if repo::find_by_service_id(&db, SERVICE_TELEGRAM, &chat)
        .await?
        .is_some()
    {
        anyhow::bail!(Error::Conflict("this chat is already bound".into()));
    }

    if let Some(account) = accounts::find_account_by_email(&db, email).await? {
        let existing = repo::find_by_user_and_service(&db, account.id, SERVICE_TELEGRAM).await?;
        match existing {
            Some(b) if b.is_confirmed() => {
                anyhow::bail!(Error::Conflict(
                    "this account is already bound to another chat".into()
                ));
            }
            Some(_) => repo::confirm(&db, account.id, SERVICE_TELEGRAM, &chat).await?,
            None => {
                repo::create(&db, account.id, SERVICE_TELEGRAM, &chat).await?;
            }
        }
        drop(db);
        sync::sync_user(ctx, account.id)
            .await
            .context("post-bind projection sync")?;
        return Ok(EnrollmentOutcome::Linked {
            email: account.email,
        });
    }

    let password = generate_password();
    let hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST).context("hashing password")?;
    let account = accounts::create_account(&db, email, &hash, "user").await?;
    repo::create(&db, account.id, SERVICE_TELEGRAM, &chat).await?;
    tracing::info!(user_id = account.id, "account created via chat enrollment");
    Ok(EnrollmentOutcome::Created {
        email: account.email,
        password,
    })
}

/// Throwaway credential for chat-created accounts; users are told to change
/// it on the web side.
fn generate_password() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub async fn list(ctx: &Context, user_id: i32) -> anyhow::Result<Vec<Binding>> {
    let db = ctx.db.get().await?;
    repo::list_by_user(&db, user_id).await
}

pub async fn set_enabled(
    ctx: &Context,
    user_id: i32,
    service: &str,
    enabled: bool,
) -> anyhow::Result<()> {
    known_service(service)?;
    {
        let db = ctx.db.get().await?;
        repo::set_enabled(&db, user_id, service, enabled).await?;
    }
    sync::rewrite_profile(ctx, user_id).await?;
    Ok(())
}

pub async fn unbind(ctx: &Context, user_id: i32, service: &str) -> anyhow::Result<()> {
    known_service(service)?;
    {
        let db = ctx.db.get().await?;
        repo::delete(&db, user_id, service).await?;
    }
    sync::rewrite_profile(ctx, user_id).await?;
    Ok(())
}
