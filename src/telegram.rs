//! Outbound Telegram client and the webhook payload contract.
//!
//! The interactive conversation lives in the external chat layer; the core
//! only needs `sendMessage` for dispatch and the [`Update`] shape for the
//! webhook receiver.

use anyhow::Context as _;
use serde::Deserialize;

/// Telegram's per-message ceiling.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self::with_base(token, "https://api.telegram.org".to_string())
    }

    /// Used by tests to point the client at a local fixture server.
    pub fn with_base(token: String, api_base: String) -> Self {
        TelegramClient {
            client: reqwest::Client::new(),
            token,
            api_base,
        }
    }

    /// Sends `text`, split into line-aligned chunks under the size limit.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        for chunk in split_by_line(text, MAX_MESSAGE_CHARS) {
            self.send_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_chunk(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        #[derive(serde::Serialize)]
        struct SendMessage<'a> {
            chat_id: i64,
            text: &'a str,
            disable_web_page_preview: bool,
        }

        let resp = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_base, self.token))
            .json(&SendMessage {
                chat_id,
                text,
                disable_web_page_preview: true,
            })
            .send()
            .await
            .context("sending Telegram message")?;

        let status = resp.status();
        let body: ApiResponse = resp
            .json()
            .await
            .with_context(|| format!("decoding Telegram response (status {status})"))?;
        if !body.ok {
            anyhow::bail!(
                "Telegram rejected message: {}",
                body.description.unwrap_or_else(|| status.to_string())
            );
        }
        Ok(())
    }
}

/// Splits text into chunks of at most `max` characters, breaking on line
/// boundaries. A single line longer than `max` is hard-split.
pub fn split_by_line(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for line in text.split('\n') {
        let line_chars = line.chars().count();
        if line_chars > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            let mut piece = String::new();
            for (i, c) in line.chars().enumerate() {
                if i > 0 && i % max == 0 {
                    chunks.push(std::mem::take(&mut piece));
                }
                piece.push(c);
            }
            if !piece.is_empty() {
                chunks.push(piece);
            }
            continue;
        }
        let sep = usize::from(!current.is_empty());
        if current_chars + sep + line_chars > max {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(line);
        current_chars += line_chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// --- webhook payload contract (the shape Telegram POSTs to us) -------------

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_by_line("hello\nworld", 100), vec!["hello\nworld"]);
    }

    #[test]
    fn splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = split_by_line(text, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 9);
        }
    }

    #[test]
    fn hard_splits_overlong_lines() {
        let text = "x".repeat(25);
        let chunks = split_by_line(&text, 10);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "推".repeat(6);
        let chunks = split_by_line(&text, 3);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn update_payload_decodes() {
        let json = r#"{"update_id": 9, "message": {"message_id": 1, "chat": {"id": 42}, "text": "/bind abc"}}"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.update_id, 9);
        assert_eq!(update.message.unwrap().chat.id, 42);
    }
}
