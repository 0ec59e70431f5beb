//! Thin Telegram Bot API client. Only the handful of methods the desk
//! needs; every call returns a `NotifyError` the caller is expected to
//! log and drop.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("telegram transport error: {0}")]
    Transport(String),

    #[error("telegram API error: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// One row of inline buttons: (label, callback_data)
pub type ButtonRow = Vec<(String, String)>;

#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(bot_token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(45))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: format!("https://api.telegram.org/bot{bot_token}"),
        }
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value, NotifyError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(NotifyError::Api(
                body.get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            ));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        buttons: Option<Vec<ButtonRow>>,
    ) -> Result<(), NotifyError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(rows) = buttons {
            let keyboard: Vec<Vec<Value>> = rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(label, data)| json!({ "text": label, "callback_data": data }))
                        .collect()
                })
                .collect();
            payload["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }
        self.call("sendMessage", payload).await.map(|_| ())
    }

    pub async fn send_document(
        &self,
        chat_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> Result<(), NotifyError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let response = self
            .client
            .post(format!("{}/sendDocument", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Api(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), NotifyError> {
        self.call("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
            .await
            .map(|_| ())
    }

    /// Remove the inline keyboard from a message after a button is used.
    pub async fn clear_buttons(&self, chat_id: i64, message_id: i64) -> Result<(), NotifyError> {
        self.call(
            "editMessageReplyMarkup",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
        .map(|_| ())
    }

    /// Long-poll for updates. `timeout_secs` rides on the server side;
    /// the HTTP client timeout is set above it.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, NotifyError> {
        let result = self
            .call(
                "getUpdates",
                json!({ "offset": offset, "timeout": timeout_secs }),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| NotifyError::Transport(e.to_string()))
    }
}
