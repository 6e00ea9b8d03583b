use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use frankenstein::{
    AllowedUpdate, AnswerCallbackQueryParams, AsyncApi, AsyncTelegramApi, DeleteMessageParams,
    EditMessageReplyMarkupParams, FileUpload, GetFileParams, GetUpdatesParams, InlineKeyboardMarkup,
    ReplyMarkup, ReplyParameters, SendDocumentParams, SendMessageParams, Update, User,
};

use super::ChatTransport;

/// Seconds `getUpdates` may hold the connection open.
const LONG_POLL_SECS: u32 = 25;

fn failed(method: &str, err: frankenstein::Error) -> anyhow::Error {
    anyhow!("Telegram {} failed: {:?}", method, err)
}

fn to_message_id(message_id: i64) -> anyhow::Result<i32> {
    i32::try_from(message_id).with_context(|| format!("{} is not a Telegram message id", message_id))
}

fn reply_parameters(reply_to: Option<i64>) -> anyhow::Result<Option<ReplyParameters>> {
    match reply_to {
        Some(message_id) => {
            let mut reply = ReplyParameters::builder()
                .message_id(to_message_id(message_id)?)
                .build();
            reply.allow_sending_without_reply = Some(true);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

#[derive(Clone)]
pub struct TelegramApi {
    api: AsyncApi,
    http: reqwest::Client,
    file_url: String,
}

impl TelegramApi {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> anyhow::Result<TelegramApi> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build the Telegram download client")?;
        let base_url = base_url.trim_end_matches('/');
        Ok(TelegramApi {
            api: AsyncApi::new_url(format!("{}/bot{}", base_url, token)),
            http,
            file_url: format!("{}/file/bot{}", base_url, token),
        })
    }

    pub async fn get_me(&self) -> anyhow::Result<User> {
        let response = self.api.get_me().await.map_err(|err| failed("getMe", err))?;
        Ok(response.result)
    }
}

#[async_trait]
impl ChatTransport for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> anyhow::Result<i64> {
        let mut params = SendMessageParams::builder()
            .chat_id(chat_id)
            .text(text.to_string())
            .build();
        params.reply_parameters = reply_parameters(reply_to)?;

        let response = self
            .api
            .send_message(&params)
            .await
            .map_err(|err| failed("sendMessage", err))?;
        Ok(i64::from(response.result.message_id))
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: &str,
        reply_to: Option<i64>,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<i64> {
        let mut params = SendDocumentParams::builder()
            .chat_id(chat_id)
            .document(FileUpload::String(file_id.to_string()))
            .caption(caption.to_string())
            .build();
        params.reply_parameters = reply_parameters(reply_to)?;
        params.reply_markup = keyboard.map(ReplyMarkup::InlineKeyboardMarkup);

        let response = self
            .api
            .send_document(&params)
            .await
            .map_err(|err| failed("sendDocument", err))?;
        Ok(i64::from(response.result.message_id))
    }

    async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<()> {
        // Leaving `reply_markup` out removes the keyboard.
        let mut params = EditMessageReplyMarkupParams::builder()
            .chat_id(chat_id)
            .message_id(to_message_id(message_id)?)
            .build();
        params.reply_markup = keyboard;

        self.api
            .edit_message_reply_markup(&params)
            .await
            .map_err(|err| failed("editMessageReplyMarkup", err))?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> anyhow::Result<()> {
        let mut params = AnswerCallbackQueryParams::builder()
            .callback_query_id(callback_id.to_string())
            .build();
        if !text.is_empty() {
            params.text = Some(text.to_string());
        }
        params.show_alert = Some(show_alert);

        self.api
            .answer_callback_query(&params)
            .await
            .map_err(|err| failed("answerCallbackQuery", err))?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> anyhow::Result<()> {
        let params = DeleteMessageParams::builder()
            .chat_id(chat_id)
            .message_id(to_message_id(message_id)?)
            .build();

        self.api
            .delete_message(&params)
            .await
            .map_err(|err| failed("deleteMessage", err))?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let params = GetFileParams::builder().file_id(file_id.to_string()).build();
        let file = self
            .api
            .get_file(&params)
            .await
            .map_err(|err| failed("getFile", err))?
            .result;
        let path = file
            .file_path
            .ok_or_else(|| anyhow!("Telegram returned no path for file {}", file.file_id))?;

        let response = self
            .http
            .get(format!("{}/{}", self.file_url, path))
            .send()
            .await
            .context("File download failed")?
            .error_for_status()
            .context("File download was refused")?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Long-polls `getUpdates` and hands out updates one at a time, advancing the
/// offset past everything it has buffered.
pub struct UpdateFetcher {
    api: TelegramApi,
    update_params: GetUpdatesParams,
    buffer: VecDeque<Update>,
}

impl UpdateFetcher {
    pub fn new(api: TelegramApi) -> Self {
        let update_params = GetUpdatesParams::builder()
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .timeout(LONG_POLL_SECS)
            .build();

        UpdateFetcher {
            api,
            update_params,
            buffer: VecDeque::new(),
        }
    }

    pub async fn next_update(&mut self) -> Option<Update> {
        if let Some(update) = self.buffer.pop_front() {
            return Some(update);
        }

        match self.api.api.get_updates(&self.update_params).await {
            Ok(updates) => {
                self.buffer.extend(updates.result);
                if let Some(last_update) = self.buffer.back() {
                    self.update_params.offset = Some((last_update.update_id + 1).into());
                }
                self.buffer.pop_front()
            }
            Err(err) => {
                error!("Failed to fetch updates: {:?}", err);
                tokio::time::sleep(Duration::from_secs(1)).await;
                None
            }
        }
    }
}
