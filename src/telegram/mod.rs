pub mod api;

use async_trait::async_trait;
use frankenstein::{ChatType, Document, Message, User};

pub use api::{TelegramApi, UpdateFetcher};
pub use frankenstein::{InlineKeyboardButton, InlineKeyboardMarkup};

pub fn user_id(user: &User) -> i64 {
    user.id as i64
}

pub fn message_id(message: &Message) -> i64 {
    i64::from(message.message_id)
}

pub fn is_private(message: &Message) -> bool {
    message.chat.type_field == ChatType::Private
}

pub fn is_pdf(document: &Document) -> bool {
    document.mime_type.as_deref() == Some("application/pdf")
        || document
            .file_name
            .as_deref()
            .map_or(false, |name| name.to_ascii_lowercase().ends_with(".pdf"))
}

/// The username when set, otherwise the full name.
pub fn handle(user: &User) -> String {
    match &user.username {
        Some(username) => username.clone(),
        None => match &user.last_name {
            Some(last) => format!("{} {}", user.first_name, last),
            None => user.first_name.clone(),
        },
    }
}

/// Outbound chat operations the workflow needs. Every call returns the
/// platform message id where one is created.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> anyhow::Result<i64>;

    async fn send_document(
        &self,
        chat_id: i64,
        file_id: &str,
        caption: &str,
        reply_to: Option<i64>,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<i64>;

    /// Replaces the inline keyboard of a message; `None` removes it.
    async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> anyhow::Result<()>;

    async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> anyhow::Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> anyhow::Result<()>;

    async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>>;
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{ChatTransport, InlineKeyboardMarkup};

    #[derive(Clone, Debug, PartialEq)]
    pub enum Sent {
        Text {
            chat_id: i64,
            text: String,
            reply_to: Option<i64>,
            message_id: i64,
        },
        Document {
            chat_id: i64,
            file_id: String,
            caption: String,
            reply_to: Option<i64>,
            keyboard: Option<InlineKeyboardMarkup>,
            message_id: i64,
        },
        Markup {
            chat_id: i64,
            message_id: i64,
            keyboard: Option<InlineKeyboardMarkup>,
        },
        Answer {
            callback_id: String,
            text: String,
            show_alert: bool,
        },
        Delete {
            chat_id: i64,
            message_id: i64,
        },
    }

    /// Keeps everything the bot sends. Message ids count up from 1000.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        files: Mutex<HashMap<String, Vec<u8>>>,
        next_id: AtomicI64,
        pub fail_sends: AtomicBool,
        pub fail_deletes: AtomicBool,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            RecordingTransport {
                next_id: AtomicI64::new(1000),
                ..Default::default()
            }
        }

        pub fn with_file(self, file_id: &str, bytes: &[u8]) -> Self {
            self.files
                .lock()
                .unwrap()
                .insert(file_id.to_string(), bytes.to_vec());
            self
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn texts(&self) -> Vec<(i64, String)> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Text { chat_id, text, .. } => Some((chat_id, text)),
                    _ => None,
                })
                .collect()
        }

        pub fn answers(&self) -> Vec<(String, bool)> {
            self.sent()
                .into_iter()
                .filter_map(|sent| match sent {
                    Sent::Answer { text, show_alert, .. } => Some((text, show_alert)),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, sent: Sent) {
            self.sent.lock().unwrap().push(sent);
        }

        fn next_message_id(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        }

        fn check_sends(&self) -> anyhow::Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                anyhow::bail!("chat unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> anyhow::Result<i64> {
            self.check_sends()?;
            let message_id = self.next_message_id();
            self.record(Sent::Text {
                chat_id,
                text: text.to_string(),
                reply_to,
                message_id,
            });
            Ok(message_id)
        }

        async fn send_document(
            &self,
            chat_id: i64,
            file_id: &str,
            caption: &str,
            reply_to: Option<i64>,
            keyboard: Option<InlineKeyboardMarkup>,
        ) -> anyhow::Result<i64> {
            self.check_sends()?;
            let message_id = self.next_message_id();
            self.record(Sent::Document {
                chat_id,
                file_id: file_id.to_string(),
                caption: caption.to_string(),
                reply_to,
                keyboard,
                message_id,
            });
            Ok(message_id)
        }

        async fn edit_reply_markup(
            &self,
            chat_id: i64,
            message_id: i64,
            keyboard: Option<InlineKeyboardMarkup>,
        ) -> anyhow::Result<()> {
            self.check_sends()?;
            self.record(Sent::Markup {
                chat_id,
                message_id,
                keyboard,
            });
            Ok(())
        }

        async fn answer_callback(&self, callback_id: &str, text: &str, show_alert: bool) -> anyhow::Result<()> {
            self.check_sends()?;
            self.record(Sent::Answer {
                callback_id: callback_id.to_string(),
                text: text.to_string(),
                show_alert,
            });
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> anyhow::Result<()> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                anyhow::bail!("message can't be deleted");
            }
            self.record(Sent::Delete { chat_id, message_id });
            Ok(())
        }

        async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(file_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("file {} not found", file_id))
        }
    }
}
