use std::sync::Arc;
use std::time::Duration;

use frankenstein::{Message, Update, UpdateContent};
use tokio::sync::watch;
use tracing_futures::Instrument;

use crate::commands::{self, Command};
use crate::config::Thresholds;
use crate::database::Database;
use crate::error::WorkflowError;
use crate::models::Subscription;
use crate::notify::Notifier;
use crate::resolver::DoiResolver;
use crate::storage::FileStore;
use crate::telegram::{self, ChatTransport};

const TRANSIENT_ATTEMPTS: u32 = 3;
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Runs a database step again while it fails for reasons unrelated to the event.
pub async fn retry_transient<T, F>(what: &str, mut step: F) -> Result<T, WorkflowError>
where
    F: FnMut() -> Result<T, WorkflowError>,
{
    let mut attempt = 1;
    loop {
        match step() {
            Err(err) if err.is_transient() && attempt < TRANSIENT_ATTEMPTS => {
                warn!("{} failed on attempt {}: {}", what, attempt, err);
                attempt += 1;
                tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

/// Everything an update handler needs. Cheap to clone.
#[derive(Clone)]
pub struct Bot {
    pub db: Database,
    pub transport: Arc<dyn ChatTransport>,
    pub store: Arc<dyn FileStore>,
    pub resolver: Arc<dyn DoiResolver>,
    pub notifier: Notifier,
    pub username: Option<String>,
    thresholds: watch::Receiver<Thresholds>,
}

impl Bot {
    pub fn new(
        db: Database,
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn FileStore>,
        resolver: Arc<dyn DoiResolver>,
        thresholds: watch::Receiver<Thresholds>,
    ) -> Self {
        Bot {
            notifier: Notifier::new(transport.clone(), db.clone()),
            db,
            transport,
            store,
            resolver,
            username: None,
            thresholds,
        }
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    #[cfg(test)]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.borrow()
    }

    /// Tells a freshly rewarded user about it, if they can receive private messages.
    pub async fn announce_reward(&self, subscription: &Subscription) {
        let user = match self.db.get_user(subscription.user_id) {
            Ok(user) => user,
            Err(err) => {
                warn!("Could not load rewarded user {}: {}", subscription.user_id, err);
                return;
            }
        };
        if !user.is_in_bot {
            return;
        }
        let text = format!(
            "🎉 Congratulations! You've earned a subscription until {} for your {}.",
            subscription.end_date.date(),
            subscription.reason
        );
        self.notifier.send(user.telegram_id, &text, None).await;
    }

    pub async fn handle_update(self, update: Update) {
        let span = info_span!("update", id = update.update_id);
        async move {
            match update.content {
                UpdateContent::Message(message) => self.handle_message(message).await,
                UpdateContent::CallbackQuery(query) => commands::vote::handle_vote(&self, query).await,
                _ => {}
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_message(&self, message: Message) {
        let from = match message.from.as_ref() {
            Some(from) if !from.is_bot => from,
            _ => return,
        };

        if telegram::is_private(&message) {
            let telegram_id = telegram::user_id(from);
            if let Err(err) = self.db.get_or_create_user(telegram_id, from.username.as_deref(), true) {
                warn!("Failed to register {}: {}", telegram_id, err);
            }
        }

        if let Some(text) = message.text.as_deref() {
            match commands::parse_command(text, self.username.as_deref()) {
                Some(Command::Start) => commands::start::start(self, &message, from).await,
                Some(Command::Help) => commands::help::help(self, &message).await,
                Some(Command::Stats) => commands::stats::stats(self, &message, from).await,
                Some(Command::Request(argument)) => {
                    commands::request::request(self, &message, from, &argument).await
                }
                None => {}
            }
            return;
        }

        if message.document.is_some() && message.reply_to_message.is_some() {
            commands::upload::handle_upload(self, &message, from).await;
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use frankenstein::{Message, Update};
    use tempfile::TempDir;
    use tokio::sync::watch;

    use super::Bot;
    use crate::config::Thresholds;
    use crate::database::test_support::test_database;
    use crate::notify::Notifier;
    use crate::resolver::NoLookup;
    use crate::storage::testing::MemoryStore;
    use crate::telegram::testing::RecordingTransport;

    pub const GROUP: i64 = -100;

    pub struct Harness {
        pub _dir: TempDir,
        pub bot: Bot,
        pub transport: Arc<RecordingTransport>,
        pub store: Arc<MemoryStore>,
        pub thresholds: watch::Sender<Thresholds>,
    }

    pub fn harness() -> Harness {
        harness_with(RecordingTransport::new())
    }

    pub fn harness_with(transport: RecordingTransport) -> Harness {
        let (dir, db) = test_database();
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryStore::default());
        let (sender, receiver) = watch::channel(Thresholds::default());
        let bot = Bot::new(db.clone(), transport.clone(), store.clone(), Arc::new(NoLookup), receiver)
            .with_username(Some("SciArticleBot".to_string()));
        let notifier = Notifier::new(transport.clone(), db).with_retry_delay(Duration::ZERO);
        Harness {
            _dir: dir,
            bot: bot.with_notifier(notifier),
            transport,
            store,
            thresholds: sender,
        }
    }

    fn person(id: i64) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "is_bot": false,
            "first_name": format!("User {}", id),
            "username": format!("user{}", id),
        })
    }

    fn message_json(chat_id: i64, message_id: i64, from: i64) -> serde_json::Value {
        serde_json::json!({
            "message_id": message_id,
            "date": 0,
            "from": person(from),
            "chat": {"id": chat_id, "type": if chat_id < 0 { "supergroup" } else { "private" }},
        })
    }

    pub fn text_message(chat_id: i64, message_id: i64, from: i64, text: &str) -> Message {
        let mut message = message_json(chat_id, message_id, from);
        message["text"] = text.into();
        serde_json::from_value(message).unwrap()
    }

    pub fn file_reply(chat_id: i64, message_id: i64, from: i64, anchor: i64, file_id: &str) -> Message {
        let mut message = message_json(chat_id, message_id, from);
        message["document"] = serde_json::json!({
            "file_id": file_id,
            "file_unique_id": format!("unique-{}", file_id),
            "file_name": "paper.pdf",
            "mime_type": "application/pdf",
            "file_size": 8,
        });
        let mut reply_to = message_json(chat_id, anchor, 1);
        reply_to["text"] = "/request".into();
        message["reply_to_message"] = reply_to;
        serde_json::from_value(message).unwrap()
    }

    pub fn message_update(message: Message) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": message.message_id,
            "message": message,
        }))
        .unwrap()
    }

    pub fn vote_update(callback_id: &str, from: i64, data: &str) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 0,
            "callback_query": {
                "id": callback_id,
                "from": person(from),
                "chat_instance": "ballots",
                "data": data,
            }
        }))
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::retry_transient;
    use super::testing::*;
    use crate::error::WorkflowError;

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let mut calls = 0;

        let result = retry_transient("step", || {
            calls += 1;
            if calls < 3 {
                Err(WorkflowError::Database(diesel::result::Error::NotFound))
            } else {
                Ok(calls)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded_and_skip_event_errors() {
        let mut calls = 0;
        let result: Result<(), _> = retry_transient("step", || {
            calls += 1;
            Err(WorkflowError::Database(diesel::result::Error::NotFound))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);

        let mut calls = 0;
        let result: Result<(), _> = retry_transient("step", || {
            calls += 1;
            Err(WorkflowError::DuplicateVote)
        })
        .await;
        assert!(matches!(result, Err(WorkflowError::DuplicateVote)));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn private_messages_mark_the_user_as_reachable() {
        let h = harness();

        h.bot
            .clone()
            .handle_update(message_update(text_message(42, 1, 42, "hello")))
            .await;

        let user = h.bot.db.find_user_by_telegram_id(42).unwrap().unwrap();
        assert!(user.is_in_bot);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn group_chatter_is_ignored() {
        let h = harness();

        h.bot
            .clone()
            .handle_update(message_update(text_message(GROUP, 1, 42, "hello")))
            .await;

        assert!(h.bot.db.find_user_by_telegram_id(42).unwrap().is_none());
        assert!(h.transport.sent().is_empty());
    }
}
