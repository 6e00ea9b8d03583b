use std::sync::Arc;
use std::time::Duration;

use crate::database::{current_time, Database};
use crate::telegram::ChatTransport;

pub const SEND_ATTEMPTS: u32 = 3;

/// How long acknowledgements and notices stay in group chats.
pub fn notice_lifetime() -> chrono::Duration {
    chrono::Duration::hours(1)
}

/// Sends workflow messages with a bounded number of retries. Failures are
/// logged and swallowed; nothing upstream depends on a message arriving.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn ChatTransport>,
    db: Database,
    retry_delay: Duration,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChatTransport>, db: Database) -> Self {
        Notifier {
            transport,
            db,
            retry_delay: Duration::from_secs(5),
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Option<i64> {
        for attempt in 1..=SEND_ATTEMPTS {
            match self.transport.send_text(chat_id, text, reply_to).await {
                Ok(message_id) => return Some(message_id),
                Err(err) if attempt < SEND_ATTEMPTS => {
                    debug!("Send to {} failed (attempt {}): {:#}", chat_id, attempt, err);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    warn!("Giving up on message to {}: {:#}", chat_id, err);
                }
            }
        }
        None
    }

    /// Like `send`, but messages posted into group chats are queued for
    /// deletion after `notice_lifetime`.
    pub async fn notice(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Option<i64> {
        let message_id = self.send(chat_id, text, reply_to).await?;
        if is_group_chat(chat_id) {
            self.schedule_delete(chat_id, message_id, current_time() + notice_lifetime());
        }
        Some(message_id)
    }

    pub fn schedule_delete(&self, chat_id: i64, message_id: i64, run_at: chrono::NaiveDateTime) {
        if let Err(err) = self.db.schedule_delete(chat_id, message_id, run_at) {
            error!("Failed to schedule deletion of {}/{}: {}", chat_id, message_id, err);
        }
    }
}

/// Group and channel ids are negative, private chats use the user id.
pub fn is_group_chat(chat_id: i64) -> bool {
    chat_id < 0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::Notifier;
    use crate::database::test_support::test_database;
    use crate::telegram::testing::RecordingTransport;

    #[tokio::test]
    async fn group_notices_are_queued_for_deletion() {
        let (_dir, db) = test_database();
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Notifier::new(transport.clone(), db.clone());

        let group = notifier.notice(-100, "hello group", None).await.unwrap();
        notifier.notice(42, "hello you", None).await.unwrap();

        let queued = db
            .due_deletions(crate::database::current_time() + chrono::Duration::hours(2), 10)
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!((queued[0].chat_id, queued[0].message_id), (-100, group));
        assert_eq!(transport.texts().len(), 2);
    }

    #[tokio::test]
    async fn failed_sends_give_up_after_three_attempts() {
        let (_dir, db) = test_database();
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_sends.store(true, Ordering::SeqCst);
        let notifier = Notifier::new(transport.clone(), db.clone()).with_retry_delay(Duration::ZERO);

        assert!(notifier.notice(-100, "lost", None).await.is_none());
        assert!(transport.sent().is_empty());
        assert!(db
            .due_deletions(crate::database::current_time() + chrono::Duration::hours(2), 10)
            .unwrap()
            .is_empty());
    }
}
