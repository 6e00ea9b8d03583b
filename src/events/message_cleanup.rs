use futures::stream::{self, StreamExt};

use crate::bot::Bot;
use crate::database::current_time;
use crate::models::ScheduledDeletion;

const BATCH_SIZE: i64 = 50;

pub fn retry_backoff() -> chrono::Duration {
    chrono::Duration::seconds(60)
}

/// Errors after which retrying cannot help: the message is already gone.
fn is_gone(err: &anyhow::Error) -> bool {
    let text = err.to_string();
    text.contains("message to delete not found") || text.contains("message can't be deleted")
}

async fn run_deletion(bot: &Bot, deletion: ScheduledDeletion) {
    match bot
        .transport
        .delete_message(deletion.chat_id, deletion.message_id)
        .await
    {
        Ok(()) => {
            if let Err(err) = bot.db.complete_deletion(deletion.id) {
                error!("Failed to clear deletion {}: {}", deletion.id, err);
            }
        }
        Err(err) if is_gone(&err) => {
            debug!(
                "Message {}/{} is already gone: {:#}",
                deletion.chat_id, deletion.message_id, err
            );
            if let Err(err) = bot.db.complete_deletion(deletion.id) {
                error!("Failed to clear deletion {}: {}", deletion.id, err);
            }
        }
        Err(err) => {
            let retry_at = current_time() + retry_backoff();
            match bot.db.fail_deletion(deletion.id, &format!("{:#}", err), retry_at) {
                Ok(true) => debug!("Will retry deleting {}/{}", deletion.chat_id, deletion.message_id),
                Ok(false) => warn!(
                    "Gave up deleting {}/{}: {:#}",
                    deletion.chat_id, deletion.message_id, err
                ),
                Err(db_err) => error!("Failed to record deletion failure {}: {}", deletion.id, db_err),
            }
        }
    }
}

/// Deletes every queued message whose time has come.
pub async fn delete_due_messages(bot: &Bot) {
    let due = match bot.db.due_deletions(current_time(), BATCH_SIZE) {
        Ok(due) => due,
        Err(err) => {
            error!("Failed to load scheduled deletions: {}", err);
            return;
        }
    };
    if due.is_empty() {
        return;
    }

    debug!("Deleting {} messages", due.len());
    stream::iter(due)
        .map(|deletion| run_deletion(bot, deletion))
        .buffer_unordered(5)
        .collect::<Vec<()>>()
        .await;
}
