use frankenstein::{Message, User};

use crate::bot::{retry_transient, Bot};
use crate::callback::vote_keyboard;
use crate::commands::request::describe;
use crate::database::current_time;
use crate::database::uploads::UploadReceipt;
use crate::database::voting::QUORUM;
use crate::error::WorkflowError;
use crate::models::{ChatUser, Request};
use crate::telegram::{self, user_id};

/// A PDF posted as a reply to a request anchor.
pub async fn handle_upload(bot: &Bot, message: &Message, from: &User) {
    let (document, anchor) = match (message.document.as_ref(), message.reply_to_message.as_ref()) {
        (Some(document), Some(anchor)) => (document, anchor),
        _ => return,
    };
    if !telegram::is_pdf(document) {
        return;
    }
    let chat_id = message.chat.id;
    let file_message_id = telegram::message_id(message);
    let anchor_id = telegram::message_id(anchor);

    let request = match bot.db.resolve_by_anchor(chat_id, anchor_id) {
        Ok(request) => request,
        Err(WorkflowError::NotFound(_)) => {
            debug!("Reply to {} is not a request anchor", anchor_id);
            return;
        }
        Err(err) => {
            error!("Failed to resolve anchor {}: {}", anchor_id, err);
            return;
        }
    };
    if !request.status.is_open() {
        bot.notifier
            .notice(
                chat_id,
                &format!("The request for {} is already {}.", describe(&request), request.status),
                Some(file_message_id),
            )
            .await;
        return;
    }

    match bot.db.find_upload_for_message(request.id, file_message_id) {
        Ok(Some(_)) => {
            debug!("File message {} already recorded", file_message_id);
            return;
        }
        Ok(None) => {}
        Err(err) => {
            error!("Failed to check for an earlier upload: {}", err);
            return;
        }
    }

    let telegram_id = user_id(from);
    let uploader = match bot.db.get_or_create_user(telegram_id, from.username.as_deref(), false) {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to load uploader {}: {}", telegram_id, err);
            return;
        }
    };

    let bytes = match bot.transport.download_file(&document.file_id).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Failed to download {}: {:#}", document.file_id, err);
            bot.notifier
                .notice(chat_id, "Couldn't fetch that file, please send it again.", Some(file_message_id))
                .await;
            return;
        }
    };
    let name = format!("{}_{}.pdf", request.id, file_message_id);
    let reference = match bot.store.save(&name, &bytes).await {
        Ok(reference) => reference,
        Err(err) => {
            error!("Failed to store {}: {:#}", name, err);
            return;
        }
    };

    let receipt = retry_transient("record upload", || {
        bot.db.record_upload(
            &request,
            &uploader,
            &reference,
            &document.file_id,
            file_message_id,
            bot.thresholds(),
            current_time(),
        )
    })
    .await;
    let receipt = match receipt {
        Ok(receipt) => receipt,
        Err(err) => {
            release_file(bot, request.id, file_message_id, &reference).await;
            match err {
                WorkflowError::RequestClosed => {
                    bot.notifier
                        .notice(
                            chat_id,
                            &format!("The request for {} was just closed.", describe(&request)),
                            Some(file_message_id),
                        )
                        .await;
                }
                err => error!("Failed to record upload for request {}: {}", request.id, err),
            }
            return;
        }
    };
    if !receipt.created {
        release_file(bot, request.id, file_message_id, &reference).await;
        return;
    }

    info!(
        "Upload {} recorded for request {} by {}",
        receipt.upload.id, request.id, uploader.id
    );
    post_ballot(bot, &request, &uploader, &receipt).await;
    if let Some(subscription) = &receipt.reward {
        bot.announce_reward(subscription).await;
    }
}

/// Drops a stored file this attempt could not record, unless a concurrent
/// delivery of the same message already recorded it under the same reference.
async fn release_file(bot: &Bot, request_id: i32, file_message_id: i64, reference: &str) {
    match bot.db.find_upload_for_message(request_id, file_message_id) {
        Ok(Some(upload)) if upload.storage_reference == reference => {
            debug!("{} belongs to upload {}", reference, upload.id);
        }
        Ok(_) => {
            if let Err(err) = bot.store.discard(reference).await {
                warn!("Failed to discard {}: {:#}", reference, err);
            }
        }
        Err(err) => warn!("Keeping {}, its owner is unknown: {}", reference, err),
    }
}

async fn post_ballot(bot: &Bot, request: &Request, uploader: &ChatUser, receipt: &UploadReceipt) {
    let caption = format!(
        "📄 PDF for {} from {}.\nIs this the right article? {} votes decide.",
        describe(request),
        uploader.display_name(),
        QUORUM
    );
    let sent = bot
        .transport
        .send_document(
            request.chat_id,
            &receipt.upload.file_id,
            &caption,
            Some(request.request_message_id),
            Some(vote_keyboard(receipt.upload.id)),
        )
        .await;

    match sent {
        Ok(ballot_id) => {
            if let Err(err) = bot.db.attach_vote_message(receipt.upload.id, ballot_id) {
                error!("Failed to remember ballot {}: {}", ballot_id, err);
            }
        }
        Err(err) => error!("Failed to post ballot for upload {}: {:#}", receipt.upload.id, err),
    }
}

#[cfg(test)]
mod tests {
    use diesel::connection::SimpleConnection;

    use super::release_file;
    use crate::bot::testing::*;
    use crate::database::current_time;
    use crate::models::RequestStatus;
    use crate::telegram::testing::{RecordingTransport, Sent};
    use crate::storage::FileStore;

    async fn open_request(h: &Harness) {
        h.bot
            .clone()
            .handle_update(message_update(text_message(GROUP, 500, 1, "/request 10.1234/test.doi")))
            .await;
    }

    #[tokio::test]
    async fn pdf_reply_is_stored_counted_and_put_to_a_vote() {
        let h = harness_with(RecordingTransport::new().with_file("file-a", b"%PDF-1.4"));
        open_request(&h).await;

        h.bot
            .clone()
            .handle_update(message_update(file_reply(GROUP, 600, 2, 500, "file-a")))
            .await;

        let request = h.bot.db.resolve_by_anchor(GROUP, 500).unwrap();
        assert_eq!(request.status, RequestStatus::Processing);
        let uploader = h.bot.db.find_user_by_telegram_id(2).unwrap().unwrap();
        assert_eq!(uploader.upload_count, 1);
        assert_eq!(h.store.names(), vec![format!("memory/{}_600.pdf", request.id)]);

        let upload = h.bot.db.find_upload_for_message(request.id, 600).unwrap().unwrap();
        let ballot = h
            .transport
            .sent()
            .into_iter()
            .find_map(|sent| match sent {
                Sent::Document {
                    message_id,
                    keyboard,
                    reply_to,
                    ..
                } => Some((message_id, keyboard, reply_to)),
                _ => None,
            })
            .unwrap();
        assert_eq!(upload.vote_message_id, Some(ballot.0));
        assert_eq!(ballot.2, Some(500));
        assert_eq!(
            ballot.1.unwrap().inline_keyboard[0][0].callback_data,
            Some(format!("vote_valid:{}", upload.id))
        );
    }

    #[tokio::test]
    async fn redelivered_file_event_counts_once() {
        let h = harness_with(RecordingTransport::new().with_file("file-a", b"%PDF-1.4"));
        open_request(&h).await;

        for _ in 0..2 {
            h.bot
                .clone()
                .handle_update(message_update(file_reply(GROUP, 600, 2, 500, "file-a")))
                .await;
        }

        let uploader = h.bot.db.find_user_by_telegram_id(2).unwrap().unwrap();
        assert_eq!(uploader.upload_count, 1);
        let ballots = h
            .transport
            .sent()
            .into_iter()
            .filter(|sent| matches!(sent, Sent::Document { .. }))
            .count();
        assert_eq!(ballots, 1);
    }

    #[tokio::test]
    async fn failed_download_writes_nothing() {
        let h = harness();
        open_request(&h).await;

        h.bot
            .clone()
            .handle_update(message_update(file_reply(GROUP, 600, 2, 500, "missing")))
            .await;

        let request = h.bot.db.resolve_by_anchor(GROUP, 500).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(h.bot.db.find_upload_for_message(request.id, 600).unwrap().is_none());
        assert!(h.store.names().is_empty());
        assert!(h.transport.texts().last().unwrap().1.contains("Couldn't fetch"));
    }

    #[tokio::test]
    async fn replies_to_other_messages_are_ignored() {
        let h = harness_with(RecordingTransport::new().with_file("file-a", b"%PDF-1.4"));
        open_request(&h).await;
        let before = h.transport.sent().len();

        h.bot
            .clone()
            .handle_update(message_update(file_reply(GROUP, 600, 2, 999, "file-a")))
            .await;

        assert_eq!(h.transport.sent().len(), before);
        assert!(h.store.names().is_empty());
    }

    #[tokio::test]
    async fn failed_write_discards_only_this_attempts_file() {
        let h = harness();
        open_request(&h).await;
        let request = h.bot.db.resolve_by_anchor(GROUP, 500).unwrap();
        let uploader = h.bot.db.get_or_create_user(2, None, false).unwrap();
        let recorded = h.store.save("recorded.pdf", b"%PDF-1.4").await.unwrap();
        h.bot
            .db
            .record_upload(&request, &uploader, &recorded, "file-a", 600, h.bot.thresholds(), current_time())
            .unwrap();
        let stray = h.store.save("stray.pdf", b"%PDF-1.4").await.unwrap();

        release_file(&h.bot, request.id, 600, &recorded).await;
        release_file(&h.bot, request.id, 600, &stray).await;

        assert_eq!(h.store.names(), vec![recorded]);
    }

    #[tokio::test]
    async fn database_outage_leaves_no_row_and_no_file() {
        let h = harness_with(RecordingTransport::new().with_file("file-a", b"%PDF-1.4"));
        open_request(&h).await;
        h.bot
            .db
            .connection()
            .unwrap()
            .batch_execute(
                "CREATE TRIGGER reject_uploads BEFORE INSERT ON pdf_uploads \
                 BEGIN SELECT RAISE(ABORT, 'disk is full'); END;",
            )
            .unwrap();

        h.bot
            .clone()
            .handle_update(message_update(file_reply(GROUP, 600, 2, 500, "file-a")))
            .await;

        let request = h.bot.db.resolve_by_anchor(GROUP, 500).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(h.bot.db.find_upload_for_message(request.id, 600).unwrap().is_none());
        assert!(h.store.names().is_empty());
        let uploader = h.bot.db.find_user_by_telegram_id(2).unwrap().unwrap();
        assert_eq!(uploader.upload_count, 0);
    }
}
