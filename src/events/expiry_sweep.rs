use crate::bot::Bot;
use crate::commands::request::describe;
use crate::database::current_time;

/// Expires overdue requests and tells their chats.
pub async fn expire_requests(bot: &Bot) -> usize {
    let expired = match bot.db.sweep_expired(current_time()) {
        Ok(expired) => expired,
        Err(err) => {
            error!("Expiry sweep failed: {}", err);
            return 0;
        }
    };
    if expired.is_empty() {
        return 0;
    }

    info!("Expired {} requests", expired.len());
    for request in &expired {
        let text = format!(
            "⌛ Nobody found {} in time, the request has expired. Feel free to ask again.",
            describe(request)
        );
        bot.notifier
            .notice(request.chat_id, &text, Some(request.request_message_id))
            .await;
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::expire_requests;
    use crate::bot::testing::*;
    use crate::database::current_time;
    use crate::models::RequestStatus;

    #[tokio::test]
    async fn overdue_requests_are_expired_and_announced() {
        let h = harness();
        let requester = h.bot.db.get_or_create_user(1, None, false).unwrap();
        let overdue = h
            .bot
            .db
            .create_request(
                "10.1234/old",
                GROUP,
                Some(&requester),
                500,
                None,
                current_time() - chrono::Duration::days(4),
            )
            .unwrap();
        let fresh = h
            .bot
            .db
            .create_request("10.1234/new", GROUP, Some(&requester), 501, None, current_time())
            .unwrap();

        assert_eq!(expire_requests(&h.bot).await, 1);

        assert_eq!(h.bot.db.get_request(overdue.id).unwrap().status, RequestStatus::Expired);
        assert_eq!(h.bot.db.get_request(fresh.id).unwrap().status, RequestStatus::Pending);
        let texts = h.transport.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].1.contains("10.1234/old"));
        assert_eq!(expire_requests(&h.bot).await, 0);
    }
}
