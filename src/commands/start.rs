use frankenstein::{Message, User};

use crate::bot::Bot;
use crate::telegram::{message_id, user_id};

pub async fn start(bot: &Bot, message: &Message, from: &User) {
    let telegram_id = user_id(from);
    if let Err(err) = bot.db.get_or_create_user(telegram_id, from.username.as_deref(), true) {
        error!("Failed to register {}: {}", telegram_id, err);
        return;
    }

    let text = format!(
        "Hi {}! I help this community find scientific articles.\n\
         Ask for a paper with /request <doi>, upload PDFs for others and vote on uploads \
         to earn subscriptions. See /help for details.",
        from.first_name
    );
    bot.notifier.notice(message.chat.id, &text, Some(message_id(message))).await;
}
