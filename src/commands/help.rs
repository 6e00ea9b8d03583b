use frankenstein::Message;

use crate::bot::Bot;
use crate::database::voting::QUORUM;
use crate::telegram::message_id;

pub async fn help(bot: &Bot, message: &Message) {
    let thresholds = bot.thresholds();
    let text = format!(
        "/request <doi> - ask for an article, e.g. /request 10.1038/nature12373\n\
         /stats - your uploads, validations and subscription\n\
         /help - this message\n\n\
         Reply to a request with the PDF to upload it. Other members vote on it and \
         {} votes settle it; a rejected PDF re-opens the search. Every {} uploads \
         or {} votes earn a month of subscription.\n\nbuild {}",
        QUORUM,
        thresholds.uploads,
        thresholds.validations,
        env!("GIT_HASH")
    );
    bot.notifier.notice(message.chat.id, &text, Some(message_id(message))).await;
}
