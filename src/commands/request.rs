use frankenstein::{Message, User};

use crate::bot::Bot;
use crate::database::current_time;
use crate::doi::parse_doi;
use crate::error::WorkflowError;
use crate::models::Request;
use crate::telegram::{message_id, user_id};

/// Title from the resolver, if it answers. Lookup trouble never blocks a request.
pub async fn lookup_title(bot: &Bot, doi: &str) -> Option<String> {
    match bot.resolver.lookup(doi).await {
        Ok(metadata) => metadata.map(|metadata| metadata.title),
        Err(err) => {
            warn!("Metadata lookup for {} failed: {:#}", doi, err);
            None
        }
    }
}

pub fn describe(request: &Request) -> String {
    match &request.title {
        Some(title) => format!("{} ({})", title, request.doi),
        None => request.doi.clone(),
    }
}

pub async fn request(bot: &Bot, message: &Message, from: &User, argument: &str) {
    let chat_id = message.chat.id;
    let reply_to = Some(message_id(message));

    let doi = match parse_doi(argument) {
        Ok(doi) => doi,
        Err(WorkflowError::MissingArgument(_)) => {
            bot.notifier
                .notice(chat_id, "Usage: /request <doi>, e.g. /request 10.1038/nature12373", reply_to)
                .await;
            return;
        }
        Err(err) => {
            bot.notifier
                .notice(chat_id, &format!("{}. A DOI looks like 10.1038/nature12373.", err), reply_to)
                .await;
            return;
        }
    };

    let telegram_id = user_id(from);
    let requester = match bot.db.get_or_create_user(telegram_id, from.username.as_deref(), false) {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to load requester {}: {}", telegram_id, err);
            return;
        }
    };

    if let Ok(Some(existing)) = bot.db.find_open_request(&doi) {
        reply_duplicate(bot, chat_id, reply_to, &existing).await;
        return;
    }

    let title = lookup_title(bot, &doi).await;
    let created = bot.db.create_request(
        &doi,
        chat_id,
        Some(&requester),
        message_id(message),
        title.as_deref(),
        current_time(),
    );

    match created {
        Ok(request) => {
            info!("Request {} opened for {} by {}", request.id, request.doi, requester.id);
            let text = format!(
                "📚 Looking for {}.\nReply to the request message with the PDF if you have it.",
                describe(&request)
            );
            bot.notifier.notice(chat_id, &text, reply_to).await;
        }
        Err(WorkflowError::DuplicateRequest(existing)) => {
            reply_duplicate(bot, chat_id, reply_to, &existing).await;
        }
        Err(err) => error!("Failed to create request for {}: {}", doi, err),
    }
}

async fn reply_duplicate(bot: &Bot, chat_id: i64, reply_to: Option<i64>, existing: &Request) {
    let text = format!(
        "{} has already been requested and is {}.",
        describe(existing),
        existing.status
    );
    bot.notifier.notice(chat_id, &text, reply_to).await;
}
