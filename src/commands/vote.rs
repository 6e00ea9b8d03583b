use frankenstein::CallbackQuery;

use crate::bot::{retry_transient, Bot};
use crate::callback::VotePayload;
use crate::commands::request::describe;
use crate::database::current_time;
use crate::database::voting::{Resolution, QUORUM};
use crate::error::WorkflowError;
use crate::telegram::user_id;

pub async fn handle_vote(bot: &Bot, query: CallbackQuery) {
    let payload = match query.data.as_deref().map(str::parse::<VotePayload>) {
        Some(Ok(payload)) => payload,
        _ => {
            debug!("Ignoring callback {:?}", query.data);
            answer(bot, &query.id, "Unknown action", false).await;
            return;
        }
    };

    let telegram_id = user_id(&query.from);
    let voter = match bot
        .db
        .get_or_create_user(telegram_id, query.from.username.as_deref(), false)
    {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to load voter {}: {}", telegram_id, err);
            answer(bot, &query.id, "", false).await;
            return;
        }
    };

    let outcome = retry_transient("cast vote", || {
        bot.db.cast_vote(
            payload.upload_id,
            &voter,
            payload.action.is_valid(),
            bot.thresholds(),
            current_time(),
        )
    })
    .await;
    match outcome {
        Ok(outcome) => {
            let text = format!("Vote counted ({}/{})", outcome.votes_cast.min(QUORUM), QUORUM);
            answer(bot, &query.id, &text, false).await;
            if let Some(resolution) = &outcome.resolution {
                announce_resolution(bot, resolution).await;
            }
            if let Some(subscription) = &outcome.reward {
                bot.announce_reward(subscription).await;
            }
        }
        Err(WorkflowError::SelfVoteForbidden) => {
            answer(
                bot,
                &query.id,
                "You can't vote on your own upload or on a PDF for your own request.",
                true,
            )
            .await;
        }
        Err(WorkflowError::DuplicateVote) => {
            answer(bot, &query.id, "You have already voted on this PDF.", false).await;
        }
        Err(WorkflowError::AlreadyResolved) => {
            answer(bot, &query.id, "Voting on this PDF is closed.", false).await;
        }
        Err(WorkflowError::RequestClosed) => {
            answer(bot, &query.id, "This request is no longer open.", false).await;
        }
        Err(WorkflowError::NotFound(what)) => {
            debug!("Vote for missing {} {}", what, payload.upload_id);
            answer(bot, &query.id, "", false).await;
        }
        Err(err) => {
            error!("Vote on upload {} failed: {}", payload.upload_id, err);
            answer(bot, &query.id, "", false).await;
        }
    }
}

async fn answer(bot: &Bot, callback_id: &str, text: &str, show_alert: bool) {
    if let Err(err) = bot.transport.answer_callback(callback_id, text, show_alert).await {
        warn!("Failed to answer callback {}: {:#}", callback_id, err);
    }
}

async fn announce_resolution(bot: &Bot, resolution: &Resolution) {
    let request = &resolution.request;
    let upload = &resolution.upload;
    let chat_id = request.chat_id;

    if let Some(ballot_id) = upload.vote_message_id {
        if let Err(err) = bot.transport.edit_reply_markup(chat_id, ballot_id, None).await {
            warn!("Failed to close ballot {}: {:#}", ballot_id, err);
        }
    }
    if let Some(delete_at) = upload.delete_at {
        if let Some(ballot_id) = upload.vote_message_id {
            bot.notifier.schedule_delete(chat_id, ballot_id, delete_at);
        }
        bot.notifier.schedule_delete(chat_id, upload.chat_message_id, delete_at);
    }

    let anchor = Some(request.request_message_id);
    if resolution.is_valid {
        bot.notifier
            .notice(
                chat_id,
                &format!(
                    "✅ The PDF for {} was confirmed ({} to {}). It stays here for 3 days.",
                    describe(request),
                    resolution.valid_votes,
                    resolution.invalid_votes
                ),
                anchor,
            )
            .await;
        notify_requester(bot, resolution).await;
    } else {
        let text = match &resolution.reopened {
            Some(_) => format!(
                "❌ The PDF for {} was rejected ({} to {}). The search is open again.",
                describe(request),
                resolution.invalid_votes,
                resolution.valid_votes
            ),
            None => format!(
                "❌ The PDF for {} was rejected ({} to {}).",
                describe(request),
                resolution.invalid_votes,
                resolution.valid_votes
            ),
        };
        bot.notifier.notice(chat_id, &text, anchor).await;
    }
}

async fn notify_requester(bot: &Bot, resolution: &Resolution) {
    let requester_id = match resolution.request.requester_id {
        Some(id) => id,
        None => return,
    };
    let requester = match bot.db.get_user(requester_id) {
        Ok(user) => user,
        Err(err) => {
            warn!("Could not load requester {}: {}", requester_id, err);
            return;
        }
    };
    if !requester.is_in_bot {
        return;
    }
    let text = format!(
        "Your article {} has been found and confirmed. Open the chat to download it.",
        describe(&resolution.request)
    );
    bot.notifier.send(requester.telegram_id, &text, None).await;
}
