use frankenstein::{Message, User};

use crate::bot::Bot;
use crate::database::current_time;
use crate::database::rewards::UserStats;
use crate::telegram::{message_id, user_id};

fn render(stats: &UserStats) -> String {
    let mut lines = vec![
        format!("📊 Stats for {}", stats.user.display_name()),
        format!("Uploads: {}", stats.user.upload_count),
        format!("Validations: {}", stats.user.validation_count),
    ];
    match &stats.active_subscription {
        Some(subscription) => lines.push(format!(
            "Subscription active until {}",
            subscription.end_date.date()
        )),
        None => lines.push("No active subscription".to_string()),
    }
    if let Some(left) = stats.uploads_until_reward {
        lines.push(format!("{} more uploads until the next reward", left));
    }
    if let Some(left) = stats.validations_until_reward {
        lines.push(format!("{} more votes until the next reward", left));
    }
    lines.join("\n")
}

pub async fn stats(bot: &Bot, message: &Message, from: &User) {
    let telegram_id = user_id(from);
    let user = match bot.db.get_or_create_user(telegram_id, from.username.as_deref(), false) {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to load {}: {}", telegram_id, err);
            return;
        }
    };
    let stats = match bot.db.user_stats(user.id, bot.thresholds(), current_time()) {
        Ok(stats) => stats,
        Err(err) => {
            error!("Failed to compute stats for {}: {}", user.id, err);
            return;
        }
    };
    bot.notifier
        .notice(message.chat.id, &render(&stats), Some(message_id(message)))
        .await;
}

#[cfg(test)]
mod tests {
    use crate::bot::testing::*;
    use crate::config::Thresholds;

    #[tokio::test]
    async fn stats_show_counters_and_remaining() {
        let h = harness();
        h.thresholds
            .send(Thresholds {
                uploads: 3,
                validations: 5,
            })
            .unwrap();

        h.bot
            .clone()
            .handle_update(message_update(text_message(42, 1, 42, "/stats")))
            .await;

        let texts = h.transport.texts();
        assert_eq!(texts.len(), 1);
        let text = &texts[0].1;
        assert!(text.contains("Uploads: 0"));
        assert!(text.contains("No active subscription"));
        assert!(text.contains("3 more uploads"));
        assert!(text.contains("5 more votes"));
    }
}
