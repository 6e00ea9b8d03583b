pub mod expiry_sweep;
pub mod message_cleanup;

use clokwerk::{AsyncScheduler, Job, TimeUnits};

use crate::bot::Bot;
use crate::events::{expiry_sweep::expire_requests, message_cleanup::delete_due_messages};

pub fn setup_schedulers(scheduler: &mut AsyncScheduler, bot: Bot, sweep_minutes: u32) {
    {
        let bot_clone = bot.clone();
        scheduler.every(sweep_minutes.max(1).minutes()).run(move || {
            let inner_bot_clone = bot_clone.clone();
            async move {
                expire_requests(&inner_bot_clone).await;
            }
        });
    }
    {
        let bot_clone = bot;
        scheduler.every(30.seconds()).run(move || {
            let inner_bot_clone = bot_clone.clone();
            async move {
                delete_due_messages(&inner_bot_clone).await;
            }
        });
    }
}
