use chrono::{Duration, Months, NaiveDateTime};
use diesel::prelude::*;
use diesel::SqliteConnection;

use super::users::{counter_value, find_user};
use super::Database;
use crate::config::Thresholds;
use crate::error::WorkflowError;
use crate::models::*;
use crate::schema::subscriptions;

/// Counters and reward state shown by `/stats`.
#[derive(Clone, Debug, PartialEq)]
pub struct UserStats {
    pub user: ChatUser,
    pub active_subscription: Option<Subscription>,
    pub uploads_until_reward: Option<i64>,
    pub validations_until_reward: Option<i64>,
}

fn threshold_for(thresholds: Thresholds, kind: RewardKind) -> i64 {
    match kind {
        RewardKind::Uploads => thresholds.uploads,
        RewardKind::Validations => thresholds.validations,
    }
}

/// How many more events are needed before `count` hits the next multiple.
pub fn remaining_until_reward(count: i64, threshold: i64) -> Option<i64> {
    if threshold <= 0 {
        return None;
    }
    Some(threshold - count.rem_euclid(threshold))
}

fn one_month_after(start: NaiveDateTime) -> NaiveDateTime {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| start + Duration::days(30))
}

/// Grants a subscription when the user's `kind` counter sits on a positive
/// multiple of its threshold and that milestone has not been rewarded yet.
pub(crate) fn evaluate_reward(
    conn: &mut SqliteConnection,
    user_id: i32,
    kind: RewardKind,
    thresholds: Thresholds,
    now: NaiveDateTime,
) -> Result<Option<Subscription>, WorkflowError> {
    let threshold = threshold_for(thresholds, kind);
    if threshold <= 0 {
        return Ok(None);
    }

    let count = counter_value(conn, user_id, kind)?;
    if count <= 0 || count % threshold != 0 {
        return Ok(None);
    }

    let milestone_query = subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .filter(subscriptions::reason.eq(kind))
        .filter(subscriptions::milestone.eq(count));
    if milestone_query
        .select(subscriptions::id)
        .first::<i32>(conn)
        .optional()?
        .is_some()
    {
        return Ok(None);
    }

    let latest_end = subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .select(subscriptions::end_date)
        .order(subscriptions::end_date.desc())
        .first::<NaiveDateTime>(conn)
        .optional()?;
    let start_date = match latest_end {
        Some(end) if end > now => end,
        _ => now,
    };

    let grant = NewSubscription {
        user_id,
        start_date,
        end_date: one_month_after(start_date),
        reason: kind,
        milestone: count,
    };
    diesel::insert_into(subscriptions::table)
        .values(&grant)
        .execute(conn)?;

    let subscription = subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .filter(subscriptions::reason.eq(kind))
        .filter(subscriptions::milestone.eq(count))
        .first::<Subscription>(conn)?;

    info!(
        "Granted {} subscription to user {} until {} (milestone {})",
        kind, user_id, subscription.end_date, count
    );
    Ok(Some(subscription))
}

pub(crate) fn active_subscription(
    conn: &mut SqliteConnection,
    user_id: i32,
    now: NaiveDateTime,
) -> QueryResult<Option<Subscription>> {
    subscriptions::table
        .filter(subscriptions::user_id.eq(user_id))
        .filter(subscriptions::end_date.gt(now))
        .order(subscriptions::end_date.desc())
        .first::<Subscription>(conn)
        .optional()
}

impl Database {
    #[cfg(test)]
    pub fn evaluate_reward(
        &self,
        user_id: i32,
        kind: RewardKind,
        thresholds: Thresholds,
        now: NaiveDateTime,
    ) -> Result<Option<Subscription>, WorkflowError> {
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| evaluate_reward(conn, user_id, kind, thresholds, now))
    }

    #[cfg(test)]
    pub fn subscriptions_for_user(&self, user_id: i32) -> Result<Vec<Subscription>, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .order(subscriptions::start_date.asc())
            .load::<Subscription>(&mut conn)?)
    }

    pub fn user_stats(
        &self,
        user_id: i32,
        thresholds: Thresholds,
        now: NaiveDateTime,
    ) -> Result<UserStats, WorkflowError> {
        let mut conn = self.connection()?;
        let user = find_user(&mut conn, user_id)?;
        let active_subscription = active_subscription(&mut conn, user_id, now)?;
        Ok(UserStats {
            uploads_until_reward: remaining_until_reward(user.upload_count, thresholds.uploads),
            validations_until_reward: remaining_until_reward(
                user.validation_count,
                thresholds.validations,
            ),
            active_subscription,
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::remaining_until_reward;
    use crate::config::Thresholds;
    use crate::database::test_support::*;
    use crate::database::users::increment_counter;
    use crate::models::RewardKind;

    const SMALL: Thresholds = Thresholds {
        uploads: 2,
        validations: 3,
    };

    fn bump(db: &crate::database::Database, user_id: i32, kind: RewardKind, times: usize) {
        let mut conn = db.connection().unwrap();
        for _ in 0..times {
            increment_counter(&mut conn, user_id, kind).unwrap();
        }
    }

    #[test]
    fn grants_on_threshold_multiple_only() {
        let (_dir, db) = test_database();
        let alice = user(&db, 1);

        bump(&db, alice.id, RewardKind::Uploads, 1);
        assert!(db
            .evaluate_reward(alice.id, RewardKind::Uploads, SMALL, at(1, 0))
            .unwrap()
            .is_none());

        bump(&db, alice.id, RewardKind::Uploads, 1);
        let granted = db
            .evaluate_reward(alice.id, RewardKind::Uploads, SMALL, at(1, 0))
            .unwrap()
            .unwrap();
        assert_eq!(granted.reason, RewardKind::Uploads);
        assert_eq!(granted.milestone, 2);
        assert_eq!(granted.start_date, at(1, 0));
        assert_eq!(
            granted.end_date,
            NaiveDate::from_ymd_opt(2024, 4, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn redundant_evaluation_grants_once() {
        let (_dir, db) = test_database();
        let alice = user(&db, 1);
        bump(&db, alice.id, RewardKind::Validations, 3);

        assert!(db
            .evaluate_reward(alice.id, RewardKind::Validations, SMALL, at(1, 0))
            .unwrap()
            .is_some());
        assert!(db
            .evaluate_reward(alice.id, RewardKind::Validations, SMALL, at(1, 1))
            .unwrap()
            .is_none());
        assert_eq!(db.subscriptions_for_user(alice.id).unwrap().len(), 1);
    }

    #[test]
    fn grants_stack_after_the_latest_end_date() {
        let (_dir, db) = test_database();
        let alice = user(&db, 1);

        bump(&db, alice.id, RewardKind::Uploads, 2);
        let first = db
            .evaluate_reward(alice.id, RewardKind::Uploads, SMALL, at(1, 0))
            .unwrap()
            .unwrap();

        bump(&db, alice.id, RewardKind::Validations, 3);
        let second = db
            .evaluate_reward(alice.id, RewardKind::Validations, SMALL, at(2, 0))
            .unwrap()
            .unwrap();

        assert_eq!(second.start_date, first.end_date);
        assert!(second.end_date > first.end_date);
    }

    #[test]
    fn expired_grants_do_not_push_the_start() {
        let (_dir, db) = test_database();
        let alice = user(&db, 1);

        bump(&db, alice.id, RewardKind::Uploads, 2);
        let first = db
            .evaluate_reward(alice.id, RewardKind::Uploads, SMALL, at(1, 0))
            .unwrap()
            .unwrap();

        let much_later = first.end_date + Duration::days(10);
        bump(&db, alice.id, RewardKind::Uploads, 2);
        let second = db
            .evaluate_reward(alice.id, RewardKind::Uploads, SMALL, much_later)
            .unwrap()
            .unwrap();

        assert_eq!(second.start_date, much_later);
        assert_eq!(second.milestone, 4);
    }

    #[test]
    fn zero_threshold_disables_rewards() {
        let (_dir, db) = test_database();
        let alice = user(&db, 1);
        bump(&db, alice.id, RewardKind::Uploads, 5);

        let disabled = Thresholds {
            uploads: 0,
            validations: 0,
        };
        assert!(db
            .evaluate_reward(alice.id, RewardKind::Uploads, disabled, at(1, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn stats_report_remaining_counts() {
        let (_dir, db) = test_database();
        let alice = user(&db, 1);
        bump(&db, alice.id, RewardKind::Uploads, 3);

        let stats = db.user_stats(alice.id, SMALL, at(1, 0)).unwrap();

        assert_eq!(stats.user.upload_count, 3);
        assert_eq!(stats.uploads_until_reward, Some(1));
        assert_eq!(stats.validations_until_reward, Some(3));
        assert!(stats.active_subscription.is_none());
    }

    #[test]
    fn remaining_until_reward_wraps_at_multiples() {
        assert_eq!(remaining_until_reward(0, 10), Some(10));
        assert_eq!(remaining_until_reward(9, 10), Some(1));
        assert_eq!(remaining_until_reward(10, 10), Some(10));
        assert_eq!(remaining_until_reward(5, 0), None);
    }
}
