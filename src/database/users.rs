use diesel::prelude::*;
use diesel::SqliteConnection;

use super::{current_time, Database};
use crate::error::WorkflowError;
use crate::models::*;
use crate::schema::chat_users;

pub(crate) fn find_user(conn: &mut SqliteConnection, user_id: i32) -> Result<ChatUser, WorkflowError> {
    chat_users::table
        .find(user_id)
        .first::<ChatUser>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("user"))
}

/// Bumps one of the user's counters in place and returns the new value.
pub(crate) fn increment_counter(
    conn: &mut SqliteConnection,
    user_id: i32,
    kind: RewardKind,
) -> Result<i64, WorkflowError> {
    let target = chat_users::table.find(user_id);
    match kind {
        RewardKind::Uploads => {
            diesel::update(target)
                .set(chat_users::upload_count.eq(chat_users::upload_count + 1))
                .execute(conn)?;
        }
        RewardKind::Validations => {
            diesel::update(target)
                .set(chat_users::validation_count.eq(chat_users::validation_count + 1))
                .execute(conn)?;
        }
    }
    counter_value(conn, user_id, kind)
}

pub(crate) fn counter_value(
    conn: &mut SqliteConnection,
    user_id: i32,
    kind: RewardKind,
) -> Result<i64, WorkflowError> {
    let target = chat_users::table.find(user_id);
    let value = match kind {
        RewardKind::Uploads => target.select(chat_users::upload_count).first::<i64>(conn),
        RewardKind::Validations => target
            .select(chat_users::validation_count)
            .first::<i64>(conn),
    };
    Ok(value?)
}

impl Database {
    /// Returns the user for `telegram_id`, creating it on first sight.
    ///
    /// A known username replaces the stored one, and `in_bot` only ever flips the
    /// flag on.
    pub fn get_or_create_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        in_bot: bool,
    ) -> Result<ChatUser, WorkflowError> {
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| {
            let new_user = NewChatUser {
                telegram_id,
                username,
                is_in_bot: in_bot,
                joined_at: current_time(),
            };
            diesel::insert_into(chat_users::table)
                .values(&new_user)
                .on_conflict(chat_users::telegram_id)
                .do_nothing()
                .execute(conn)?;

            let user_id = chat_users::table
                .filter(chat_users::telegram_id.eq(telegram_id))
                .select(chat_users::id)
                .first::<i32>(conn)?;
            if let Some(name) = username {
                diesel::update(chat_users::table.find(user_id))
                    .set(chat_users::username.eq(name))
                    .execute(conn)?;
            }
            if in_bot {
                diesel::update(chat_users::table.find(user_id))
                    .set(chat_users::is_in_bot.eq(true))
                    .execute(conn)?;
            }

            find_user(conn, user_id)
        })
    }

    #[cfg(test)]
    pub fn find_user_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> Result<Option<ChatUser>, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(chat_users::table
            .filter(chat_users::telegram_id.eq(telegram_id))
            .first::<ChatUser>(&mut conn)
            .optional()?)
    }

    pub fn get_user(&self, user_id: i32) -> Result<ChatUser, WorkflowError> {
        let mut conn = self.connection()?;
        find_user(&mut conn, user_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::test_support::*;
    use crate::models::RewardKind;

    #[test]
    fn get_or_create_is_keyed_on_telegram_id() {
        let (_dir, db) = test_database();

        let first = db.get_or_create_user(42, Some("alice"), false).unwrap();
        let second = db.get_or_create_user(42, None, false).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("alice"));
        assert_eq!(second.upload_count, 0);
        assert!(!second.is_in_bot);
    }

    #[test]
    fn in_bot_flag_is_sticky() {
        let (_dir, db) = test_database();

        db.get_or_create_user(42, Some("alice"), true).unwrap();
        let later = db.get_or_create_user(42, Some("alice_renamed"), false).unwrap();

        assert!(later.is_in_bot);
        assert_eq!(later.username.as_deref(), Some("alice_renamed"));
    }

    #[test]
    fn counters_increment_atomically() {
        let (_dir, db) = test_database();
        let alice = user(&db, 42);
        let mut conn = db.connection().unwrap();

        assert_eq!(
            super::increment_counter(&mut conn, alice.id, RewardKind::Uploads).unwrap(),
            1
        );
        assert_eq!(
            super::increment_counter(&mut conn, alice.id, RewardKind::Uploads).unwrap(),
            2
        );
        assert_eq!(
            super::counter_value(&mut conn, alice.id, RewardKind::Validations).unwrap(),
            0
        );
    }

    #[test]
    fn unknown_user_lookup_is_none() {
        let (_dir, db) = test_database();

        assert!(db.find_user_by_telegram_id(7).unwrap().is_none());
        assert!(db.get_user(99).is_err());
    }
}
