use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::Database;
use crate::error::WorkflowError;
use crate::models::*;
use crate::schema::scheduled_deletions;

pub const MAX_DELETE_ATTEMPTS: i32 = 3;

impl Database {
    /// Queues a chat message for deletion at `run_at`. Scheduling the same
    /// message twice keeps the first entry.
    pub fn schedule_delete(
        &self,
        chat_id: i64,
        message_id: i64,
        run_at: NaiveDateTime,
    ) -> Result<(), WorkflowError> {
        let mut conn = self.connection()?;
        diesel::insert_into(scheduled_deletions::table)
            .values(&NewScheduledDeletion {
                chat_id,
                message_id,
                run_at,
            })
            .on_conflict((scheduled_deletions::chat_id, scheduled_deletions::message_id))
            .do_nothing()
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn due_deletions(
        &self,
        now: NaiveDateTime,
        limit: i64,
    ) -> Result<Vec<ScheduledDeletion>, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(scheduled_deletions::table
            .filter(scheduled_deletions::run_at.le(now))
            .order(scheduled_deletions::run_at.asc())
            .limit(limit)
            .load::<ScheduledDeletion>(&mut conn)?)
    }

    pub fn complete_deletion(&self, deletion_id: i32) -> Result<(), WorkflowError> {
        let mut conn = self.connection()?;
        diesel::delete(scheduled_deletions::table.find(deletion_id)).execute(&mut conn)?;
        Ok(())
    }

    /// Records a failed attempt. Returns false once the entry has used up its
    /// attempts and was dropped.
    pub fn fail_deletion(
        &self,
        deletion_id: i32,
        error: &str,
        retry_at: NaiveDateTime,
    ) -> Result<bool, WorkflowError> {
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| {
            let target = scheduled_deletions::table.find(deletion_id);
            let attempts = match target
                .select(scheduled_deletions::attempts)
                .first::<i32>(conn)
                .optional()?
            {
                Some(attempts) => attempts + 1,
                None => return Ok(false),
            };

            if attempts >= MAX_DELETE_ATTEMPTS {
                diesel::delete(scheduled_deletions::table.find(deletion_id)).execute(conn)?;
                return Ok(false);
            }

            diesel::update(scheduled_deletions::table.find(deletion_id))
                .set((
                    scheduled_deletions::attempts.eq(attempts),
                    scheduled_deletions::last_error.eq(Some(error)),
                    scheduled_deletions::run_at.eq(retry_at),
                ))
                .execute(conn)?;
            Ok(true)
        })
    }
}
