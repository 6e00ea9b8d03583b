use chrono::{Duration, NaiveDateTime};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;

use super::Database;
use crate::doi::parse_doi;
use crate::error::WorkflowError;
use crate::models::*;
use crate::schema::requests;

/// How long a request stays open before the sweep expires it.
pub fn request_lifetime() -> Duration {
    Duration::days(3)
}

pub(crate) fn find_request(conn: &mut SqliteConnection, request_id: i32) -> Result<Request, WorkflowError> {
    requests::table
        .find(request_id)
        .first::<Request>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("request"))
}

pub(crate) fn open_request_for_doi(
    conn: &mut SqliteConnection,
    doi: &str,
) -> QueryResult<Option<Request>> {
    requests::table
        .filter(requests::doi.eq(doi))
        .filter(requests::status.eq_any(RequestStatus::OPEN.to_vec()))
        .order(requests::id.desc())
        .first::<Request>(conn)
        .optional()
}

/// Inserts a pending request for an already validated DOI. Must run inside a
/// write transaction so the open-request check and the insert are not split.
pub(crate) fn insert_request(
    conn: &mut SqliteConnection,
    doi: &str,
    title: Option<&str>,
    chat_id: i64,
    requester_id: Option<i32>,
    anchor_message_id: i64,
    now: NaiveDateTime,
) -> Result<Request, WorkflowError> {
    if let Some(existing) = open_request_for_doi(conn, doi)? {
        return Err(WorkflowError::DuplicateRequest(Box::new(existing)));
    }

    let new_request = NewRequest {
        doi,
        title,
        chat_id,
        requester_id,
        status: RequestStatus::Pending,
        created_at: now,
        expires_at: now + request_lifetime(),
        request_message_id: anchor_message_id,
    };

    match diesel::insert_into(requests::table)
        .values(&new_request)
        .execute(conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            let existing = open_request_for_doi(conn, doi)?.ok_or(WorkflowError::NotFound("request"))?;
            return Err(WorkflowError::DuplicateRequest(Box::new(existing)));
        }
        Err(err) => return Err(err.into()),
    }

    open_request_for_doi(conn, doi)?.ok_or(WorkflowError::NotFound("request"))
}

pub(crate) fn mark_processing(conn: &mut SqliteConnection, request_id: i32) -> QueryResult<bool> {
    let updated = diesel::update(
        requests::table
            .find(request_id)
            .filter(requests::status.eq(RequestStatus::Pending)),
    )
    .set(requests::status.eq(RequestStatus::Processing))
    .execute(conn)?;
    Ok(updated == 1)
}

pub(crate) fn mark_completed(conn: &mut SqliteConnection, request_id: i32) -> QueryResult<bool> {
    let updated = diesel::update(
        requests::table
            .find(request_id)
            .filter(requests::status.eq_any(RequestStatus::OPEN.to_vec())),
    )
    .set(requests::status.eq(RequestStatus::Completed))
    .execute(conn)?;
    Ok(updated == 1)
}

impl Database {
    /// Opens a request for `doi`. Fails with `DuplicateRequest` carrying the
    /// existing row while another request for the same DOI is still open.
    pub fn create_request(
        &self,
        doi: &str,
        chat_id: i64,
        requester: Option<&ChatUser>,
        anchor_message_id: i64,
        title: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Request, WorkflowError> {
        let doi = parse_doi(doi)?;
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| {
            insert_request(
                conn,
                &doi,
                title,
                chat_id,
                requester.map(|user| user.id),
                anchor_message_id,
                now,
            )
        })
    }

    /// The newest request anchored to `message_id` in `chat_id`. A re-opened
    /// request shares the anchor of the one it replaced.
    pub fn resolve_by_anchor(&self, chat_id: i64, message_id: i64) -> Result<Request, WorkflowError> {
        let mut conn = self.connection()?;
        requests::table
            .filter(requests::chat_id.eq(chat_id))
            .filter(requests::request_message_id.eq(message_id))
            .order(requests::id.desc())
            .first::<Request>(&mut conn)
            .optional()?
            .ok_or(WorkflowError::NotFound("request"))
    }

    pub fn find_open_request(&self, doi: &str) -> Result<Option<Request>, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(open_request_for_doi(&mut conn, doi)?)
    }

    pub fn latest_request_for_doi(&self, doi: &str) -> Result<Option<Request>, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(requests::table
            .filter(requests::doi.eq(doi))
            .order(requests::id.desc())
            .first::<Request>(&mut conn)
            .optional()?)
    }

    #[cfg(test)]
    pub fn get_request(&self, request_id: i32) -> Result<Request, WorkflowError> {
        let mut conn = self.connection()?;
        find_request(&mut conn, request_id)
    }

    pub fn mark_processing(&self, request_id: i32) -> Result<bool, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(mark_processing(&mut conn, request_id)?)
    }

    pub fn mark_completed(&self, request_id: i32) -> Result<bool, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(mark_completed(&mut conn, request_id)?)
    }

    /// Expires every open request whose deadline passed and returns them.
    pub fn sweep_expired(&self, now: NaiveDateTime) -> Result<Vec<Request>, WorkflowError> {
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| {
            let stale = requests::table
                .filter(requests::status.eq_any(RequestStatus::OPEN.to_vec()))
                .filter(requests::expires_at.lt(now))
                .load::<Request>(conn)?;
            if stale.is_empty() {
                return Ok(stale);
            }

            let ids: Vec<i32> = stale.iter().map(|request| request.id).collect();
            diesel::update(requests::table.filter(requests::id.eq_any(ids)))
                .set(requests::status.eq(RequestStatus::Expired))
                .execute(conn)?;

            Ok(stale
                .into_iter()
                .map(|request| Request {
                    status: RequestStatus::Expired,
                    ..request
                })
                .collect())
        })
    }
}
