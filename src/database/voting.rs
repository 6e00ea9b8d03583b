use chrono::{Duration, NaiveDateTime};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;

use super::requests::{find_request, insert_request, mark_completed};
use super::rewards::evaluate_reward;
use super::uploads::find_upload;
use super::users::increment_counter;
use super::Database;
use crate::config::Thresholds;
use crate::error::WorkflowError;
use crate::models::*;
use crate::schema::{pdf_uploads, validations};

/// Votes needed before an upload is resolved.
pub const QUORUM: i64 = 3;

/// How long a resolved PDF and its ballot stay in the chat.
pub fn retention() -> Duration {
    Duration::days(3)
}

/// The verdict on an upload. Produced exactly once per upload.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub upload: PdfUpload,
    pub request: Request,
    pub is_valid: bool,
    pub valid_votes: i64,
    pub invalid_votes: i64,
    /// Fresh request opened in place of one whose PDF was rejected.
    pub reopened: Option<Request>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoteOutcome {
    pub validation: Validation,
    pub votes_cast: i64,
    pub resolution: Option<Resolution>,
    pub reward: Option<Subscription>,
}

fn tally(conn: &mut SqliteConnection, upload_id: i32) -> QueryResult<(i64, i64)> {
    let votes = validations::table
        .filter(validations::pdf_upload_id.eq(upload_id))
        .group_by(validations::vote)
        .select((validations::vote, count_star()))
        .load::<(bool, i64)>(conn)?;

    let mut valid = 0;
    let mut invalid = 0;
    for (vote, count) in votes {
        if vote {
            valid += count;
        } else {
            invalid += count;
        }
    }
    Ok((valid, invalid))
}

fn has_voted(conn: &mut SqliteConnection, upload_id: i32, voter_id: i32) -> QueryResult<bool> {
    validations::table
        .filter(validations::pdf_upload_id.eq(upload_id))
        .filter(validations::voter_id.eq(voter_id))
        .select(validations::id)
        .first::<i32>(conn)
        .optional()
        .map(|found| found.is_some())
}

/// Sets the verdict only if nobody set it before. Returns whether this call won.
fn resolve_upload(
    conn: &mut SqliteConnection,
    upload_id: i32,
    is_valid: bool,
    now: NaiveDateTime,
) -> QueryResult<bool> {
    let updated = diesel::update(
        pdf_uploads::table
            .find(upload_id)
            .filter(pdf_uploads::is_valid.is_null()),
    )
    .set((
        pdf_uploads::is_valid.eq(Some(is_valid)),
        pdf_uploads::validated_at.eq(Some(now)),
        pdf_uploads::delete_at.eq(Some(now + retention())),
    ))
    .execute(conn)?;
    Ok(updated == 1)
}

impl Database {
    /// Records `voter`'s verdict on an upload and resolves it once the quorum is met.
    pub fn cast_vote(
        &self,
        upload_id: i32,
        voter: &ChatUser,
        vote: bool,
        thresholds: Thresholds,
        now: NaiveDateTime,
    ) -> Result<VoteOutcome, WorkflowError> {
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| {
            let upload = find_upload(conn, upload_id)?;
            let request = find_request(conn, upload.request_id)?;

            if upload.uploader_id == voter.id || request.requester_id == Some(voter.id) {
                return Err(WorkflowError::SelfVoteForbidden);
            }
            if upload.is_valid.is_some() {
                return Err(WorkflowError::AlreadyResolved);
            }
            if !request.status.is_open() {
                return Err(WorkflowError::RequestClosed);
            }
            if has_voted(conn, upload.id, voter.id)? {
                return Err(WorkflowError::DuplicateVote);
            }

            let new_validation = NewValidation {
                pdf_upload_id: upload.id,
                voter_id: voter.id,
                vote,
                voted_at: now,
            };
            match diesel::insert_into(validations::table)
                .values(&new_validation)
                .execute(conn)
            {
                Ok(_) => {}
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    return Err(WorkflowError::DuplicateVote);
                }
                Err(err) => return Err(err.into()),
            }
            let validation = validations::table
                .filter(validations::pdf_upload_id.eq(upload.id))
                .filter(validations::voter_id.eq(voter.id))
                .first::<Validation>(conn)?;

            increment_counter(conn, voter.id, RewardKind::Validations)?;
            let reward = evaluate_reward(conn, voter.id, RewardKind::Validations, thresholds, now)?;

            let (valid_votes, invalid_votes) = tally(conn, upload.id)?;
            let votes_cast = valid_votes + invalid_votes;

            let mut resolution = None;
            if votes_cast >= QUORUM {
                let is_valid = valid_votes > invalid_votes;
                if resolve_upload(conn, upload.id, is_valid, now)? {
                    let was_open = mark_completed(conn, request.id)?;
                    let reopened = if !is_valid && was_open {
                        Some(insert_request(
                            conn,
                            &request.doi,
                            request.title.as_deref(),
                            request.chat_id,
                            request.requester_id,
                            request.request_message_id,
                            now,
                        )?)
                    } else {
                        None
                    };

                    info!(
                        "Upload {} for {} resolved {} ({} valid / {} invalid)",
                        upload.id,
                        request.doi,
                        if is_valid { "valid" } else { "invalid" },
                        valid_votes,
                        invalid_votes
                    );
                    resolution = Some(Resolution {
                        upload: find_upload(conn, upload.id)?,
                        request: find_request(conn, request.id)?,
                        is_valid,
                        valid_votes,
                        invalid_votes,
                        reopened,
                    });
                }
            }

            Ok(VoteOutcome {
                validation,
                votes_cast,
                resolution,
                reward,
            })
        })
    }

    #[cfg(test)]
    /// Current `(valid, invalid)` vote counts for an upload.
    pub fn vote_tally(&self, upload_id: i32) -> Result<(i64, i64), WorkflowError> {
        let mut conn = self.connection()?;
        Ok(tally(&mut conn, upload_id)?)
    }
}
