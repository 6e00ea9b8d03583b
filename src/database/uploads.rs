use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::SqliteConnection;

use super::requests::{find_request, mark_processing};
use super::rewards::evaluate_reward;
use super::users::increment_counter;
use super::Database;
use crate::config::Thresholds;
use crate::error::WorkflowError;
use crate::models::*;
use crate::schema::pdf_uploads;

/// Result of recording a file. `created` is false when the same file message
/// was already recorded, in which case nothing else changed.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadReceipt {
    pub upload: PdfUpload,
    pub created: bool,
    pub reward: Option<Subscription>,
}

pub(crate) fn find_upload(conn: &mut SqliteConnection, upload_id: i32) -> Result<PdfUpload, WorkflowError> {
    pdf_uploads::table
        .find(upload_id)
        .first::<PdfUpload>(conn)
        .optional()?
        .ok_or(WorkflowError::NotFound("upload"))
}

fn upload_for_message(
    conn: &mut SqliteConnection,
    request_id: i32,
    chat_message_id: i64,
) -> QueryResult<Option<PdfUpload>> {
    pdf_uploads::table
        .filter(pdf_uploads::request_id.eq(request_id))
        .filter(pdf_uploads::chat_message_id.eq(chat_message_id))
        .first::<PdfUpload>(conn)
        .optional()
}

impl Database {
    /// Records a persisted file against `request`, counting it for the uploader.
    ///
    /// Idempotent on `(request, chat_message_id)`: a redelivered file event
    /// returns the existing row without touching counters.
    #[allow(clippy::too_many_arguments)]
    pub fn record_upload(
        &self,
        request: &Request,
        uploader: &ChatUser,
        storage_reference: &str,
        file_id: &str,
        chat_message_id: i64,
        thresholds: Thresholds,
        now: NaiveDateTime,
    ) -> Result<UploadReceipt, WorkflowError> {
        let mut conn = self.connection()?;
        conn.immediate_transaction(|conn| {
            if let Some(upload) = upload_for_message(conn, request.id, chat_message_id)? {
                return Ok(UploadReceipt {
                    upload,
                    created: false,
                    reward: None,
                });
            }

            let current = find_request(conn, request.id)?;
            if !current.status.is_open() {
                return Err(WorkflowError::RequestClosed);
            }

            let new_upload = NewPdfUpload {
                request_id: request.id,
                uploader_id: uploader.id,
                storage_reference,
                file_id,
                uploaded_at: now,
                chat_message_id,
            };
            diesel::insert_into(pdf_uploads::table)
                .values(&new_upload)
                .execute(conn)?;
            let upload = upload_for_message(conn, request.id, chat_message_id)?
                .ok_or(WorkflowError::NotFound("upload"))?;

            increment_counter(conn, uploader.id, RewardKind::Uploads)?;
            mark_processing(conn, request.id)?;
            let reward = evaluate_reward(conn, uploader.id, RewardKind::Uploads, thresholds, now)?;

            Ok(UploadReceipt {
                upload,
                created: true,
                reward,
            })
        })
    }

    pub fn find_upload_for_message(
        &self,
        request_id: i32,
        chat_message_id: i64,
    ) -> Result<Option<PdfUpload>, WorkflowError> {
        let mut conn = self.connection()?;
        Ok(upload_for_message(&mut conn, request_id, chat_message_id)?)
    }

    #[cfg(test)]
    pub fn get_upload(&self, upload_id: i32) -> Result<PdfUpload, WorkflowError> {
        let mut conn = self.connection()?;
        find_upload(&mut conn, upload_id)
    }

    /// Remembers which bot message carries the vote buttons for an upload.
    pub fn attach_vote_message(&self, upload_id: i32, message_id: i64) -> Result<(), WorkflowError> {
        let mut conn = self.connection()?;
        let updated = diesel::update(pdf_uploads::table.find(upload_id))
            .set(pdf_uploads::vote_message_id.eq(message_id))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(WorkflowError::NotFound("upload"));
        }
        Ok(())
    }
}
