use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;

use crate::schema::{
    chat_users, pdf_uploads, requests, scheduled_deletions, subscriptions, validations,
};

/// Lifecycle of a DOI request. `Completed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Expired,
}

impl RequestStatus {
    pub const OPEN: [RequestStatus; 2] = [RequestStatus::Pending, RequestStatus::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Processing)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "processing" => Ok(RequestStatus::Processing),
            "completed" => Ok(RequestStatus::Completed),
            "expired" => Ok(RequestStatus::Expired),
            other => Err(format!("unknown request status `{}`", other)),
        }
    }
}

impl ToSql<Text, Sqlite> for RequestStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for RequestStatus {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        value.parse().map_err(Into::into)
    }
}

/// What a subscription was granted for, and which counter feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum RewardKind {
    Uploads,
    Validations,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Uploads => "uploads",
            RewardKind::Validations => "validations",
        }
    }
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploads" => Ok(RewardKind::Uploads),
            "validations" => Ok(RewardKind::Validations),
            other => Err(format!("unknown reward kind `{}`", other)),
        }
    }
}

impl ToSql<Text, Sqlite> for RewardKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for RewardKind {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        value.parse().map_err(Into::into)
    }
}

#[derive(Queryable, Identifiable, Clone, Debug, PartialEq)]
#[diesel(table_name = chat_users)]
pub struct ChatUser {
    pub id: i32,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub is_in_bot: bool,
    pub upload_count: i64,
    pub validation_count: i64,
    pub joined_at: NaiveDateTime,
}

impl ChatUser {
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(name) => name.clone(),
            None => self.telegram_id.to_string(),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = chat_users)]
pub struct NewChatUser<'a> {
    pub telegram_id: i64,
    pub username: Option<&'a str>,
    pub is_in_bot: bool,
    pub joined_at: NaiveDateTime,
}

#[derive(Queryable, Identifiable, Clone, Debug, PartialEq)]
#[diesel(table_name = requests)]
pub struct Request {
    pub id: i32,
    pub doi: String,
    pub title: Option<String>,
    pub chat_id: i64,
    pub requester_id: Option<i32>,
    pub status: RequestStatus,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub request_message_id: i64,
}

#[derive(Insertable)]
#[diesel(table_name = requests)]
pub struct NewRequest<'a> {
    pub doi: &'a str,
    pub title: Option<&'a str>,
    pub chat_id: i64,
    pub requester_id: Option<i32>,
    pub status: RequestStatus,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub request_message_id: i64,
}

#[derive(Queryable, Identifiable, Clone, Debug, PartialEq)]
#[diesel(table_name = pdf_uploads)]
pub struct PdfUpload {
    pub id: i32,
    pub request_id: i32,
    pub uploader_id: i32,
    pub storage_reference: String,
    pub file_id: String,
    pub uploaded_at: NaiveDateTime,
    pub is_valid: Option<bool>,
    pub validated_at: Option<NaiveDateTime>,
    pub delete_at: Option<NaiveDateTime>,
    pub chat_message_id: i64,
    pub vote_message_id: Option<i64>,
}

#[derive(Insertable)]
#[diesel(table_name = pdf_uploads)]
pub struct NewPdfUpload<'a> {
    pub request_id: i32,
    pub uploader_id: i32,
    pub storage_reference: &'a str,
    pub file_id: &'a str,
    pub uploaded_at: NaiveDateTime,
    pub chat_message_id: i64,
}

#[derive(Queryable, Identifiable, Clone, Debug, PartialEq)]
#[diesel(table_name = validations)]
pub struct Validation {
    pub id: i32,
    pub pdf_upload_id: i32,
    pub voter_id: i32,
    pub vote: bool,
    pub voted_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = validations)]
pub struct NewValidation {
    pub pdf_upload_id: i32,
    pub voter_id: i32,
    pub vote: bool,
    pub voted_at: NaiveDateTime,
}

#[derive(Queryable, Identifiable, Clone, Debug, PartialEq)]
#[diesel(table_name = subscriptions)]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub reason: RewardKind,
    pub milestone: i64,
}

#[derive(Insertable)]
#[diesel(table_name = subscriptions)]
pub struct NewSubscription {
    pub user_id: i32,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub reason: RewardKind,
    pub milestone: i64,
}

#[derive(Queryable, Identifiable, Clone, Debug, PartialEq)]
#[diesel(table_name = scheduled_deletions)]
pub struct ScheduledDeletion {
    pub id: i32,
    pub chat_id: i64,
    pub message_id: i64,
    pub run_at: NaiveDateTime,
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = scheduled_deletions)]
pub struct NewScheduledDeletion {
    pub chat_id: i64,
    pub message_id: i64,
    pub run_at: NaiveDateTime,
}
