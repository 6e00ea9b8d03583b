use std::fmt;
use std::str::FromStr;

use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteAction {
    Valid,
    Invalid,
}

impl VoteAction {
    fn tag(&self) -> &'static str {
        match self {
            VoteAction::Valid => "vote_valid",
            VoteAction::Invalid => "vote_invalid",
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VoteAction::Valid)
    }
}

/// Callback data carried by a ballot button: `<action>:<upload_id>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VotePayload {
    pub action: VoteAction,
    pub upload_id: i32,
}

impl fmt::Display for VotePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action.tag(), self.upload_id)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MalformedPayload(pub String);

impl fmt::Display for MalformedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed vote payload `{}`", self.0)
    }
}

impl std::error::Error for MalformedPayload {}

impl FromStr for VotePayload {
    type Err = MalformedPayload;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedPayload(s.to_string());
        let (tag, id) = s.split_once(':').ok_or_else(malformed)?;
        let action = match tag {
            "vote_valid" => VoteAction::Valid,
            "vote_invalid" => VoteAction::Invalid,
            _ => return Err(malformed()),
        };
        // Only canonical decimal ids, so that parsing and printing agree.
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) || (id.len() > 1 && id.starts_with('0')) {
            return Err(malformed());
        }
        let upload_id = id.parse::<i32>().map_err(|_| malformed())?;
        Ok(VotePayload { action, upload_id })
    }
}

pub fn vote_keyboard(upload_id: i32) -> InlineKeyboardMarkup {
    let button = |text: &str, action| {
        InlineKeyboardButton::builder()
            .text(text)
            .callback_data(VotePayload { action, upload_id }.to_string())
            .build()
    };
    InlineKeyboardMarkup::builder()
        .inline_keyboard(vec![vec![
            button("✅ Valid", VoteAction::Valid),
            button("❌ Invalid", VoteAction::Invalid),
        ]])
        .build()
}
