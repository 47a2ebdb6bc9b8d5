// Accounts, roles and stored chat history.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{UnknownVariant, UserId};

/// What an account is allowed to do. Admins are clinical staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Patient,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s.trim().to_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "admin" | "clinician" => Ok(Role::Admin),
            _ => Err(UnknownVariant::new("role", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatSender {
    User,
    Assistant,
}

impl ChatSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatSender::User => "user",
            ChatSender::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "user" => Ok(ChatSender::User),
            "assistant" => Ok(ChatSender::Assistant),
            _ => Err(UnknownVariant::new("chat sender", s)),
        }
    }
}

/// One turn of a stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: UserId,
    pub sender: ChatSender,
    pub content: String,
    pub created_at: NaiveDateTime,
}
