use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(OptionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Draft,
    Active,
    Closed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[serde(alias = "admin")]
    Admin,
    #[serde(alias = "voter")]
    Voter,
    #[serde(other)]
    Other,
}

/// How a resolved session should be treated for voting and live results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClass {
    Active,
    Closed,
    Absent,
}

impl SessionClass {
    pub fn of(session: Option<&VotingSession>) -> Self {
        match session {
            None => Self::Absent,
            Some(session) => match session.status {
                // Minimal payloads omit the status; the server only hands those out for the
                // running session.
                None | Some(SessionStatus::Active) => Self::Active,
                Some(_) => Self::Closed,
            },
        }
    }
}

/// Option as the server sends it. Older payloads carry the label under `text`.
#[derive(Debug, Deserialize)]
struct WireVotingOption {
    id: OptionId,
    #[serde(default, alias = "displayName", alias = "label")]
    name: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireVotingOption")]
pub struct VotingOption {
    pub id: OptionId,
    pub label: String,
}

impl VotingOption {
    pub fn new(id: OptionId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    pub fn fallback_label(id: OptionId) -> String {
        format!("Option {id}")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl From<WireVotingOption> for VotingOption {
    fn from(wire: WireVotingOption) -> Self {
        let label = non_blank(wire.name)
            .or_else(|| non_blank(wire.text))
            .unwrap_or_else(|| Self::fallback_label(wire.id));
        Self { id: wire.id, label }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: SessionId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub options: Vec<VotingOption>,
}

impl VotingSession {
    pub fn class(&self) -> SessionClass {
        SessionClass::of(Some(self))
    }

    pub fn is_active(&self) -> bool {
        self.class() == SessionClass::Active
    }

    pub fn option(&self, option_id: OptionId) -> Option<&VotingOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn contains_option(&self, option_id: OptionId) -> bool {
        self.option(option_id).is_some()
    }
}
