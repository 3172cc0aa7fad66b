use std::fmt;

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::domain::{OptionId, Role, SessionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCodeRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVoteRequest {
    pub session_id: SessionId,
    pub option_id: OptionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
    pub options: Vec<String>,
}

/// Vote counts keyed by option label, kept in the order the server sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResultMap {
    entries: Vec<(String, u64)>,
}

impl RawResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `label` to `votes`. A repeated label keeps its first position and its last value.
    pub fn insert(&mut self, label: impl Into<String>, votes: u64) {
        let label = label.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == label) {
            Some(entry) => entry.1 = votes,
            None => self.entries.push((label, votes)),
        }
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, votes)| *votes)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.entries
            .iter()
            .map(|(label, votes)| (label.as_str(), *votes))
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, votes)| *votes).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: Into<String>> FromIterator<(L, u64)> for RawResultMap {
    fn from_iter<I: IntoIterator<Item = (L, u64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (label, votes) in iter {
            map.insert(label, votes);
        }
        map
    }
}

impl Serialize for RawResultMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, votes) in &self.entries {
            map.serialize_entry(label, votes)?;
        }
        map.end()
    }
}

struct RawResultMapVisitor;

impl<'de> Visitor<'de> for RawResultMapVisitor {
    type Value = RawResultMap;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of option label to non-negative vote count")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = RawResultMap::new();
        while let Some((label, votes)) = access.next_entry::<String, u64>()? {
            map.insert(label, votes);
        }
        Ok(map)
    }
}

impl<'de> Deserialize<'de> for RawResultMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawResultMapVisitor)
    }
}
