use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::constants::ASSIGNMENT_ID_EPOCH_MS;
use crate::error::EngineError;

const MAX_ASSIGNMENT_ID_LEN: usize = 128;

/// Identifier of the assignment an image belongs to.
///
/// Restricted to `[A-Za-z0-9_-]` so it can be embedded in an object key as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssignmentId(String);

impl AssignmentId {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        if raw.is_empty() || raw.len() > MAX_ASSIGNMENT_ID_LEN {
            return Err(EngineError::InvalidInput(format!(
                "assignment id must be 1-{} characters",
                MAX_ASSIGNMENT_ID_LEN
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EngineError::InvalidInput(format!(
                "assignment id contains invalid characters: {}",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Time-ordered numeric id: milliseconds since the platform epoch, times 1000,
    /// plus a random suffix below 999.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix: i64 = rand::rng().random_range(0..999);
        Self::from_parts(now, suffix)
    }

    fn from_parts(now: DateTime<Utc>, suffix: i64) -> Self {
        let epoch = now.timestamp_millis() - ASSIGNMENT_ID_EPOCH_MS;
        Self((epoch * 1000 + suffix).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AssignmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl FromStr for AssignmentId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssignmentId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AssignmentId> for String {
    fn from(id: AssignmentId) -> Self {
        id.0
    }
}

impl AsRef<str> for AssignmentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
