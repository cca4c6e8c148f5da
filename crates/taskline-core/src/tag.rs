//! Tags for receivers and actions.
//!
//! A receiver id is the human form (`mysql/0`, `3`); its tag is the
//! kind-prefixed, slash-free form (`unit-mysql-0`, `machine-3`).

use crate::error::{Result, TasklineError};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ReceiverKind / ReceiverTag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverKind {
    Unit,
    Machine,
}

impl ReceiverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiverKind::Unit => "unit",
            ReceiverKind::Machine => "machine",
        }
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiverTag {
    kind: ReceiverKind,
    id: String,
}

impl ReceiverTag {
    /// Tag for unit `app/N`.
    pub fn unit(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !is_valid_unit_id(&id) {
            return Err(TasklineError::InvalidTag(format!("unit-{id}")));
        }
        Ok(Self {
            kind: ReceiverKind::Unit,
            id,
        })
    }

    /// Tag for machine `N`.
    pub fn machine(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !is_decimal(&id) {
            return Err(TasklineError::InvalidTag(format!("machine-{id}")));
        }
        Ok(Self {
            kind: ReceiverKind::Machine,
            id,
        })
    }

    /// Parse `unit-<app>-<n>` or `machine-<n>`.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("unit-") {
            let (app, num) = rest
                .rsplit_once('-')
                .ok_or_else(|| TasklineError::InvalidTag(s.to_string()))?;
            return Self::unit(format!("{app}/{num}"))
                .map_err(|_| TasklineError::InvalidTag(s.to_string()));
        }
        if let Some(rest) = s.strip_prefix("machine-") {
            return Self::machine(rest).map_err(|_| TasklineError::InvalidTag(s.to_string()));
        }
        Err(TasklineError::InvalidTag(s.to_string()))
    }

    pub fn kind(&self) -> ReceiverKind {
        self.kind
    }

    /// The receiver's id as stored on its actions (`mysql/0`).
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ReceiverTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id.replace('/', "-"))
    }
}

impl std::str::FromStr for ReceiverTag {
    type Err = TasklineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ReceiverTag::parse(s)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_valid_unit_id(id: &str) -> bool {
    let Some((app, num)) = id.split_once('/') else {
        return false;
    };
    let starts_with_letter = app.bytes().next().is_some_and(|b| b.is_ascii_lowercase());
    starts_with_letter
        && !app.ends_with('-')
        && app
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && is_decimal(num)
}

// ---------------------------------------------------------------------------
// ActionTag
// ---------------------------------------------------------------------------

/// An action id is either a sequence number (`"42"`) or, for actions created
/// before short ids were supported, a UUID.
pub fn is_valid_action_id(id: &str) -> bool {
    is_decimal(id) || Uuid::parse_str(id).is_ok_and(|u| u.hyphenated().to_string() == id)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActionTag(String);

impl ActionTag {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if !is_valid_action_id(&id) {
            return Err(TasklineError::InvalidTag(format!("action-{id}")));
        }
        Ok(Self(id))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let id = s
            .strip_prefix("action-")
            .ok_or_else(|| TasklineError::InvalidTag(s.to_string()))?;
        Self::new(id).map_err(|_| TasklineError::InvalidTag(s.to_string()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action-{}", self.0)
    }
}

impl TryFrom<String> for ActionTag {
    type Error = TasklineError;

    fn try_from(s: String) -> Result<Self> {
        ActionTag::parse(&s)
    }
}

impl From<ActionTag> for String {
    fn from(tag: ActionTag) -> String {
        tag.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_tag_round_trip() {
        let tag = ReceiverTag::parse("unit-my-app-10").unwrap();
        assert_eq!(tag.kind(), ReceiverKind::Unit);
        assert_eq!(tag.id(), "my-app/10");
        assert_eq!(tag.to_string(), "unit-my-app-10");
    }

    #[test]
    fn machine_tag_round_trip() {
        let tag: ReceiverTag = "machine-3".parse().unwrap();
        assert_eq!(tag.kind(), ReceiverKind::Machine);
        assert_eq!(tag.id(), "3");
        assert_eq!(tag.to_string(), "machine-3");
    }

    #[test]
    fn bad_receiver_tags_rejected() {
        for bad in ["unit-foo", "unit-Foo-0", "machine-x", "user-bob", "unit--0"] {
            assert!(ReceiverTag::parse(bad).is_err(), "{bad} should not parse");
        }
        assert!(ReceiverTag::unit("u0").is_err());
    }

    #[test]
    fn action_ids_are_numbers_or_uuids() {
        assert!(is_valid_action_id("1"));
        assert!(is_valid_action_id("f47ac10b-58cc-4372-a567-0e02b2c3d479"));
        assert!(!is_valid_action_id("f47ac10b"));
        assert!(!is_valid_action_id(""));
        assert!(!is_valid_action_id("12a"));
    }

    #[test]
    fn action_tag_format() {
        let tag = ActionTag::new("7").unwrap();
        assert_eq!(tag.to_string(), "action-7");
        assert_eq!(ActionTag::parse("action-7").unwrap(), tag);
        assert!(ActionTag::parse("task-7").is_err());
    }
}
