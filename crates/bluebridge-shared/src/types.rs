use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::{GROUP_CHAT_SEPARATOR, PRIVATE_CHAT_SEPARATOR};
use crate::error::IdentifierError;

/// A parsed native chat or participant identifier.
///
/// Direct chats look like `iMessage;-;+15551234567`, groups like
/// `iMessage;+;chat123456`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub service: String,
    pub is_group: bool,
    pub local_id: String,
}

impl Identifier {
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        if s.is_empty() {
            return Err(IdentifierError::Empty);
        }

        let (service, local_id, is_group) = if let Some((svc, local)) =
            s.split_once(PRIVATE_CHAT_SEPARATOR)
        {
            (svc, local, false)
        } else if let Some((svc, local)) = s.split_once(GROUP_CHAT_SEPARATOR) {
            (svc, local, true)
        } else {
            return Err(IdentifierError::MissingSeparator(s.to_string()));
        };

        if service.is_empty() || local_id.is_empty() {
            return Err(IdentifierError::EmptyPart(s.to_string()));
        }

        Ok(Self {
            service: service.to_string(),
            is_group,
            local_id: local_id.to_string(),
        })
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.is_group {
            GROUP_CHAT_SEPARATOR
        } else {
            PRIVATE_CHAT_SEPARATOR
        };
        write!(f, "{}{}{}", self.service, sep, self.local_id)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Whether a raw chat identifier follows the direct (1:1) chat grammar.
pub fn is_private_chat(chat_id: &str) -> bool {
    chat_id.contains(PRIVATE_CHAT_SEPARATOR)
}

/// Federated-side room id. Never empty: "no room yet" is `Option::None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Returns `None` for the empty string.
    pub fn new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(s).ok_or_else(|| serde::de::Error::custom("room id must not be empty"))
    }
}

/// Federated-side event id.
pub type EventId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct() {
        let id = Identifier::parse("iMessage;-;+15551234567").unwrap();
        assert_eq!(id.service, "iMessage");
        assert!(!id.is_group);
        assert_eq!(id.local_id, "+15551234567");
        assert_eq!(id.to_string(), "iMessage;-;+15551234567");
    }

    #[test]
    fn test_parse_group() {
        let id: Identifier = "iMessage;+;chat493787".parse().unwrap();
        assert!(id.is_group);
        assert_eq!(id.local_id, "chat493787");
        assert!(!is_private_chat(&id.to_string()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Identifier::parse(""), Err(IdentifierError::Empty));
        assert!(matches!(
            Identifier::parse("+15551234567"),
            Err(IdentifierError::MissingSeparator(_))
        ));
        assert!(matches!(
            Identifier::parse(";-;+1555"),
            Err(IdentifierError::EmptyPart(_))
        ));
    }

    #[test]
    fn test_room_id_rejects_empty() {
        assert!(RoomId::new("").is_none());
        assert_eq!(RoomId::new("!abc:example.org").unwrap().as_str(), "!abc:example.org");
        assert!(serde_json::from_str::<RoomId>("\"\"").is_err());
    }
}
