//! Topic-addressed message model shared by the boundary, the router and the
//! modules.
//!
//! A `Topic` is an opaque 128-bit identifier naming a logical channel. It is
//! distinct from any transport address: many modules may share a topic. The
//! well-known control topics are fixed at compile time; application topics
//! are freely chosen by modules.

pub mod protocol;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Session value meaning "no session".
pub const NO_SESSION: i32 = -1;

/// Opaque identifier of a logical message channel.
///
/// Rendered in the braced uppercase form the wire protocol uses, e.g.
/// `{7924FE60-C967-449C-BA5D-2EBAA7D16024}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Uuid);

/// Topic parse failure.
#[derive(Debug, Error)]
#[error("invalid topic identifier: {0:?}")]
pub struct TopicParseError(String);

impl Topic {
    pub const fn from_u128(value: u128) -> Self {
        Topic(Uuid::from_u128(value))
    }

    /// A fresh, unique application topic.
    pub fn random() -> Self {
        Topic(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the wire rendering. Braces are optional, hex case is not
    /// significant.
    pub fn parse(s: &str) -> Result<Self, TopicParseError> {
        let trimmed = s
            .trim()
            .trim_start_matches('{')
            .trim_end_matches('}');
        Uuid::parse_str(trimmed)
            .map(Topic)
            .map_err(|_| TopicParseError(s.to_string()))
    }
}

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Uuid::encode_buffer();
        let rendered = self.0.hyphenated().encode_upper(&mut buf);
        write!(f, "{{{}}}", rendered)
    }
}

/// Commands for the host itself: terminate, load/unload a module.
pub const HOST_CONTROL: Topic = Topic::from_u128(0x7924FE60_C967_449C_BA5D_2EBAA7D16024);

/// Query/update requests against the process-wide config store.
pub const CONF_STORE: Topic = Topic::from_u128(0x8583CDC9_DB92_45BE_90CE_4D3AA4CD14F5);

/// Config documents pushed after a store change or query.
pub const CONF_BROADCAST: Topic = Topic::from_u128(0x8ED3A4D7_7C78_4B88_A547_A4D87A9DDC35);

/// Module self-announcements (`ModuleMeta` payloads).
pub const MODULE_META: Topic = Topic::from_u128(0x6E6A094C_839F_4EAF_BD22_08CB9E1A318F);

/// Requests for the controller to shell-execute a URI or command line.
pub const SHELL_EXEC: Topic = Topic::from_u128(0xBEA684E7_697F_4201_844F_98224FA16D2F);

/// Name of a well-known control topic, for logs and monitoring. Application
/// topics return `None`.
pub fn well_known_name(topic: Topic) -> Option<&'static str> {
    if topic == HOST_CONTROL {
        Some("host-control")
    } else if topic == CONF_STORE {
        Some("conf-store")
    } else if topic == CONF_BROADCAST {
        Some("conf-broadcast")
    } else if topic == MODULE_META {
        Some("module-meta")
    } else if topic == SHELL_EXEC {
        Some("shell-exec")
    } else {
        None
    }
}

/// True for topics handled by the host process itself rather than fanned out
/// to modules.
pub fn is_system_topic(topic: Topic) -> bool {
    topic == HOST_CONTROL || topic == CONF_STORE || topic == MODULE_META || topic == SHELL_EXEC
}

/// A single fire-and-forget message. Delivery returns a status code, never a
/// reply payload; replies are new messages on a (possibly different) topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: String,
    pub topic: Topic,
    /// Correlation tag distinguishing concurrent conversations on one topic.
    /// `NO_SESSION` (-1) when unused.
    pub session: i32,
}

impl Message {
    pub fn new(payload: impl Into<String>, topic: Topic, session: i32) -> Self {
        Self {
            payload: payload.into(),
            topic,
            session,
        }
    }

    /// A message without session correlation.
    pub fn sessionless(payload: impl Into<String>, topic: Topic) -> Self {
        Self::new(payload, topic, NO_SESSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_renders_braced_uppercase() {
        assert_eq!(
            HOST_CONTROL.to_string(),
            "{7924FE60-C967-449C-BA5D-2EBAA7D16024}"
        );
    }

    #[test]
    fn topic_parses_wire_forms() {
        let braced: Topic = "{8583CDC9-DB92-45BE-90CE-4D3AA4CD14F5}".parse().unwrap();
        assert_eq!(braced, CONF_STORE);

        let bare: Topic = "8583cdc9-db92-45be-90ce-4d3aa4cd14f5".parse().unwrap();
        assert_eq!(bare, CONF_STORE);

        assert!("not-a-topic".parse::<Topic>().is_err());
        assert!("{}".parse::<Topic>().is_err());
    }

    #[test]
    fn topic_round_trips_through_display() {
        let topic = Topic::random();
        let parsed: Topic = topic.to_string().parse().unwrap();
        assert_eq!(parsed, topic);
    }

    #[test]
    fn system_topics_are_recognized() {
        assert!(is_system_topic(HOST_CONTROL));
        assert!(is_system_topic(CONF_STORE));
        assert!(!is_system_topic(CONF_BROADCAST));
        assert!(!is_system_topic(Topic::random()));
    }
}
