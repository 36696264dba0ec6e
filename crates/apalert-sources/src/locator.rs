//! Session identifiers: which source a URL points at, and the per-session
//! link state every agent reads and fills in.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SourceError;
use crate::native::NativeCache;

pub const DEFAULT_AGGREGATOR_URL: &str = "https://cheesetrackers.theincrediblewheelofchee.se";
pub const DEFAULT_NATIVE_HOST: &str = "https://archipelago.gg";

/// Team segment in slot URLs. Multi-team sessions are not tracked.
const TEAM: &str = "0";

// ─── Native Room ─────────────────────────────────────────────────────

/// A session on the game host itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeRoom {
    /// Scheme, host and port, without a trailing slash.
    pub origin: String,
    /// The host's tracker id for the session.
    pub room: String,
}

impl NativeRoom {
    pub fn new(origin: impl Into<String>, room: impl Into<String>) -> Self {
        let origin: String = origin.into();
        Self {
            origin: origin.trim_end_matches('/').to_owned(),
            room: room.into(),
        }
    }

    /// Session-level tracker page.
    pub fn tracker_url(&self) -> String {
        format!("{}/tracker/{}", self.origin, self.room)
    }

    pub fn slot_url(&self, position: u32, generic: bool) -> String {
        let kind = if generic { "generic_tracker" } else { "tracker" };
        format!("{}/{kind}/{}/{TEAM}/{position}", self.origin, self.room)
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.origin)
    }

    /// Registry key: host plus room, scheme-insensitive.
    pub fn alias(&self) -> String {
        let host = self
            .origin
            .split_once("://")
            .map_or(self.origin.as_str(), |(_, rest)| rest);
        format!("{host}/{}", self.room)
    }
}

// ─── Locator ─────────────────────────────────────────────────────────

/// What a user-supplied URL refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLocator {
    Aggregator { tracker_id: String },
    Native { room: NativeRoom, slot: Option<u32> },
}

impl SessionLocator {
    /// Classify `raw` against the configured aggregator base URL.
    ///
    /// Accepted shapes:
    /// - `<aggregator>/tracker/<id>` and `<aggregator>/api/tracker/<id>`
    /// - `<host>/tracker/<room>[/0/<slot>]` and the `generic_tracker` variant
    pub fn parse(raw: &str, aggregator: &Url) -> Result<Self, SourceError> {
        let bad = || SourceError::BadIdentifier(raw.to_owned());
        let url = Url::parse(raw.trim()).map_err(|_| bad())?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if url.host_str().is_some() && url.host_str() == aggregator.host_str() {
            let id = segments
                .iter()
                .position(|s| *s == "tracker")
                .and_then(|i| segments.get(i + 1))
                .ok_or_else(bad)?;
            return Ok(Self::Aggregator {
                tracker_id: (*id).to_owned(),
            });
        }

        let at = segments
            .iter()
            .position(|s| *s == "tracker" || *s == "generic_tracker")
            .ok_or_else(bad)?;
        let room = segments.get(at + 1).ok_or_else(bad)?;
        let slot = match (segments.get(at + 2), segments.get(at + 3)) {
            (None, _) => None,
            (Some(_team), Some(slot)) => Some(slot.parse::<u32>().map_err(|_| bad())?),
            (Some(_), None) => return Err(bad()),
        };
        Ok(Self::Native {
            room: NativeRoom::new(url.origin().ascii_serialization(), *room),
            slot,
        })
    }

    pub fn slot(&self) -> Option<u32> {
        match self {
            Self::Aggregator { .. } => None,
            Self::Native { slot, .. } => *slot,
        }
    }
}

// ─── Session Link ────────────────────────────────────────────────────

/// Everything the agents know about where one session lives.
///
/// Persisted with the session; the native document cache is not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLink {
    #[serde(default)]
    pub aggregator_id: Option<String>,
    #[serde(default)]
    pub native: Option<NativeRoom>,
    /// The HTML agent fell back to the `generic_tracker` page shape.
    #[serde(default)]
    pub html_generic: bool,
    #[serde(skip)]
    pub native_cache: NativeCache,
}

impl SessionLink {
    pub fn from_locator(locator: &SessionLocator) -> Self {
        match locator {
            SessionLocator::Aggregator { tracker_id } => Self {
                aggregator_id: Some(tracker_id.clone()),
                ..Self::default()
            },
            SessionLocator::Native { room, .. } => Self {
                native: Some(room.clone()),
                ..Self::default()
            },
        }
    }

    /// Canonical host URL, used to register the session with the aggregator.
    pub fn upstream_url(&self) -> Option<String> {
        self.native.as_ref().map(NativeRoom::tracker_url)
    }

    /// Learn the native room from an aggregator-reported upstream URL.
    /// Returns true when the link changed.
    pub fn adopt_upstream(&mut self, upstream: &str, aggregator: &Url) -> bool {
        if self.native.is_some() {
            return false;
        }
        match SessionLocator::parse(upstream, aggregator) {
            Ok(SessionLocator::Native { room, .. }) => {
                self.native = Some(room);
                true
            }
            _ => false,
        }
    }

    /// Fold another link for the same session into this one.
    pub fn absorb(&mut self, other: SessionLink) {
        if self.aggregator_id.is_none() {
            self.aggregator_id = other.aggregator_id;
        }
        if self.native.is_none() {
            self.native = other.native;
        }
        self.html_generic |= other.html_generic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> Url {
        Url::parse(DEFAULT_AGGREGATOR_URL).expect("valid")
    }

    #[test]
    fn parses_native_slot_url() {
        let loc = SessionLocator::parse("https://archipelago.gg/tracker/AbC123/0/7", &aggregator())
            .expect("parse");
        assert_eq!(
            loc,
            SessionLocator::Native {
                room: NativeRoom::new("https://archipelago.gg", "AbC123"),
                slot: Some(7),
            }
        );
    }

    #[test]
    fn parses_generic_tracker_and_session_root() {
        let loc = SessionLocator::parse(
            "https://archipelago.gg:38281/generic_tracker/room/0/2",
            &aggregator(),
        )
        .expect("parse");
        assert_eq!(loc.slot(), Some(2));

        let root = SessionLocator::parse("https://archipelago.gg/tracker/room", &aggregator())
            .expect("parse");
        assert_eq!(root.slot(), None);
    }

    #[test]
    fn parses_aggregator_urls() {
        for raw in [
            "https://cheesetrackers.theincrediblewheelofchee.se/tracker/xyz",
            "https://cheesetrackers.theincrediblewheelofchee.se/api/tracker/xyz",
        ] {
            let loc = SessionLocator::parse(raw, &aggregator()).expect("parse");
            assert_eq!(
                loc,
                SessionLocator::Aggregator {
                    tracker_id: "xyz".into()
                }
            );
        }
    }

    #[test]
    fn rejects_unresolvable_urls() {
        for raw in [
            "not a url",
            "https://archipelago.gg/room/abc",
            "https://archipelago.gg/tracker",
            "https://archipelago.gg/tracker/abc/0",
            "https://archipelago.gg/tracker/abc/0/seven",
            "https://cheesetrackers.theincrediblewheelofchee.se/dashboard",
        ] {
            let err = SessionLocator::parse(raw, &aggregator()).expect_err(raw);
            assert!(matches!(err, SourceError::BadIdentifier(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn room_urls_and_alias() {
        let room = NativeRoom::new("https://archipelago.gg/", "abc");
        assert_eq!(room.tracker_url(), "https://archipelago.gg/tracker/abc");
        assert_eq!(room.slot_url(3, true), "https://archipelago.gg/generic_tracker/abc/0/3");
        assert_eq!(room.api_url("tracker/abc"), "https://archipelago.gg/api/tracker/abc");
        assert_eq!(room.alias(), "archipelago.gg/abc");
    }

    #[test]
    fn adopt_upstream_only_fills_gaps() {
        let mut link = SessionLink {
            aggregator_id: Some("xyz".into()),
            ..SessionLink::default()
        };
        assert!(link.adopt_upstream("https://archipelago.gg/tracker/abc", &aggregator()));
        assert!(!link.adopt_upstream("https://archipelago.gg/tracker/other", &aggregator()));
        assert_eq!(link.native.as_ref().map(|r| r.room.as_str()), Some("abc"));
    }
}
