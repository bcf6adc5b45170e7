//! Dataset references and reference resolution.
//!
//! A [`Ref`] names a dataset lineage. The human-readable half is
//! `username/name`; the machine half (`profile_id`, `init_id`, `path`) is
//! filled in by a [`Resolver`]. The string form is
//! `username/name[@profileID][/ipfs/…]` and round-trips through
//! [`Ref::to_string`] / [`Ref::parse`].

mod resolver;
mod version_info;

pub use resolver::{ParallelResolver, Resolver, SequentialResolver};
pub use version_info::VersionInfo;

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The sentinel for "this reference does not exist here". Chains and
    /// callers match on this variant; everything else aborts resolution.
    #[error("reference not found")]
    NotFound,
    #[error("resolving reference timed out")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid dataset reference {0:?}: expected username/name")]
    MissingName(String),
    #[error("invalid dataset reference {0:?}: empty segment")]
    EmptySegment(String),
}

/// A dataset reference, possibly only partially filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        rename = "profileID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub profile_id: String,
    #[serde(rename = "initID", default, skip_serializing_if = "String::is_empty")]
    pub init_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Ref {
    pub fn new(username: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// A ref is complete once resolution has pinned both the lineage and
    /// the current head.
    pub fn is_complete(&self) -> bool {
        !self.init_id.is_empty() && !self.path.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self == &Ref::default()
    }

    /// The `username/name` half only.
    pub fn human(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }

    /// Parses `username/name[@profileID][/ipfs/…]`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (human, rest) = match s.split_once('@') {
            Some((h, r)) => (h, Some(r)),
            None => (s, None),
        };
        let (username, name) = human
            .split_once('/')
            .ok_or_else(|| ParseError::MissingName(s.to_owned()))?;
        if username.is_empty() || name.is_empty() {
            return Err(ParseError::EmptySegment(s.to_owned()));
        }
        let mut reff = Ref::new(username, name);
        if let Some(rest) = rest {
            match rest.find('/') {
                Some(idx) => {
                    reff.profile_id = rest[..idx].to_owned();
                    reff.path = rest[idx..].to_owned();
                }
                None => reff.profile_id = rest.to_owned(),
            }
            if reff.profile_id.is_empty() && reff.path.is_empty() {
                return Err(ParseError::EmptySegment(s.to_owned()));
            }
        }
        Ok(reff)
    }
}

impl Display for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.username, self.name)?;
        if !self.profile_id.is_empty() || !self.path.is_empty() {
            write!(f, "@{}{}", self.profile_id, self.path)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Ref {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for s in [
            "alice/weather",
            "alice/weather@QmProfile",
            "alice/weather@QmProfile/ipfs/QmHead",
            "alice/weather@/ipfs/QmHead",
        ] {
            let reff = Ref::parse(s).unwrap();
            assert_eq!(reff.to_string(), s, "round trip of {}", s);
        }
    }

    #[test]
    fn parse_fills_fields() {
        let reff = Ref::parse("alice/weather@QmProfile/ipfs/QmHead").unwrap();
        assert_eq!(reff.username, "alice");
        assert_eq!(reff.name, "weather");
        assert_eq!(reff.profile_id, "QmProfile");
        assert_eq!(reff.path, "/ipfs/QmHead");
        assert!(!reff.is_complete());

        let complete = Ref {
            init_id: "init".into(),
            path: "/ipfs/QmHead".into(),
            ..Ref::new("alice", "weather")
        };
        assert!(complete.is_complete());
    }

    #[test]
    fn parse_rejects_malformed_refs() {
        assert!(matches!(
            Ref::parse("just_a_username"),
            Err(ParseError::MissingName(_))
        ));
        assert!(matches!(
            Ref::parse("/weather"),
            Err(ParseError::EmptySegment(_))
        ));
        assert!(matches!(
            Ref::parse("alice/weather@"),
            Err(ParseError::EmptySegment(_))
        ));
    }
}
