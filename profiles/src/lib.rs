//! User identity records and their store.
//!
//! A [`Profile`] is the unit of ownership in the system: it owns a
//! peername, a collection, and any number of network-layer peer ids over
//! its lifetime. [`ProfileId`]s are content-derived and travel base58
//! encoded everywhere (wire, disk, file names).

mod store;

pub use store::ProfileStore;

use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("profile not found")]
    NotFound,
    #[error("profile ID {0:?} looks base64-encoded; profile IDs are base58, use the base58 decoder")]
    Base64Id(String),
    #[error("invalid profile ID {0:?}")]
    InvalidId(String),
    #[error("invalid profile: missing {0}")]
    InvalidProfile(&'static str),
    #[error("profile store is locked by another process")]
    Locked,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("decoding profile store: {0}")]
    Decoding(#[from] serde_json::Error),
}

/// Content-derived stable identifier for a profile, distinct from any
/// single network peer id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId(Vec<u8>);

impl ProfileId {
    /// Decodes the canonical base58 form. Input that only decodes as
    /// base64 gets the diagnostic pointing at the right decoder, since
    /// that mix-up is common enough to deserve its own message.
    pub fn from_base58(s: &str) -> Result<Self, Error> {
        match bs58::decode(s).into_vec() {
            Ok(bytes) if !bytes.is_empty() => Ok(Self(bytes)),
            _ => {
                if base64::decode(s).is_ok() {
                    Err(Error::Base64Id(s.to_owned()))
                } else {
                    Err(Error::InvalidId(s.to_owned()))
                }
            }
        }
    }

    /// Profile ids for keys we generated locally are derived from the
    /// peer id of the underlying keypair.
    pub fn from_peer_id(peer_id: &PeerId) -> Self {
        Self(peer_id.to_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for ProfileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl Debug for ProfileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileId({})", self)
    }
}

impl FromStr for ProfileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for ProfileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProfileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// A user identity record, shared across the network by value. Mutated
/// only by its owner; everyone else treats received profiles as facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    /// Unique human handle.
    pub peername: String,
    /// Every network peer id this profile has been seen under, most
    /// recent first.
    #[serde(
        rename = "peerIDs",
        default,
        with = "serde_peer_ids",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub peer_ids: Vec<PeerId>,
    /// Derived from live connection state, never authoritative at rest.
    #[serde(default)]
    pub online: bool,
    /// Addresses the profile's current host listens on; derived.
    #[serde(
        default,
        with = "serde_multiaddrs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub network_addrs: Vec<Multiaddr>,
}

impl Profile {
    pub fn new(id: ProfileId, peername: impl Into<String>) -> Self {
        Self {
            id,
            peername: peername.into(),
            peer_ids: Vec::new(),
            online: false,
            network_addrs: Vec::new(),
        }
    }

    pub fn with_peer_id(mut self, peer_id: PeerId) -> Self {
        self.peer_ids.push(peer_id);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.id.as_bytes().is_empty() {
            return Err(Error::InvalidProfile("id"));
        }
        if self.peername.is_empty() {
            return Err(Error::InvalidProfile("peername"));
        }
        Ok(())
    }
}

mod serde_peer_ids {
    use libp2p::PeerId;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ids: &[PeerId], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(ids.iter().map(|id| id.to_base58()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<PeerId>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| s.parse().map_err(de::Error::custom))
            .collect()
    }
}

mod serde_multiaddrs {
    use libp2p::Multiaddr;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        addrs: &[Multiaddr],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(addrs.iter().map(|a| a.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Multiaddr>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|s| s.parse().map_err(de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_id_round_trips_through_base58() {
        let id = ProfileId(vec![0x12, 0x20, 1, 2, 3, 4]);
        let encoded = id.to_string();
        let decoded = ProfileId::from_base58(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn base64_ids_get_the_steering_diagnostic() {
        // '=' padding makes this valid base64 but never valid base58
        let encoded = base64::encode(b"the twelve byte id");
        let err = ProfileId::from_base58(&encoded).unwrap_err();
        match err {
            Error::Base64Id(s) => {
                assert_eq!(s, encoded);
                assert!(err_message_mentions_base58(&Error::Base64Id(s)));
            }
            other => panic!("expected Base64Id, got {:?}", other),
        }
    }

    fn err_message_mentions_base58(err: &Error) -> bool {
        err.to_string().contains("base58")
    }

    #[test]
    fn garbage_ids_are_rejected_without_the_diagnostic() {
        let err = ProfileId::from_base58("!!! not an id !!!").unwrap_err();
        assert!(matches!(err, Error::InvalidId(_)));
    }

    #[test]
    fn profile_serializes_peer_ids_as_base58() {
        let peer_id = PeerId::random();
        let profile = Profile::new(ProfileId::from_peer_id(&peer_id), "kermit")
            .with_peer_id(peer_id);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["peerIDs"][0].as_str().unwrap(), peer_id.to_base58());
        let back: Profile = serde_json::from_value(json).unwrap();
        assert_eq!(back, profile);
    }
}
