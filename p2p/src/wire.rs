//! Message framing shared by every qri wire protocol.
//!
//! All exchanges are length-delimited JSON: a u32 big-endian byte count
//! followed by that many bytes of JSON, flushed after every message. Each
//! logical exchange runs on a fresh stream; the responder writes exactly
//! one frame and full-closes.

use chrono::{DateTime, Duration, Utc};
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::PeerId;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};

/// Frames above this size are refused on both ends.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub async fn write_frame<W, T>(io: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds the 1 MiB limit", bytes.len()),
        ));
    }
    io.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    io.write_all(&bytes).await?;
    io.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(io: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the 1 MiB limit", len),
        ));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf).map_err(|e| Error::new(ErrorKind::InvalidData, e))
}

pub const MT_PROFILE: &str = "profile";
pub const MT_DATASETS_LIST: &str = "list_datasets";
pub const MT_ERROR: &str = "error";

/// Envelope of the deprecated top-level qri protocol, still spoken for
/// older peers. Messages are immutable; [`Message::update`] and
/// [`Message::with_headers`] derive new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
    pub created: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(with = "serde_peer_id")]
    pub initiator: PeerId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "serde_body", skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(initiator: PeerId, type_: impl Into<String>, body: Vec<u8>) -> Self {
        let created = Utc::now();
        Self {
            type_: type_.into(),
            id: random_id(),
            created,
            deadline: created + Duration::minutes(2),
            initiator,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// The reply shape: same id and headers, new body.
    pub fn update(&self, body: Vec<u8>) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }

    /// Derives a message with the given header pairs added. Stray keys
    /// without a value are dropped.
    pub fn with_headers<I, S>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        let mut pairs = pairs.into_iter();
        while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
            next.headers.insert(key.into(), value.into());
        }
        next
    }
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

mod serde_peer_id {
    use libp2p::PeerId;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &PeerId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&id.to_base58())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PeerId, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

// message bodies are JSON payloads themselves; base64 keeps the envelope
// readable and matches what older peers emit
mod serde_body {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&base64::encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::decode(&s).map_err(de::Error::custom)
    }
}
