//! The three qri stream protocols and their codecs.
//!
//! - the deprecated top-level protocol, a [`Message`] envelope exchange
//!   kept for older peers,
//! - profile exchange: the responder writes one encoded profile,
//! - reference resolution: one encoded [`Ref`] each way, `null` meaning
//!   "not found here".
//!
//! All payloads use the length-delimited JSON framing of [`crate::wire`].

use crate::wire::{read_frame, write_frame, Message};
use dsref::Ref;
use futures::{AsyncRead, AsyncWrite};
use libp2p::core::ProtocolName;
use libp2p::request_response::RequestResponseCodec;
use profiles::Profile;
use std::io::Result;

pub const QRI_PROTOCOL_ID: &str = "/qri/0.1.0";
pub const PROFILE_PROTOCOL_ID: &str = "/qri/profile/0.1.0";
pub const RESOLVE_PROTOCOL_ID: &str = "/qri/ref/0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QriProtocolName;
impl ProtocolName for QriProtocolName {
    fn protocol_name(&self) -> &[u8] {
        QRI_PROTOCOL_ID.as_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileProtocolName;
impl ProtocolName for ProfileProtocolName {
    fn protocol_name(&self) -> &[u8] {
        PROFILE_PROTOCOL_ID.as_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveProtocolName;
impl ProtocolName for ResolveProtocolName {
    fn protocol_name(&self) -> &[u8] {
        RESOLVE_PROTOCOL_ID.as_bytes()
    }
}

/// The profile exchange request carries no bytes: opening the stream is
/// the request, the responder answers with its profile right away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileRequest;

#[derive(Debug, Clone, Default)]
pub struct ProfileCodec;

#[async_trait::async_trait]
impl RequestResponseCodec for ProfileCodec {
    type Protocol = ProfileProtocolName;
    type Request = ProfileRequest;
    type Response = Profile;

    async fn read_request<T: AsyncRead + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        _io: &mut T,
    ) -> Result<Self::Request> {
        Ok(ProfileRequest)
    }

    async fn read_response<T: AsyncRead + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> Result<Self::Response> {
        read_frame(io).await
    }

    async fn write_request<T: AsyncWrite + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        _io: &mut T,
        _req: Self::Request,
    ) -> Result<()> {
        Ok(())
    }

    async fn write_response<T: AsyncWrite + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        profile: Self::Response,
    ) -> Result<()> {
        write_frame(io, &profile).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveCodec;

#[async_trait::async_trait]
impl RequestResponseCodec for ResolveCodec {
    type Protocol = ResolveProtocolName;
    type Request = Ref;
    type Response = Option<Ref>;

    async fn read_request<T: AsyncRead + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> Result<Self::Request> {
        read_frame(io).await
    }

    async fn read_response<T: AsyncRead + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> Result<Self::Response> {
        read_frame(io).await
    }

    async fn write_request<T: AsyncWrite + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        reff: Self::Request,
    ) -> Result<()> {
        write_frame(io, &reff).await
    }

    async fn write_response<T: AsyncWrite + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        reff: Self::Response,
    ) -> Result<()> {
        write_frame(io, &reff).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegacyCodec;

#[async_trait::async_trait]
impl RequestResponseCodec for LegacyCodec {
    type Protocol = QriProtocolName;
    type Request = Message;
    type Response = Message;

    async fn read_request<T: AsyncRead + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> Result<Self::Request> {
        read_frame(io).await
    }

    async fn read_response<T: AsyncRead + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> Result<Self::Response> {
        read_frame(io).await
    }

    async fn write_request<T: AsyncWrite + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        msg: Self::Request,
    ) -> Result<()> {
        write_frame(io, &msg).await
    }

    async fn write_response<T: AsyncWrite + Send + Unpin>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        msg: Self::Response,
    ) -> Result<()> {
        write_frame(io, &msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MT_PROFILE;
    use libp2p::PeerId;
    use profiles::ProfileId;

    #[tokio::test]
    async fn resolve_codec_round_trips_refs_and_nulls() {
        let mut codec = ResolveCodec::default();
        let name = ResolveProtocolName;
        let mut buf = Vec::new();

        let reff = Ref::new("alice", "weather");
        codec
            .write_request(&name, &mut buf, reff.clone())
            .await
            .unwrap();
        let read = codec.read_request(&name, &mut buf.as_slice()).await.unwrap();
        assert_eq!(read, reff);

        buf.clear();
        codec.write_response(&name, &mut buf, None).await.unwrap();
        let read = codec
            .read_response(&name, &mut buf.as_slice())
            .await
            .unwrap();
        assert_eq!(read, None);

        buf.clear();
        let complete = Ref {
            init_id: "InitX".into(),
            path: "/ipfs/bafyX".into(),
            ..Ref::new("alice", "weather")
        };
        codec
            .write_response(&name, &mut buf, Some(complete.clone()))
            .await
            .unwrap();
        let read = codec
            .read_response(&name, &mut buf.as_slice())
            .await
            .unwrap();
        assert_eq!(read, Some(complete));
    }

    #[tokio::test]
    async fn profile_codec_requests_are_empty_on_the_wire() {
        let mut codec = ProfileCodec::default();
        let name = ProfileProtocolName;
        let mut buf = Vec::new();
        codec
            .write_request(&name, &mut buf, ProfileRequest)
            .await
            .unwrap();
        assert!(buf.is_empty());

        let peer_id = PeerId::random();
        let profile = Profile::new(ProfileId::from_peer_id(&peer_id), "kermit");
        codec
            .write_response(&name, &mut buf, profile.clone())
            .await
            .unwrap();
        let read = codec
            .read_response(&name, &mut buf.as_slice())
            .await
            .unwrap();
        assert_eq!(read, profile);
    }

    #[tokio::test]
    async fn legacy_codec_round_trips_envelopes() {
        let mut codec = LegacyCodec::default();
        let name = QriProtocolName;
        let mut buf = Vec::new();
        let msg = Message::new(PeerId::random(), MT_PROFILE, b"{}".to_vec());
        codec.write_request(&name, &mut buf, msg.clone()).await.unwrap();
        let read = codec.read_request(&name, &mut buf.as_slice()).await.unwrap();
        assert_eq!(read, msg);
    }
}
