use crate::config::P2pConfig;
use crate::protocols::{
    LegacyCodec, ProfileCodec, ProfileProtocolName, ProfileRequest, QriProtocolName,
    ResolveCodec, ResolveProtocolName, QRI_PROTOCOL_ID,
};
use crate::wire::Message;
use dsref::Ref;
use libp2p::identity::Keypair;
use libp2p::request_response::{
    ProtocolSupport, RequestResponse, RequestResponseConfig, RequestResponseEvent,
};
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::NetworkBehaviour;
use libp2p::{identify, mdns, ping};
use profiles::Profile;
use std::iter;

/// Everything this node speaks on a connection: liveness and identity
/// probing plus the three qri request/response protocols. mdns is
/// toggled by configuration.
#[derive(NetworkBehaviour)]
#[behaviour(out_event = "Event")]
pub struct Behaviour {
    pub ping: ping::Behaviour,
    pub identify: identify::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    pub legacy: RequestResponse<LegacyCodec>,
    pub profile: RequestResponse<ProfileCodec>,
    pub resolve: RequestResponse<ResolveCodec>,
}

impl Behaviour {
    pub fn new(cfg: &P2pConfig, keypair: &Keypair) -> anyhow::Result<Self> {
        let identify = identify::Behaviour::new(
            identify::Config::new(QRI_PROTOCOL_ID.to_owned(), keypair.public())
                .with_agent_version(format!("qri-node/{}", env!("CARGO_PKG_VERSION"))),
        );
        // keep-alive pings so idle but vetted connections survive
        let ping = ping::Behaviour::new(ping::Config::new().with_keep_alive(true));

        let mdns = if cfg.enable_mdns {
            let mdns_cfg = mdns::Config {
                query_interval: cfg.discovery_interval,
                ..Default::default()
            };
            Some(mdns::tokio::Behaviour::new(mdns_cfg)?)
        } else {
            None
        };

        let mut profile_cfg = RequestResponseConfig::default();
        profile_cfg.set_request_timeout(cfg.profile_exchange_timeout);
        let mut resolve_cfg = RequestResponseConfig::default();
        resolve_cfg.set_request_timeout(cfg.resolve_timeout);
        let legacy_cfg = RequestResponseConfig::default();

        Ok(Self {
            ping,
            identify,
            mdns: Toggle::from(mdns),
            legacy: RequestResponse::new(
                LegacyCodec::default(),
                iter::once((QriProtocolName, ProtocolSupport::Full)),
                legacy_cfg,
            ),
            profile: RequestResponse::new(
                ProfileCodec::default(),
                iter::once((ProfileProtocolName, ProtocolSupport::Full)),
                profile_cfg,
            ),
            resolve: RequestResponse::new(
                ResolveCodec::default(),
                iter::once((ResolveProtocolName, ProtocolSupport::Full)),
                resolve_cfg,
            ),
        })
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum Event {
    Ping(ping::Event),
    Identify(identify::Event),
    Mdns(mdns::Event),
    Legacy(RequestResponseEvent<Message, Message>),
    Profile(RequestResponseEvent<ProfileRequest, Profile>),
    Resolve(RequestResponseEvent<Ref, Option<Ref>>),
}

impl From<ping::Event> for Event {
    fn from(e: ping::Event) -> Self {
        Self::Ping(e)
    }
}

impl From<identify::Event> for Event {
    fn from(e: identify::Event) -> Self {
        Self::Identify(e)
    }
}

impl From<mdns::Event> for Event {
    fn from(e: mdns::Event) -> Self {
        Self::Mdns(e)
    }
}

impl From<RequestResponseEvent<Message, Message>> for Event {
    fn from(e: RequestResponseEvent<Message, Message>) -> Self {
        Self::Legacy(e)
    }
}

impl From<RequestResponseEvent<ProfileRequest, Profile>> for Event {
    fn from(e: RequestResponseEvent<ProfileRequest, Profile>) -> Self {
        Self::Profile(e)
    }
}

impl From<RequestResponseEvent<Ref, Option<Ref>>> for Event {
    fn from(e: RequestResponseEvent<Ref, Option<Ref>>) -> Self {
        Self::Resolve(e)
    }
}

/// True iff an identified peer advertises both protocols a qri peer must
/// speak: the top-level protocol and profile exchange.
pub fn speaks_qri_protocols(protocols: &[String]) -> bool {
    let qri = protocols.iter().any(|p| p == QRI_PROTOCOL_ID);
    let profile = protocols
        .iter()
        .any(|p| p == crate::protocols::PROFILE_PROTOCOL_ID);
    qri && profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qri_peers_need_both_protocols() {
        let both = vec![
            QRI_PROTOCOL_ID.to_owned(),
            crate::protocols::PROFILE_PROTOCOL_ID.to_owned(),
            "/ipfs/id/1.0.0".to_owned(),
        ];
        assert!(speaks_qri_protocols(&both));

        let only_top = vec![QRI_PROTOCOL_ID.to_owned()];
        assert!(!speaks_qri_protocols(&only_top));

        let unrelated = vec!["/ipfs/id/1.0.0".to_owned()];
        assert!(!speaks_qri_protocols(&unrelated));
    }
}
