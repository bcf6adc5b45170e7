//! The swarm driver task.
//!
//! One task per online node owns the libp2p swarm and every piece of
//! per-peer state: the qri vetting state machine, in-flight reference
//! queries and the protected-connection set. Everything else talks to it
//! through [`Client`], a clonable handle over an mpsc channel, so no
//! lock is ever held across network I/O.
//!
//! Peer vetting runs Unknown → Probing → Confirmed: when the host
//! finishes identifying a peer that advertises both qri protocols, its
//! connection is protected and a profile exchange starts on a fresh
//! stream. A successful exchange stores the profile, publishes
//! `QriPeerConnected` and completes every parked waiter; failure or
//! timeout completes the waiters empty-handed and emits nothing.

use crate::behaviour::{self, speaks_qri_protocols, Behaviour};
use crate::config::P2pConfig;
use crate::peers::PeerConnectionParams;
use crate::protocols::ProfileRequest;
use crate::transport::build_transport;
use crate::wire::{Message, MT_DATASETS_LIST, MT_ERROR, MT_PROFILE};
use anyhow::anyhow;
use bus::{Bus, Payload, PeerInfo, Topic};
use dsref::{Ref, Resolver, VersionInfo};
use futures::StreamExt;
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{
    RequestId, RequestResponseEvent, RequestResponseMessage, ResponseChannel,
};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{DialError, SwarmBuilder, SwarmEvent};
use libp2p::{identify, mdns, Multiaddr, PeerId, Swarm};
use profiles::{Profile, ProfileStore};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Most datasets a single legacy list response will carry.
const LEGACY_LIST_MAX: i64 = 30;

/// How often the connection count is checked against the water marks.
const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no connected peers")]
    NoConnectedPeers,
    #[error("reference not found")]
    NotFound,
    #[error("p2p service stopped")]
    ServiceStopped,
}

/// Source of the datasets answered on the legacy `list_datasets`
/// message, usually the owner's collection.
pub trait DatasetLister: Send + Sync {
    fn list_datasets(&self, offset: i64, limit: i64) -> anyhow::Result<Vec<VersionInfo>>;
}

pub(crate) enum Request {
    WaitListening(oneshot::Sender<Vec<Multiaddr>>),
    Connect(
        PeerConnectionParams,
        oneshot::Sender<anyhow::Result<Option<Profile>>>,
    ),
    Disconnect(PeerConnectionParams, oneshot::Sender<anyhow::Result<()>>),
    Bootstrap(Vec<Multiaddr>),
    ResolveRef(Ref, oneshot::Sender<Result<Ref, ResolveError>>),
    ConnectedQriProfiles(oneshot::Sender<Vec<Profile>>),
    ConnectedPeerProfile(PeerId, oneshot::Sender<Option<Profile>>),
    ResolveResponded(ResponseChannel<Option<Ref>>, Option<Ref>),
    Shutdown,
}

/// Handle for talking to a running [`Service`]. Clones share the
/// channel; a dead service turns every call into `ServiceStopped`-style
/// errors rather than panics.
#[derive(Clone)]
pub(crate) struct Client {
    tx: mpsc::UnboundedSender<Request>,
}

impl Client {
    pub(crate) async fn wait_listening(&self) -> anyhow::Result<Vec<Multiaddr>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::WaitListening(reply))
            .map_err(|_| anyhow!("p2p service stopped"))?;
        rx.await.map_err(|_| anyhow!("p2p service stopped"))
    }

    pub(crate) async fn connect(
        &self,
        params: PeerConnectionParams,
    ) -> anyhow::Result<Option<Profile>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Connect(params, reply))
            .map_err(|_| anyhow!("p2p service stopped"))?;
        rx.await.map_err(|_| anyhow!("p2p service stopped"))?
    }

    pub(crate) async fn disconnect(&self, params: PeerConnectionParams) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Disconnect(params, reply))
            .map_err(|_| anyhow!("p2p service stopped"))?;
        rx.await.map_err(|_| anyhow!("p2p service stopped"))?
    }

    pub(crate) fn bootstrap(&self, addrs: Vec<Multiaddr>) {
        let _ = self.tx.send(Request::Bootstrap(addrs));
    }

    pub(crate) async fn resolve_ref(&self, reff: Ref) -> Result<Ref, ResolveError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::ResolveRef(reff, reply))
            .map_err(|_| ResolveError::ServiceStopped)?;
        rx.await.map_err(|_| ResolveError::ServiceStopped)?
    }

    pub(crate) async fn connected_qri_profiles(&self) -> Vec<Profile> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Request::ConnectedQriProfiles(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub(crate) async fn connected_peer_profile(&self, peer_id: PeerId) -> Option<Profile> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Request::ConnectedPeerProfile(peer_id, reply))
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
    }
}

struct ResolveQuery {
    remaining: usize,
    reply: Option<oneshot::Sender<Result<Ref, ResolveError>>>,
}

pub(crate) struct Service {
    swarm: Swarm<Behaviour>,
    bus: Bus,
    profiles: ProfileStore,
    local_resolver: Arc<dyn Resolver>,
    datasets: Option<Arc<dyn DatasetLister>>,
    cfg: P2pConfig,
    request_rx: mpsc::UnboundedReceiver<Request>,
    request_tx: mpsc::UnboundedSender<Request>,

    // qri vetting state, keyed by network peer id
    pending_probe: HashMap<RequestId, PeerId>,
    exchange_waiters: HashMap<PeerId, Vec<oneshot::Sender<Option<Profile>>>>,
    confirmed: HashMap<PeerId, Profile>,
    not_qri: HashSet<PeerId>,
    protected: HashSet<PeerId>,
    connected_since: HashMap<PeerId, Instant>,

    // reference resolution fan-outs
    queries: HashMap<u64, ResolveQuery>,
    query_of_request: HashMap<RequestId, u64>,
    next_query_id: u64,

    listeners: Vec<Multiaddr>,
    listen_waiters: Vec<oneshot::Sender<Vec<Multiaddr>>>,
}

impl Service {
    pub(crate) fn new(
        cfg: P2pConfig,
        bus: Bus,
        profiles: ProfileStore,
        local_resolver: Arc<dyn Resolver>,
        datasets: Option<Arc<dyn DatasetLister>>,
    ) -> anyhow::Result<(Self, Client)> {
        let keypair = cfg
            .keypair
            .clone()
            .unwrap_or_else(Keypair::generate_ed25519);
        let peer_id = PeerId::from(keypair.public());
        let transport = build_transport(&keypair)?;
        let behaviour = Behaviour::new(&cfg, &keypair)?;
        let mut swarm = SwarmBuilder::with_executor(transport, behaviour, peer_id, |fut| {
            tokio::spawn(fut);
        })
        .build();
        for addr in &cfg.listen_addresses {
            swarm.listen_on(addr.clone())?;
        }

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let client = Client {
            tx: request_tx.clone(),
        };
        let service = Self {
            swarm,
            bus,
            profiles,
            local_resolver,
            datasets,
            cfg,
            request_rx,
            request_tx,
            pending_probe: HashMap::new(),
            exchange_waiters: HashMap::new(),
            confirmed: HashMap::new(),
            not_qri: HashSet::new(),
            protected: HashSet::new(),
            connected_since: HashMap::new(),
            queries: HashMap::new(),
            query_of_request: HashMap::new(),
            next_query_id: 0,
            listeners: Vec::new(),
            listen_waiters: Vec::new(),
        };
        Ok((service, client))
    }

    pub(crate) async fn run(mut self) {
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event).await,
                request = self.request_rx.recv() => match request {
                    Some(Request::Shutdown) | None => break,
                    Some(request) => self.handle_request(request).await,
                },
                _ = prune.tick() => self.prune_connections(),
            }
        }
        tracing::debug!("p2p service stopping");
    }

    async fn handle_swarm_event<E>(&mut self, event: SwarmEvent<behaviour::Event, E>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(addr = %address, "listening");
                self.listeners.push(address);
                let addrs = self.announce_addrs();
                for waiter in self.listen_waiters.drain(..) {
                    let _ = waiter.send(addrs.clone());
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                endpoint,
                num_established,
                ..
            } => {
                if num_established.get() == 1 {
                    tracing::debug!(peer = %peer_id, "peer connected");
                    self.connected_since.insert(peer_id, Instant::now());
                    self.bus
                        .publish(
                            Topic::P2pPeerConnected,
                            Payload::PeerInfo(PeerInfo {
                                peer_id,
                                addrs: vec![endpoint.get_remote_address().clone()],
                            }),
                        )
                        .await;
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    tracing::debug!(peer = %peer_id, "peer disconnected");
                    self.connected_since.remove(&peer_id);
                    self.bus
                        .publish(
                            Topic::P2pPeerDisconnected,
                            Payload::PeerInfo(PeerInfo {
                                peer_id,
                                addrs: Vec::new(),
                            }),
                        )
                        .await;
                    self.handle_qri_peer_disconnect(peer_id).await;
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error } => {
                tracing::debug!(peer = ?peer_id, "outgoing connection failed: {}", error);
                if let Some(peer) = peer_id {
                    self.fail_exchange(peer);
                }
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event).await,
            _ => {}
        }
    }

    async fn handle_behaviour_event(&mut self, event: behaviour::Event) {
        match event {
            behaviour::Event::Identify(identify::Event::Received { peer_id, info }) => {
                self.qri_identity_request(peer_id, &info.protocols);
            }
            behaviour::Event::Identify(_) | behaviour::Event::Ping(_) => {}
            behaviour::Event::Mdns(mdns::Event::Discovered(discovered)) => {
                for (peer, addr) in discovered {
                    if peer != *self.swarm.local_peer_id() && !self.swarm.is_connected(&peer) {
                        tracing::debug!(peer = %peer, addr = %addr, "mdns discovered peer");
                        if let Err(e) = self
                            .swarm
                            .dial(DialOpts::peer_id(peer).addresses(vec![addr]).build())
                        {
                            tracing::debug!(peer = %peer, "mdns dial failed: {}", e);
                        }
                    }
                }
            }
            behaviour::Event::Mdns(mdns::Event::Expired(_)) => {}
            behaviour::Event::Profile(event) => self.handle_profile_event(event).await,
            behaviour::Event::Resolve(event) => self.handle_resolve_event(event),
            behaviour::Event::Legacy(event) => self.handle_legacy_event(event),
        }
    }

    /// Runs once per completed identification. Peers advertising both
    /// qri protocols get their connection protected and a profile
    /// exchange; everyone else is recorded as not-qri so they are never
    /// probed again.
    fn qri_identity_request(&mut self, peer_id: PeerId, protocols: &[String]) {
        if self.confirmed.contains_key(&peer_id) || self.pending_probe_for(&peer_id) {
            return;
        }
        if !speaks_qri_protocols(protocols) {
            if self.not_qri.insert(peer_id) {
                tracing::debug!(peer = %peer_id, "peer does not speak qri protocols");
            }
            self.fail_exchange(peer_id);
            return;
        }
        tracing::debug!(peer = %peer_id, "qri peer identified, requesting profile");
        self.protected.insert(peer_id);
        let request_id = self
            .swarm
            .behaviour_mut()
            .profile
            .send_request(&peer_id, ProfileRequest);
        self.pending_probe.insert(request_id, peer_id);
        self.exchange_waiters.entry(peer_id).or_default();
    }

    fn pending_probe_for(&self, peer_id: &PeerId) -> bool {
        self.pending_probe.values().any(|p| p == peer_id)
    }

    async fn handle_profile_event(
        &mut self,
        event: RequestResponseEvent<ProfileRequest, Profile>,
    ) {
        match event {
            RequestResponseEvent::Message { peer, message } => match message {
                RequestResponseMessage::Request { channel, .. } => {
                    tracing::debug!(peer = %peer, "answering profile exchange");
                    let own = self.own_profile();
                    let _ = self.swarm.behaviour_mut().profile.send_response(channel, own);
                }
                RequestResponseMessage::Response {
                    request_id,
                    response,
                } => {
                    self.pending_probe.remove(&request_id);
                    self.confirm_qri_peer(peer, response).await;
                }
            },
            RequestResponseEvent::OutboundFailure {
                peer,
                request_id,
                error,
            } => {
                if self.pending_probe.remove(&request_id).is_some() {
                    tracing::debug!(peer = %peer, "profile exchange failed: {}", error);
                    self.protected.remove(&peer);
                    self.fail_exchange(peer);
                }
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => {
                tracing::debug!(peer = %peer, "inbound profile exchange failed: {}", error);
            }
            RequestResponseEvent::ResponseSent { .. } => {}
        }
    }

    async fn confirm_qri_peer(&mut self, peer_id: PeerId, mut profile: Profile) {
        if !profile.peer_ids.contains(&peer_id) {
            profile.peer_ids.insert(0, peer_id);
        }
        profile.online = true;
        if let Err(e) = self.profiles.put(profile.clone()) {
            tracing::warn!(peer = %peer_id, "storing exchanged profile failed: {}", e);
        }
        tracing::info!(peer = %peer_id, peername = %profile.peername, "qri peer connected");
        self.confirmed.insert(peer_id, profile.clone());
        if let Some(waiters) = self.exchange_waiters.remove(&peer_id) {
            for waiter in waiters {
                let _ = waiter.send(Some(profile.clone()));
            }
        }
        self.bus
            .publish(Topic::QriPeerConnected, Payload::Profile(Box::new(profile)))
            .await;
    }

    /// Tears down vetting state for a fully disconnected peer. Exchanges
    /// cannot still be in flight for a confirmed peer (confirmation is
    /// the exchange finishing), so the disconnect event fires at most
    /// once per connected event.
    async fn handle_qri_peer_disconnect(&mut self, peer_id: PeerId) {
        self.protected.remove(&peer_id);
        self.fail_exchange(peer_id);
        if let Some(profile) = self.confirmed.remove(&peer_id) {
            tracing::info!(peer = %peer_id, peername = %profile.peername, "qri peer disconnected");
            self.bus
                .publish(
                    Topic::QriPeerDisconnected,
                    Payload::Profile(Box::new(profile)),
                )
                .await;
        }
    }

    fn fail_exchange(&mut self, peer_id: PeerId) {
        if let Some(waiters) = self.exchange_waiters.remove(&peer_id) {
            for waiter in waiters {
                let _ = waiter.send(None);
            }
        }
    }

    fn handle_resolve_event(&mut self, event: RequestResponseEvent<Ref, Option<Ref>>) {
        match event {
            RequestResponseEvent::Message { peer, message } => match message {
                RequestResponseMessage::Request {
                    request, channel, ..
                } => {
                    tracing::debug!(peer = %peer, reff = %request, "resolving reference for peer");
                    let resolver = self.local_resolver.clone();
                    let forward = self.request_tx.clone();
                    // local resolution may hit disk; keep it off the
                    // service loop and forward the answer back in
                    tokio::spawn(async move {
                        let mut reff = request;
                        let resolved = match resolver.resolve_ref(&mut reff).await {
                            Ok(()) => Some(reff),
                            Err(_) => None,
                        };
                        let _ = forward.send(Request::ResolveResponded(channel, resolved));
                    });
                }
                RequestResponseMessage::Response {
                    request_id,
                    response,
                } => self.complete_resolve(request_id, response),
            },
            RequestResponseEvent::OutboundFailure {
                peer,
                request_id,
                error,
            } => {
                tracing::debug!(peer = %peer, "resolve request failed: {}", error);
                self.complete_resolve(request_id, None);
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => {
                tracing::debug!(peer = %peer, "inbound resolve failed: {}", error);
            }
            RequestResponseEvent::ResponseSent { .. } => {}
        }
    }

    fn complete_resolve(&mut self, request_id: RequestId, response: Option<Ref>) {
        let query_id = match self.query_of_request.remove(&request_id) {
            Some(query_id) => query_id,
            None => return,
        };
        let query = match self.queries.get_mut(&query_id) {
            Some(query) => query,
            None => return,
        };
        query.remaining -= 1;
        if let Some(reff) = response {
            if let Some(reply) = query.reply.take() {
                // first complete answer wins; late responses drain into
                // the counter and are discarded
                let _ = reply.send(Ok(reff));
            }
        }
        if query.remaining == 0 {
            if let Some(reply) = self.queries.remove(&query_id).and_then(|q| q.reply) {
                let _ = reply.send(Err(ResolveError::NotFound));
            }
        }
    }

    fn handle_legacy_event(&mut self, event: RequestResponseEvent<Message, Message>) {
        match event {
            RequestResponseEvent::Message { peer, message } => match message {
                RequestResponseMessage::Request {
                    request, channel, ..
                } => {
                    tracing::debug!(peer = %peer, type_ = %request.type_, "legacy qri message");
                    let response =
                        legacy_response(self.own_profile(), self.datasets.as_deref(), &request);
                    let _ = self
                        .swarm
                        .behaviour_mut()
                        .legacy
                        .send_response(channel, response);
                }
                RequestResponseMessage::Response { .. } => {}
            },
            RequestResponseEvent::OutboundFailure { peer, error, .. } => {
                tracing::debug!(peer = %peer, "legacy request failed: {}", error);
            }
            RequestResponseEvent::InboundFailure { peer, error, .. } => {
                tracing::debug!(peer = %peer, "inbound legacy request failed: {}", error);
            }
            RequestResponseEvent::ResponseSent { .. } => {}
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::WaitListening(reply) => {
                if self.listeners.is_empty() {
                    self.listen_waiters.push(reply);
                } else {
                    let _ = reply.send(self.announce_addrs());
                }
            }
            Request::Connect(params, reply) => self.handle_connect(params, reply),
            Request::Disconnect(params, reply) => {
                let _ = reply.send(self.handle_disconnect(params));
            }
            Request::Bootstrap(addrs) => self.bootstrap(addrs),
            Request::ResolveRef(reff, reply) => self.start_resolve(reff, reply),
            Request::ConnectedQriProfiles(reply) => {
                let _ = reply.send(self.confirmed.values().cloned().collect());
            }
            Request::ConnectedPeerProfile(peer_id, reply) => {
                let _ = reply.send(self.confirmed.get(&peer_id).cloned());
            }
            Request::ResolveResponded(channel, resolved) => {
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .resolve
                    .send_response(channel, resolved);
            }
            Request::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    fn handle_connect(
        &mut self,
        params: PeerConnectionParams,
        reply: oneshot::Sender<anyhow::Result<Option<Profile>>>,
    ) {
        let (peer_id, addrs) = match self.resolve_params(&params) {
            Ok(target) => target,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let peer_id = match peer_id {
            Some(peer_id) => peer_id,
            None => {
                // a bare multiaddr: dial and report, there is no peer to
                // key an exchange waiter on
                for addr in addrs {
                    if let Err(e) = self.swarm.dial(addr.clone()) {
                        let _ = reply.send(Err(anyhow!("dialing {}: {}", addr, e)));
                        return;
                    }
                }
                let _ = reply.send(Ok(None));
                return;
            }
        };

        if let Some(profile) = self.confirmed.get(&peer_id) {
            let _ = reply.send(Ok(Some(profile.clone())));
            return;
        }
        let opts = if addrs.is_empty() {
            DialOpts::peer_id(peer_id).build()
        } else {
            DialOpts::peer_id(peer_id).addresses(addrs).build()
        };
        match self.swarm.dial(opts) {
            Ok(()) => {}
            // already connected or mid-dial; identification will still
            // complete the waiter below
            Err(DialError::DialPeerConditionFalse(_)) => {}
            Err(e) => {
                let _ = reply.send(Err(anyhow!("dialing {}: {}", peer_id, e)));
                return;
            }
        }
        // identification and the profile exchange complete the waiter
        let (tx, rx) = oneshot::channel();
        self.exchange_waiters.entry(peer_id).or_default().push(tx);
        tokio::spawn(async move {
            let profile = rx.await.ok().flatten();
            let _ = reply.send(Ok(profile));
        });
    }

    fn handle_disconnect(&mut self, params: PeerConnectionParams) -> anyhow::Result<()> {
        let (peer_id, _) = self.resolve_params(&params)?;
        let peer_id = peer_id.ok_or_else(|| anyhow!("disconnect needs a peer identity"))?;
        if self.swarm.disconnect_peer_id(peer_id).is_err() {
            tracing::debug!(peer = %peer_id, "disconnect requested for unconnected peer");
        }
        Ok(())
    }

    /// Maps connection parameters onto a dialable peer. Profile ids and
    /// peernames go through the profile store.
    fn resolve_params(
        &self,
        params: &PeerConnectionParams,
    ) -> anyhow::Result<(Option<PeerId>, Vec<Multiaddr>)> {
        match params {
            PeerConnectionParams::Multiaddr(addr) => {
                Ok((peer_id_from_multiaddr(addr), vec![addr.clone()]))
            }
            PeerConnectionParams::PeerId(peer_id) => Ok((Some(*peer_id), Vec::new())),
            PeerConnectionParams::ProfileId(profile_id) => {
                let profile = self
                    .profiles
                    .profile(profile_id)
                    .map_err(|_| anyhow!("no profile with id {}", profile_id))?;
                let peer_id = profile
                    .peer_ids
                    .first()
                    .copied()
                    .ok_or_else(|| anyhow!("profile {} has no known peer ids", profile_id))?;
                Ok((Some(peer_id), profile.network_addrs.clone()))
            }
            PeerConnectionParams::Peername(peername) => {
                let profile_id = self
                    .profiles
                    .peername_id(peername)
                    .map_err(|_| anyhow!("no profile named {:?}", peername))?;
                self.resolve_params(&PeerConnectionParams::ProfileId(profile_id))
            }
        }
    }

    /// Dials a random subset of the bootstrap peers. Dial failures are
    /// logged and dropped; the next bootstrap round retries.
    fn bootstrap(&mut self, addrs: Vec<Multiaddr>) {
        let own = *self.swarm.local_peer_id();
        let mut by_peer: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
        let mut anonymous = Vec::new();
        for addr in addrs {
            match peer_id_from_multiaddr(&addr) {
                Some(peer) if peer == own => {}
                Some(peer) => by_peer.entry(peer).or_default().push(addr),
                None => anonymous.push(addr),
            }
        }

        let mut peers: Vec<(PeerId, Vec<Multiaddr>)> = by_peer.into_iter().collect();
        peers.shuffle(&mut rand::thread_rng());
        for (peer, addrs) in peers.into_iter().take(self.cfg.bootstrap_peer_limit) {
            tracing::debug!(peer = %peer, "bootstrap dialing");
            if let Err(e) = self
                .swarm
                .dial(DialOpts::peer_id(peer).addresses(addrs).build())
            {
                tracing::debug!(peer = %peer, "bootstrap dial failed: {}", e);
            }
        }
        for addr in anonymous {
            if let Err(e) = self.swarm.dial(addr.clone()) {
                tracing::debug!(addr = %addr, "bootstrap dial failed: {}", e);
            }
        }
    }

    fn start_resolve(&mut self, reff: Ref, reply: oneshot::Sender<Result<Ref, ResolveError>>) {
        if self.confirmed.is_empty() {
            let _ = reply.send(Err(ResolveError::NoConnectedPeers));
            return;
        }
        let query_id = self.next_query_id;
        self.next_query_id += 1;
        let peers: Vec<PeerId> = self.confirmed.keys().copied().collect();
        tracing::debug!(reff = %reff, peers = peers.len(), "resolving reference over p2p");
        for peer in &peers {
            let request_id = self
                .swarm
                .behaviour_mut()
                .resolve
                .send_request(peer, reff.clone());
            self.query_of_request.insert(request_id, query_id);
        }
        self.queries.insert(
            query_id,
            ResolveQuery {
                remaining: peers.len(),
                reply: Some(reply),
            },
        );
    }

    /// Disconnects the oldest unprotected peers once the connection
    /// count crosses the high-water mark, stopping at the low-water
    /// mark. Protection keeps vetted qri peers out of the candidate set
    /// entirely.
    fn prune_connections(&mut self) {
        let connected = self.connected_since.len();
        if connected <= self.cfg.connection_high_water {
            return;
        }
        let mut candidates: Vec<(PeerId, Instant)> = self
            .connected_since
            .iter()
            .filter(|(peer, _)| !self.protected.contains(peer))
            .map(|(peer, since)| (*peer, *since))
            .collect();
        candidates.sort_by_key(|(_, since)| *since);
        let excess = connected - self.cfg.connection_low_water;
        tracing::info!(
            connected,
            pruning = excess.min(candidates.len()),
            "over the connection high-water mark"
        );
        for (peer, _) in candidates.into_iter().take(excess) {
            let _ = self.swarm.disconnect_peer_id(peer);
        }
    }

    /// The owner's profile as the network should see it right now.
    fn own_profile(&self) -> Profile {
        let mut profile = self.profiles.owner();
        let local = *self.swarm.local_peer_id();
        if !profile.peer_ids.contains(&local) {
            profile.peer_ids.insert(0, local);
        }
        profile.network_addrs = self.listeners.clone();
        profile.online = true;
        profile
    }

    /// Listen addresses encapsulated with our peer id, the shape peers
    /// can dial directly.
    fn announce_addrs(&self) -> Vec<Multiaddr> {
        let peer_id = *self.swarm.local_peer_id();
        self.listeners
            .iter()
            .map(|addr| addr.clone().with(Protocol::P2p(peer_id.into())))
            .collect()
    }
}

/// Answers the deprecated top-level protocol: `profile` and
/// `list_datasets` still work, anything else gets a single diagnostic
/// message before the stream closes.
fn legacy_response(own: Profile, datasets: Option<&dyn DatasetLister>, msg: &Message) -> Message {
    match msg.type_.as_str() {
        MT_PROFILE => {
            let body = serde_json::to_vec(&own).unwrap_or_default();
            msg.update(body)
        }
        MT_DATASETS_LIST => {
            let offset = header_int(msg, "offset", 0);
            let limit = header_int(msg, "limit", LEGACY_LIST_MAX);
            let items = match datasets {
                Some(lister) => lister.list_datasets(offset, limit).unwrap_or_default(),
                None => Vec::new(),
            };
            msg.update(serde_json::to_vec(&items).unwrap_or_default())
        }
        other => {
            let mut reply =
                msg.update(format!("unsupported message type {:?}", other).into_bytes());
            reply.type_ = MT_ERROR.to_owned();
            reply
        }
    }
}

fn header_int(msg: &Message, key: &str, default: i64) -> i64 {
    msg.headers
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn peer_id_from_multiaddr(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|proto| match proto {
        Protocol::P2p(hash) => PeerId::from_multihash(hash).ok(),
        _ => None,
    })
}
