use crate::config::P2pConfig;
use crate::peers::{self, PeerConnectionParams};
use crate::resolver::P2pResolver;
use crate::service::{Client, DatasetLister, Service};
use bus::{Bus, Payload, Topic};
use dsref::Resolver;
use libp2p::{Multiaddr, PeerId};
use profiles::{Profile, ProfileStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct OnlineState {
    client: Client,
    task: JoinHandle<()>,
    addrs: Vec<Multiaddr>,
}

/// The p2p node: host lifecycle and the operations other subsystems call
/// into. The node owns a command channel to the service task; the
/// service owns the swarm. Everything here is safe to call from any
/// task.
pub struct Node {
    cfg: P2pConfig,
    bus: Bus,
    profiles: ProfileStore,
    local_resolver: Arc<dyn Resolver>,
    datasets: Option<Arc<dyn DatasetLister>>,
    online: Mutex<Option<OnlineState>>,
}

impl Node {
    pub fn new(
        cfg: P2pConfig,
        bus: Bus,
        profiles: ProfileStore,
        local_resolver: Arc<dyn Resolver>,
        datasets: Option<Arc<dyn DatasetLister>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            profiles,
            local_resolver,
            datasets,
            online: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &P2pConfig {
        &self.cfg
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Brings the host up: transport, stream handlers, listeners.
    /// Publishes `P2PGoneOnline` with the announce addresses once the
    /// listeners are bound, then dials the configured bootstrap peers.
    /// Calling this on a node that is already online returns the
    /// existing addresses.
    pub async fn go_online(self: &Arc<Self>) -> anyhow::Result<Vec<Multiaddr>> {
        let mut online = self.online.lock().await;
        if let Some(state) = online.as_ref() {
            return Ok(state.addrs.clone());
        }

        let (service, client) = Service::new(
            self.cfg.clone(),
            self.bus.clone(),
            self.profiles.clone(),
            self.local_resolver.clone(),
            self.datasets.clone(),
        )?;
        let task = tokio::spawn(service.run());
        let addrs = client.wait_listening().await?;

        if !self.cfg.bootstrap_addresses.is_empty() {
            client.bootstrap(self.cfg.bootstrap_addresses.clone());
        }

        *online = Some(OnlineState {
            client,
            task,
            addrs: addrs.clone(),
        });
        drop(online);

        self.bus
            .publish(Topic::P2pGoneOnline, Payload::Addrs(addrs.clone()))
            .await;
        Ok(addrs)
    }

    /// Stops the service task, closing the host and every connection.
    /// A second call is a no-op.
    pub async fn go_offline(&self) -> anyhow::Result<()> {
        let state = self.online.lock().await.take();
        if let Some(state) = state {
            state.client.shutdown();
            let _ = state.task.await;
            self.bus.publish(Topic::P2pGoneOffline, Payload::Empty).await;
        }
        Ok(())
    }

    pub async fn is_online(&self) -> bool {
        self.online.lock().await.is_some()
    }

    /// The addresses peers can dial, empty when offline.
    pub async fn announce_addrs(&self) -> Vec<Multiaddr> {
        self.online
            .lock()
            .await
            .as_ref()
            .map(|s| s.addrs.clone())
            .unwrap_or_default()
    }

    /// Dials additional bootstrap addresses on top of the configured
    /// set.
    pub async fn bootstrap(&self, addrs: Vec<Multiaddr>) -> anyhow::Result<()> {
        let client = self.client().await.ok_or_else(offline)?;
        client.bootstrap(addrs);
        Ok(())
    }

    /// Connects to a peer named by any of the connection parameters and
    /// waits for qri identification. Returns the exchanged profile, or
    /// `None` when the peer turned out not to speak qri.
    pub async fn connect_to_peer(
        &self,
        params: PeerConnectionParams,
    ) -> anyhow::Result<Option<Profile>> {
        let client = self.client().await.ok_or_else(offline)?;
        tokio::time::timeout(self.cfg.profile_exchange_timeout, client.connect(params))
            .await
            .map_err(|_| anyhow::anyhow!("connecting to peer timed out"))?
    }

    /// Closes all connections to the resolved peer.
    pub async fn disconnect_from_peer(&self, params: PeerConnectionParams) -> anyhow::Result<()> {
        let client = self.client().await.ok_or_else(offline)?;
        client.disconnect(params).await
    }

    /// Profiles of every currently vetted qri peer.
    pub async fn connected_qri_profiles(&self) -> Vec<Profile> {
        match self.client().await {
            Some(client) => client.connected_qri_profiles().await,
            None => Vec::new(),
        }
    }

    pub async fn connected_peer_profile(&self, peer_id: PeerId) -> Option<Profile> {
        match self.client().await {
            Some(client) => client.connected_peer_profile(peer_id).await,
            None => None,
        }
    }

    /// Known peers from the profile store combined with live connection
    /// state. See [`peers::list_peers`].
    pub async fn list_peers(&self, offset: i64, limit: i64, online_only: bool) -> Vec<Profile> {
        let connected = self.connected_qri_profiles().await;
        peers::list_peers(&self.profiles, &connected, offset, limit, online_only)
    }

    /// A resolver that fans out over this node's connected qri peers.
    pub fn resolver(self: &Arc<Self>) -> P2pResolver {
        P2pResolver::new(self.clone())
    }

    pub(crate) async fn client(&self) -> Option<Client> {
        self.online.lock().await.as_ref().map(|s| s.client.clone())
    }
}

fn offline() -> anyhow::Error {
    anyhow::anyhow!("node is not online")
}
