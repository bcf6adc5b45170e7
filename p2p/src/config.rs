use libp2p::identity::Keypair;
use libp2p::Multiaddr;
use std::time::Duration;

/// How many bootstrap peers a single pass dials at most.
pub const DEFAULT_BOOTSTRAP_PEER_LIMIT: usize = 4;

/// Everything needed to bring a node online.
#[derive(Clone)]
pub struct P2pConfig {
    /// The local user's handle, exchanged with every vetted peer.
    pub peername: String,
    /// Identity of the host. Generated when absent, which also generates
    /// a fresh profile id.
    pub keypair: Option<Keypair>,
    pub listen_addresses: Vec<Multiaddr>,
    pub bootstrap_addresses: Vec<Multiaddr>,
    pub enable_mdns: bool,
    /// Upper bound on one profile exchange, connect to response read.
    pub profile_exchange_timeout: Duration,
    /// End-to-end bound on a reference resolution fan-out.
    pub resolve_timeout: Duration,
    pub discovery_interval: Duration,
    pub bootstrap_peer_limit: usize,
    /// Above this many connections the node starts pruning unprotected
    /// peers, oldest first, down to the low-water mark. Vetted qri peers
    /// are protected and never pruned.
    pub connection_high_water: usize,
    pub connection_low_water: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            peername: "anonymous".to_owned(),
            keypair: None,
            listen_addresses: vec!["/ip4/0.0.0.0/tcp/0".parse().expect("valid multiaddr")],
            bootstrap_addresses: Vec::new(),
            enable_mdns: true,
            profile_exchange_timeout: Duration::from_secs(120),
            resolve_timeout: Duration::from_secs(60),
            discovery_interval: Duration::from_secs(5),
            bootstrap_peer_limit: DEFAULT_BOOTSTRAP_PEER_LIMIT,
            connection_high_water: 96,
            connection_low_water: 64,
        }
    }
}

impl P2pConfig {
    pub fn test(peername: &str) -> Self {
        Self {
            peername: peername.to_owned(),
            listen_addresses: vec!["/ip4/127.0.0.1/tcp/0".parse().expect("valid multiaddr")],
            enable_mdns: false,
            ..Default::default()
        }
    }
}
