//! The qri p2p layer.
//!
//! A node joins a general content-addressed overlay and finds the peers
//! that speak qri within it: every completed identification is checked
//! for the qri protocols, vetted peers exchange profiles and get their
//! connections protected, and the set of vetted peers backs reference
//! resolution and peer listing. Connectivity changes surface as bus
//! events so the rest of the system never polls the network.

mod behaviour;
mod config;
mod node;
mod peers;
mod protocols;
mod resolver;
mod service;
mod transport;
pub mod wire;

pub use config::P2pConfig;
pub use node::Node;
pub use peers::{list_peers, PeerConnectionParams};
pub use protocols::{PROFILE_PROTOCOL_ID, QRI_PROTOCOL_ID, RESOLVE_PROTOCOL_ID};
pub use resolver::P2pResolver;
pub use service::{DatasetLister, ResolveError};
