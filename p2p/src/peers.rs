use libp2p::{Multiaddr, PeerId};
use profiles::{Profile, ProfileId, ProfileStore};
use std::collections::HashSet;

/// The ways a caller can name the peer it wants to reach.
#[derive(Debug, Clone)]
pub enum PeerConnectionParams {
    Multiaddr(Multiaddr),
    PeerId(PeerId),
    ProfileId(ProfileId),
    Peername(String),
}

impl PeerConnectionParams {
    /// Best-effort parse of user input: multiaddr, then peer id, then
    /// profile id, falling back to a peername. Never fails; garbage just
    /// becomes a peername nobody has.
    pub fn parse(s: &str) -> Self {
        if let Ok(addr) = s.parse::<Multiaddr>() {
            return Self::Multiaddr(addr);
        }
        if let Ok(peer_id) = s.parse::<PeerId>() {
            return Self::PeerId(peer_id);
        }
        if let Ok(profile_id) = ProfileId::from_base58(s) {
            return Self::ProfileId(profile_id);
        }
        Self::Peername(s.to_owned())
    }
}

/// Composes the profile store with live connection state: either only
/// the currently vetted peers (`online_only`) or every known profile,
/// owner excluded, annotated with its online flag. A negative limit
/// lifts the bound; offset applies before limit.
pub fn list_peers(
    store: &ProfileStore,
    connected: &[Profile],
    offset: i64,
    limit: i64,
    online_only: bool,
) -> Vec<Profile> {
    let offset = offset.max(0) as usize;
    let limit = if limit < 0 { usize::MAX } else { limit as usize };

    if online_only {
        return connected.iter().skip(offset).take(limit).cloned().collect();
    }

    let owner = store.owner();
    let online: HashSet<ProfileId> = connected.iter().map(|p| p.id.clone()).collect();
    store
        .list()
        .into_iter()
        .filter(|p| p.id != owner.id)
        .map(|mut p| {
            p.online = online.contains(&p.id);
            p
        })
        .skip(offset)
        .take(limit)
        .collect()
}
