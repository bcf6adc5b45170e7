use anyhow::Context;
use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade;
use libp2p::dns::TokioDnsConfig;
use libp2p::identity::Keypair;
use libp2p::noise::NoiseAuthenticated;
use libp2p::tcp;
use libp2p::yamux::YamuxConfig;
use libp2p::{PeerId, Transport};
use std::io;
use std::time::Duration;

/// Builds the transport that serves as a common ground for all
/// connections: tcp with dns resolution, noise encryption, yamux
/// multiplexing.
pub fn build_transport(keypair: &Keypair) -> anyhow::Result<Boxed<(PeerId, StreamMuxerBox)>> {
    let tcp = tcp::tokio::Transport::new(tcp::Config::new().nodelay(true));
    let base = TokioDnsConfig::system(tcp).context("creating dns-aware tcp transport")?;
    let noise = NoiseAuthenticated::xx(keypair).context("creating noise keys")?;
    let transport = base
        .upgrade(upgrade::Version::V1)
        .authenticate(noise)
        .multiplex(YamuxConfig::default())
        .timeout(Duration::from_secs(20))
        .map(|(peer_id, muxer), _| (peer_id, StreamMuxerBox::new(muxer)))
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
        .boxed();
    Ok(transport)
}
