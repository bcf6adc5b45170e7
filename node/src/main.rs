use anyhow::Context;
use bus::Bus;
use collection::{CollectionResolver, LocalCollection, Set, SetMaintainer};
use dsref::{SequentialResolver, VersionInfo};
use libp2p::identity::Keypair;
use libp2p::Multiaddr;
use p2p::{DatasetLister, Node, P2pConfig};
use profiles::{Profile, ProfileId, ProfileStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use structopt::StructOpt;
use util::params::List;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "qri-node",
    about = "peer-to-peer node for decentralized dataset version control",
    rename_all = "kebab-case"
)]
struct Opts {
    /// Path where the node stores its identity, profiles and
    /// collections. Defaults to <current working dir>/qri-data
    #[structopt(long, env = "QRI_PATH")]
    repo: Option<PathBuf>,

    /// The handle announced to other peers
    #[structopt(long, default_value = "anonymous")]
    peername: String,

    /// Multiaddresses to listen on
    #[structopt(long)]
    listen: Vec<Multiaddr>,

    /// Peers to dial right after going online
    #[structopt(long)]
    bootstrap: Vec<Multiaddr>,

    /// Turn off mdns discovery on the local network
    #[structopt(long)]
    no_mdns: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    util::setup_logger();
    let (panic_tx, panic_rx) = tokio::sync::mpsc::unbounded_channel();
    init_panic_hook(panic_tx);
    let opts = Opts::from_args();
    run(opts, panic_rx).await
}

/// Installs a global panic hook triggered by any panic in any task or
/// thread of this process. The panic and its backtrace are logged and
/// `tx` is notified so the main loop can bring the node down; without
/// this, a panic inside a spawned task would unwind and silently kill
/// just that task while the rest of the node keeps running.
fn init_panic_hook(tx: tokio::sync::mpsc::UnboundedSender<String>) {
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = backtrace::Backtrace::new();

        let thread = std::thread::current();
        let thread = thread.name().unwrap_or("unnamed");

        let msg = match info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &**s,
                None => "Box<Any>",
            },
        };
        let message = match info.location() {
            Some(location) => format!(
                "thread '{}' panicked at '{}': {}:{}{:?}",
                thread,
                msg,
                location.file(),
                location.line(),
                backtrace
            ),
            None => format!("thread '{}' panicked at '{}'{:?}", thread, msg, backtrace),
        };
        tracing::error!(target: "panic", "{}", message);
        let _ = tx.send(message);
    }));
}

async fn run(
    opts: Opts,
    mut panic_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
) -> anyhow::Result<()> {
    let repo = match opts.repo {
        Some(repo) => repo,
        None => std::env::current_dir()
            .context("finding the working directory")?
            .join("qri-data"),
    };
    std::fs::create_dir_all(&repo).with_context(|| format!("creating {}", repo.display()))?;

    let keypair = load_or_create_keypair(&repo.join("identity.key"))?;
    let peer_id = keypair.public().to_peer_id();
    let owner =
        Profile::new(ProfileId::from_peer_id(&peer_id), opts.peername.clone()).with_peer_id(peer_id);
    tracing::info!(peername = %owner.peername, profile = %owner.id, "starting node");

    let profiles = ProfileStore::open(&repo, owner.clone())?;
    let bus = Bus::new();
    let collections = LocalCollection::open(repo.join("collections"))?;
    SetMaintainer::attach(&bus, collections.clone());

    let local_resolver = Arc::new(SequentialResolver::new(vec![Arc::new(
        CollectionResolver::new(collections.clone()),
    )]));
    let datasets: Arc<dyn DatasetLister> = Arc::new(OwnerDatasets {
        store: collections,
        owner: owner.id,
    });

    let mut cfg = P2pConfig {
        peername: opts.peername,
        keypair: Some(keypair),
        bootstrap_addresses: opts.bootstrap,
        enable_mdns: !opts.no_mdns,
        ..Default::default()
    };
    if !opts.listen.is_empty() {
        cfg.listen_addresses = opts.listen;
    }

    let node = Arc::new(Node::new(cfg, bus, profiles, local_resolver, Some(datasets)));
    let addrs = node.go_online().await?;
    for addr in &addrs {
        tracing::info!(addr = %addr, "reachable at");
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("shutting down");
            node.go_offline().await
        }
        message = panic_rx.recv() => {
            let message = message.unwrap_or_else(|| "panic hook gone".to_owned());
            // best-effort teardown before reporting the crash
            let _ = node.go_offline().await;
            Err(anyhow::anyhow!("shutting down after panic: {}", message))
        }
    }
}

/// Loads the host identity, creating and persisting one on first boot.
fn load_or_create_keypair(path: &Path) -> anyhow::Result<Keypair> {
    if path.exists() {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return Keypair::from_protobuf_encoding(&bytes)
            .with_context(|| format!("decoding {}", path.display()));
    }
    let keypair = Keypair::generate_ed25519();
    let bytes = keypair
        .to_protobuf_encoding()
        .context("encoding fresh identity")?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(keypair)
}

/// The owner's collection, as served on the legacy datasets-list
/// message.
struct OwnerDatasets {
    store: LocalCollection,
    owner: ProfileId,
}

impl DatasetLister for OwnerDatasets {
    fn list_datasets(&self, offset: i64, limit: i64) -> anyhow::Result<Vec<VersionInfo>> {
        let params = List::list_all().with_offset_limit(offset.max(0), limit.max(-1));
        match self.store.list(&self.owner, &params) {
            Ok(items) => Ok(items),
            // a fresh node has no collection yet; an empty list is the
            // honest answer
            Err(collection::Error::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
