//! Process-local typed publish/subscribe.
//!
//! Every state change the rest of the system cares about travels through
//! this bus: dataset lifecycle, automation runs, filesystem links, p2p
//! connectivity. The bus is hot (subscribers registered after a
//! publication miss it) and it does not queue: a slow subscriber blocks
//! the publisher, so handlers that need decoupling spawn their own task.

use dsref::VersionInfo;
use futures::future::BoxFuture;
use libp2p::{Multiaddr, PeerId};
use parking_lot::Mutex;
use profiles::{Profile, ProfileId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Everything publishable, one variant per observable topic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    DatasetNameInit,
    DatasetCommitChange,
    DatasetRename,
    DatasetDeleteAll,
    DatasetPulled,
    DatasetPushed,
    RegistryProfileCreated,
    AutomationDeployStart,
    AutomationDeployEnd,
    AutomationWorkflowStarted,
    AutomationWorkflowStopped,
    FsiCreateLink,
    FsiRemoveLink,
    P2pGoneOnline,
    P2pGoneOffline,
    P2pPeerConnected,
    P2pPeerDisconnected,
    QriPeerConnected,
    QriPeerDisconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRename {
    pub init_id: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCreated {
    pub profile_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deploy {
    pub init_id: String,
    pub workflow_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRun {
    pub init_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsiLink {
    pub init_id: String,
    pub fsi_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

#[derive(Debug, Clone)]
pub enum Payload {
    VersionInfo(Box<VersionInfo>),
    Rename(DatasetRename),
    InitId(String),
    ProfileCreated(ProfileCreated),
    Deploy(Deploy),
    WorkflowRun(WorkflowRun),
    FsiLink(FsiLink),
    Addrs(Vec<Multiaddr>),
    PeerInfo(PeerInfo),
    Profile(Box<Profile>),
    Empty,
}

/// One delivered publication. `scope` is the ambient profile the
/// publisher attached (if any); `DatasetDeleteAll` is the consumer.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    pub payload: Payload,
    pub scope: Option<ProfileId>,
}

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Inner {
    subscriptions: Mutex<HashMap<Topic, Vec<Handler>>>,
}

/// The bus handle. Cheap to clone; all clones publish into the same set
/// of subscriptions. [`Bus::nil`] produces the sentinel that accepts all
/// operations as no-ops, for tests and offline mode.
#[derive(Clone)]
pub struct Bus {
    inner: Option<Arc<Inner>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                subscriptions: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// The no-op sentinel: publishes vanish, subscriptions are dropped.
    pub fn nil() -> Self {
        Self { inner: None }
    }

    pub fn is_nil(&self) -> bool {
        self.inner.is_none()
    }

    /// Registers `handler` for each topic. Subscribing the same handler
    /// twice fires it once per registration.
    pub fn subscribe<F, Fut>(&self, topics: &[Topic], handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return,
        };
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        let mut subscriptions = inner.subscriptions.lock();
        for topic in topics {
            subscriptions
                .entry(*topic)
                .or_default()
                .push(handler.clone());
        }
    }

    /// Delivers `payload` to every subscriber of `topic`, awaiting each
    /// handler in turn. Handler errors are logged and delivery continues.
    pub async fn publish(&self, topic: Topic, payload: Payload) {
        self.deliver(Event {
            topic,
            payload,
            scope: None,
        })
        .await
    }

    /// Like [`Bus::publish`] with an ambient profile attached.
    pub async fn publish_scoped(&self, scope: ProfileId, topic: Topic, payload: Payload) {
        self.deliver(Event {
            topic,
            payload,
            scope: Some(scope),
        })
        .await
    }

    async fn deliver(&self, event: Event) {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return,
        };
        let handlers = inner
            .subscriptions
            .lock()
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler(event.clone()).await {
                tracing::warn!(topic = ?event.topic, "event handler failed: {:#}", e);
            }
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
