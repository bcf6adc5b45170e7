use crate::node::Node;
use crate::service::ResolveError;
use dsref::{Error, Ref, Resolver};
use std::sync::Arc;
use std::time::Duration;

/// Resolves references by asking every connected qri peer at once.
///
/// The first peer that answers with a completed ref wins; peers that
/// answer "nothing" count down towards [`Error::NotFound`]. The whole
/// fan-out shares one deadline. With no vetted peers the resolver fails
/// fast so chains can move on to their next member.
pub struct P2pResolver {
    node: Arc<Node>,
    timeout: Duration,
}

impl P2pResolver {
    pub fn new(node: Arc<Node>) -> Self {
        let timeout = node.config().resolve_timeout;
        Self { node, timeout }
    }
}

#[async_trait::async_trait]
impl Resolver for P2pResolver {
    async fn resolve_ref(&self, reff: &mut Ref) -> Result<(), Error> {
        let client = self
            .node
            .client()
            .await
            .ok_or_else(|| Error::Other(anyhow::anyhow!("node is not online")))?;
        match tokio::time::timeout(self.timeout, client.resolve_ref(reff.clone())).await {
            Err(_elapsed) => Err(Error::Timeout),
            Ok(Ok(resolved)) => {
                *reff = resolved;
                Ok(())
            }
            Ok(Err(ResolveError::NotFound)) => Err(Error::NotFound),
            Ok(Err(e)) => Err(Error::Other(anyhow::Error::new(e))),
        }
    }
}
