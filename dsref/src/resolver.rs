use crate::{Error, Ref};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;

/// Anything that can complete the missing fields of a dataset reference.
///
/// Implementations fill in `profile_id`, `init_id` and `path` in place and
/// return [`Error::NotFound`] when the reference is unknown to them.
/// Cancellation is by dropping the returned future.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve_ref(&self, reff: &mut Ref) -> Result<(), Error>;
}

/// Consults resolvers one after another, first hit wins.
///
/// [`Error::NotFound`] moves on to the next resolver; any other error
/// aborts the chain.
pub struct SequentialResolver {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl SequentialResolver {
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>) -> Self {
        Self { resolvers }
    }
}

#[async_trait::async_trait]
impl Resolver for SequentialResolver {
    async fn resolve_ref(&self, reff: &mut Ref) -> Result<(), Error> {
        for resolver in &self.resolvers {
            match resolver.resolve_ref(reff).await {
                Ok(()) => return Ok(()),
                Err(Error::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound)
    }
}

/// Races resolvers concurrently, first completed answer wins. Losers are
/// dropped, which cancels their outstanding work.
pub struct ParallelResolver {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl ParallelResolver {
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>) -> Self {
        Self { resolvers }
    }
}

#[async_trait::async_trait]
impl Resolver for ParallelResolver {
    async fn resolve_ref(&self, reff: &mut Ref) -> Result<(), Error> {
        let mut pending = self
            .resolvers
            .iter()
            .map(|resolver| {
                let resolver = resolver.clone();
                let mut candidate = reff.clone();
                async move {
                    let outcome = resolver.resolve_ref(&mut candidate).await;
                    (candidate, outcome)
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut first_failure = None;
        while let Some((candidate, outcome)) = pending.next().await {
            match outcome {
                Ok(()) => {
                    *reff = candidate;
                    return Ok(());
                }
                Err(Error::NotFound) => {}
                Err(e) => first_failure = first_failure.or(Some(e)),
            }
        }
        Err(first_failure.unwrap_or(Error::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        init_id: &'static str,
    }

    #[async_trait::async_trait]
    impl Resolver for Fixed {
        async fn resolve_ref(&self, reff: &mut Ref) -> Result<(), Error> {
            reff.init_id = self.init_id.to_owned();
            reff.path = "/ipfs/QmHead".to_owned();
            Ok(())
        }
    }

    struct Empty;

    #[async_trait::async_trait]
    impl Resolver for Empty {
        async fn resolve_ref(&self, _reff: &mut Ref) -> Result<(), Error> {
            Err(Error::NotFound)
        }
    }

    #[tokio::test]
    async fn sequential_takes_the_first_hit() {
        let chain = SequentialResolver::new(vec![
            Arc::new(Empty),
            Arc::new(Fixed { init_id: "second" }),
            Arc::new(Fixed { init_id: "third" }),
        ]);
        let mut reff = Ref::new("alice", "weather");
        chain.resolve_ref(&mut reff).await.unwrap();
        assert_eq!(reff.init_id, "second");
    }

    #[tokio::test]
    async fn sequential_reports_not_found() {
        let chain = SequentialResolver::new(vec![Arc::new(Empty), Arc::new(Empty)]);
        let mut reff = Ref::new("alice", "weather");
        assert!(matches!(
            chain.resolve_ref(&mut reff).await,
            Err(Error::NotFound)
        ));
        assert!(!reff.is_complete());
    }

    #[tokio::test]
    async fn parallel_returns_a_completed_candidate() {
        let race = ParallelResolver::new(vec![
            Arc::new(Empty),
            Arc::new(Fixed { init_id: "winner" }),
        ]);
        let mut reff = Ref::new("alice", "weather");
        race.resolve_ref(&mut reff).await.unwrap();
        assert_eq!(reff.init_id, "winner");
        assert!(reff.is_complete());
    }
}
