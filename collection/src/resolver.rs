use crate::LocalCollection;
use dsref::{Error, Ref, Resolver};

/// Resolves references against the local collection store. This is the
/// "local dataset cache" member of a node's resolver chain and backs the
/// server side of p2p reference resolution.
pub struct CollectionResolver {
    store: LocalCollection,
}

impl CollectionResolver {
    pub fn new(store: LocalCollection) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Resolver for CollectionResolver {
    async fn resolve_ref(&self, reff: &mut Ref) -> Result<(), Error> {
        match self.store.lookup_ref(&reff.username, &reff.name) {
            Some(vi) => {
                reff.profile_id = vi.profile_id;
                reff.init_id = vi.init_id;
                reff.path = vi.path;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WritableSet;
    use dsref::VersionInfo;
    use profiles::ProfileId;

    #[tokio::test]
    async fn resolves_known_refs_from_the_store() {
        let store = LocalCollection::in_memory();
        let owner = ProfileId::from_base58("3mJr7A").unwrap();
        let mut vi = VersionInfo::new("InitX", "3mJr7A", "alice", "weather");
        vi.path = "/ipfs/bafyX".to_owned();
        store.add(&owner, vec![vi]).unwrap();

        let resolver = CollectionResolver::new(store);
        let mut reff = Ref::new("alice", "weather");
        resolver.resolve_ref(&mut reff).await.unwrap();
        assert_eq!(reff.init_id, "InitX");
        assert_eq!(reff.path, "/ipfs/bafyX");
        assert_eq!(reff.profile_id, "3mJr7A");

        let mut unknown = Ref::new("alice", "nope");
        assert!(matches!(
            resolver.resolve_ref(&mut unknown).await,
            Err(Error::NotFound)
        ));
    }
}
