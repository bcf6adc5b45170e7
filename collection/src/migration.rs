//! One-shot construction of a collection from a legacy repository.
//!
//! Older repos stored one reference file per dataset instead of a
//! collection. On first boot against such a repo the owner's collection
//! is assembled from the legacy reference list, the logbook and the head
//! versions. The presence of the collections directory marks migration
//! as done; it never runs twice.

use crate::{Error, LocalCollection, WritableSet};
use chrono::{DateTime, Utc};
use dsref::VersionInfo;
use profiles::ProfileId;
use std::path::Path;

/// Head-version fields denormalized into a collection item.
#[derive(Debug, Clone, Default)]
pub struct HeadFields {
    pub commit_time: Option<DateTime<Utc>>,
    pub commit_title: String,
    pub body_size: i64,
    pub body_rows: i64,
    pub num_errors: i64,
    pub meta_title: String,
}

/// What migration needs from the legacy repository layer.
///
/// `list_refs` is the legacy reference list (the `ListVersionInfoShim` of
/// the repo layer): items carry author and name but no `init_id`.
pub trait LegacyRepo: Send + Sync {
    fn list_refs(&self) -> anyhow::Result<Vec<VersionInfo>>;

    /// Consults the logbook for the stable lineage id of a ref.
    fn resolve_init_id(&self, username: &str, name: &str) -> Option<String>;

    /// Loads the head version to fill commit and body fields.
    fn head_fields(&self, path: &str) -> Option<HeadFields>;

    /// Folds the branch log into `(commit_count, run_count)`.
    fn log_counts(&self, init_id: &str) -> (i64, i64);
}

/// Opens the collection store at `dir`, migrating `legacy` into the
/// owner's collection iff the directory did not exist yet. Returns the
/// store and how many items migration inserted (0 when skipped).
pub fn open_with_migration(
    dir: impl AsRef<Path>,
    legacy: &dyn LegacyRepo,
    owner: &ProfileId,
) -> Result<(LocalCollection, usize), Error> {
    let dir = dir.as_ref();
    if dir.exists() {
        return Ok((LocalCollection::open(dir)?, 0));
    }
    let store = LocalCollection::open(dir)?;
    let migrated = migrate(legacy, &store, owner)?;
    Ok((store, migrated))
}

fn migrate(
    legacy: &dyn LegacyRepo,
    store: &LocalCollection,
    owner: &ProfileId,
) -> Result<usize, Error> {
    let refs = match legacy.list_refs() {
        Ok(refs) => refs,
        Err(e) => {
            tracing::warn!("listing legacy references failed, migrating nothing: {:#}", e);
            return Ok(0);
        }
    };

    let mut items = Vec::with_capacity(refs.len());
    for mut vi in refs {
        let init_id = match legacy.resolve_init_id(&vi.username, &vi.name) {
            Some(init_id) => init_id,
            None => {
                tracing::warn!(
                    reference = %format!("{}/{}", vi.username, vi.name),
                    "dropping legacy reference, logbook has no lineage for it"
                );
                continue;
            }
        };
        vi.init_id = init_id;

        if let Some(head) = legacy.head_fields(&vi.path) {
            vi.commit_time = head.commit_time;
            vi.commit_title = head.commit_title;
            vi.body_size = head.body_size;
            vi.body_rows = head.body_rows;
            vi.num_errors = head.num_errors;
            vi.meta_title = head.meta_title;
        }
        let (commit_count, run_count) = legacy.log_counts(&vi.init_id);
        vi.commit_count = commit_count;
        vi.run_count = run_count;
        items.push(vi);
    }

    let migrated = items.len();
    if migrated > 0 {
        store.add(owner, items)?;
    }
    tracing::info!(items = migrated, owner = %owner, "migrated legacy references");
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Set;
    use maplit::hashmap;
    use std::collections::HashMap;
    use util::params::List;

    struct FakeLegacy {
        refs: Vec<VersionInfo>,
        lineages: HashMap<String, String>,
    }

    impl LegacyRepo for FakeLegacy {
        fn list_refs(&self) -> anyhow::Result<Vec<VersionInfo>> {
            Ok(self.refs.clone())
        }

        fn resolve_init_id(&self, _username: &str, name: &str) -> Option<String> {
            self.lineages.get(name).cloned()
        }

        fn head_fields(&self, _path: &str) -> Option<HeadFields> {
            Some(HeadFields {
                commit_title: "migrated head".to_owned(),
                body_size: 16,
                body_rows: 2,
                ..Default::default()
            })
        }

        fn log_counts(&self, _init_id: &str) -> (i64, i64) {
            (3, 1)
        }
    }

    fn legacy_ref(name: &str) -> VersionInfo {
        let mut vi = VersionInfo::new("", "3mJr7A", "kermit", name);
        vi.path = format!("/ipfs/Qm{}", name);
        vi
    }

    #[test]
    fn migrates_resolvable_refs_and_drops_the_rest() {
        let owner = ProfileId::from_base58("3mJr7A").unwrap();
        let legacy = FakeLegacy {
            refs: vec![
                legacy_ref("alpha"),
                legacy_ref("bravo"),
                legacy_ref("charlie"),
                legacy_ref("orphan"),
            ],
            lineages: hashmap! {
                "alpha".to_owned() => "init-a".to_owned(),
                "bravo".to_owned() => "init-b".to_owned(),
                "charlie".to_owned() => "init-c".to_owned(),
            },
        };

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("collections");
        let (store, migrated) = open_with_migration(&target, &legacy, &owner).unwrap();
        assert_eq!(migrated, 3);

        let listed = store.list(&owner, &List::list_all()).unwrap();
        assert_eq!(listed.len(), 3);
        for vi in &listed {
            assert!(!vi.init_id.is_empty());
            assert_eq!(vi.commit_count, 3);
            assert_eq!(vi.run_count, 1);
            assert_eq!(vi.commit_title, "migrated head");
        }
        assert!(!listed.iter().any(|vi| vi.name == "orphan"));
    }

    #[test]
    fn migration_is_one_shot() {
        let owner = ProfileId::from_base58("3mJr7A").unwrap();
        let legacy = FakeLegacy {
            refs: vec![legacy_ref("alpha")],
            lineages: hashmap! { "alpha".to_owned() => "init-a".to_owned() },
        };

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("collections");
        let (store, first) = open_with_migration(&target, &legacy, &owner).unwrap();
        assert_eq!(first, 1);
        store
            .delete(&owner, &["init-a".to_owned()])
            .expect("delete migrated item");
        drop(store);

        // the directory now exists, so the second boot skips migration
        // and the deleted item stays deleted
        let (store, second) = open_with_migration(&target, &legacy, &owner).unwrap();
        assert_eq!(second, 0);
        assert!(store.list(&owner, &List::list_all()).unwrap().is_empty());
    }
}
