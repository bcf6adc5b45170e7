//! Per-profile collections of dataset version summaries.
//!
//! A collection is the authoritative, denormalized index of the datasets
//! visible to one profile: an ordered list of [`VersionInfo`] records,
//! unique by `init_id`, persisted as one JSON file per profile. The
//! [`maintainer`] keeps collections consistent with the rest of the
//! system by applying bus events; [`migration`] builds the first
//! collection from a legacy repository.

pub mod maintainer;
pub mod migration;
mod resolver;

pub use maintainer::SetMaintainer;
pub use resolver::CollectionResolver;

use dsref::VersionInfo;
use parking_lot::Mutex;
use profiles::ProfileId;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use util::params::List;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("collection not found")]
    NotFound,
    #[error("invalid list parameters: {0}")]
    InvalidParams(#[from] util::params::ParamsError),
    #[error("invalid version info {name:?}: missing {field}")]
    InvalidItem { field: &'static str, name: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("decoding collection: {0}")]
    Decoding(#[from] serde_json::Error),
}

/// Read access to collections.
pub trait Set: Send + Sync {
    /// A page of `profile_id`'s collection in its persistent order.
    /// Unknown profiles fail with [`Error::NotFound`]; a negative limit
    /// selects everything after `offset`.
    fn list(&self, profile_id: &ProfileId, params: &List) -> Result<Vec<VersionInfo>, Error>;
}

/// Write access to collections.
pub trait WritableSet: Set {
    /// Upserts by `init_id`. All items are validated up front; one
    /// invalid item fails the whole call with nothing applied.
    fn add(&self, profile_id: &ProfileId, items: Vec<VersionInfo>) -> Result<(), Error>;

    /// Removes each id. Every id is attempted and the removals are
    /// persisted; the call still fails if any id was unknown.
    fn delete(&self, profile_id: &ProfileId, init_ids: &[String]) -> Result<(), Error>;

    fn get(&self, profile_id: &ProfileId, init_id: &str) -> Result<VersionInfo, Error>;
}

/// The collection store: profile id → sorted `Vec<VersionInfo>`, with one
/// JSON file per profile when rooted at a directory. Clones share state.
///
/// A single mutex guards the map and all persistence; nothing network-
/// facing ever runs under it. A failed file write surfaces to the caller
/// but does not roll back the in-memory update.
#[derive(Clone)]
pub struct LocalCollection {
    inner: Arc<Inner>,
}

struct Inner {
    collections: Mutex<BTreeMap<ProfileId, Vec<VersionInfo>>>,
    dir: Option<PathBuf>,
}

impl LocalCollection {
    /// A store without persistence, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                collections: Mutex::new(BTreeMap::new()),
                dir: None,
            }),
        }
    }

    /// Opens the store rooted at `dir`, creating the directory if needed
    /// and loading every well-formed `<profileID>.json` inside it. Files
    /// with unparseable names or contents are skipped with a warning.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut collections = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            let profile_id = match ProfileId::from_base58(stem) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(file = %path.display(), "skipping collection file: {}", e);
                    continue;
                }
            };
            let items: Vec<VersionInfo> = match std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
            {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(file = %path.display(), "skipping collection file: {}", e);
                    continue;
                }
            };
            collections.insert(profile_id, items);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                collections: Mutex::new(collections),
                dir: Some(dir),
            }),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.dir.is_some()
    }

    /// Profiles that currently have a collection.
    pub fn profiles(&self) -> Vec<ProfileId> {
        self.inner.collections.lock().keys().cloned().collect()
    }

    /// Looks a dataset up by its human reference across all collections.
    pub fn lookup_ref(&self, username: &str, name: &str) -> Option<VersionInfo> {
        let collections = self.inner.collections.lock();
        collections
            .values()
            .flat_map(|items| items.iter())
            .find(|vi| vi.username == username && vi.name == name)
            .cloned()
    }

    /// Replaces the stored item in every collection that already tracks
    /// `item.init_id`, carrying the previous `fsi_path` forward (links
    /// are per-repo state, not part of the new version).
    pub fn replace_everywhere(&self, item: &VersionInfo) -> Result<(), Error> {
        self.for_matching_collections(&item.init_id, |stored| {
            let fsi_path = std::mem::take(&mut stored.fsi_path);
            *stored = item.clone();
            stored.fsi_path = fsi_path;
        })
    }

    /// Upserts `item` into every collection. See the maintainer notes on
    /// pulled/pushed events for why this is not scoped to one profile.
    pub fn upsert_everywhere(&self, item: &VersionInfo) -> Result<(), Error> {
        let mut guard = self.inner.collections.lock();
        let mut result = Ok(());
        for (owner, items) in guard.iter_mut() {
            upsert(items, item.clone());
            sort_items(items);
            if let Err(e) = persist(&self.inner.dir, owner, items) {
                result = Err(e);
            }
        }
        result
    }

    /// Applies `apply` to every item matching `init_id`, in every
    /// collection, re-sorting and persisting the collections it touched.
    pub fn update_everywhere(
        &self,
        init_id: &str,
        apply: impl Fn(&mut VersionInfo),
    ) -> Result<(), Error> {
        self.for_matching_collections(init_id, apply)
    }

    /// Sets a new name on every copy of `init_id`.
    pub fn rename_everywhere(&self, init_id: &str, new_name: &str) -> Result<(), Error> {
        self.for_matching_collections(init_id, |stored| stored.name = new_name.to_owned())
    }

    /// Rewrites the username on every item authored by `profile_id`
    /// whose username differs.
    pub fn update_username(&self, profile_id: &str, username: &str) -> Result<(), Error> {
        let mut guard = self.inner.collections.lock();
        let mut result = Ok(());
        for (owner, items) in guard.iter_mut() {
            let mut touched = false;
            for stored in items.iter_mut() {
                if stored.profile_id == profile_id && stored.username != username {
                    stored.username = username.to_owned();
                    touched = true;
                }
            }
            if touched {
                if let Err(e) = persist(&self.inner.dir, owner, items) {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn for_matching_collections(
        &self,
        init_id: &str,
        apply: impl Fn(&mut VersionInfo),
    ) -> Result<(), Error> {
        let mut guard = self.inner.collections.lock();
        let mut result = Ok(());
        for (owner, items) in guard.iter_mut() {
            let mut touched = false;
            for stored in items.iter_mut() {
                if stored.init_id == init_id {
                    apply(stored);
                    touched = true;
                }
            }
            if touched {
                sort_items(items);
                if let Err(e) = persist(&self.inner.dir, owner, items) {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl Set for LocalCollection {
    fn list(&self, profile_id: &ProfileId, params: &List) -> Result<Vec<VersionInfo>, Error> {
        params.validate()?;
        let guard = self.inner.collections.lock();
        let items = guard.get(profile_id).ok_or(Error::NotFound)?;

        let offset = params.offset.max(0) as usize;
        if offset >= items.len() {
            return Ok(Vec::new());
        }
        let rest = &items[offset..];
        let take = if params.limit < 0 {
            rest.len()
        } else {
            (params.limit as usize).min(rest.len())
        };
        Ok(rest[..take].to_vec())
    }
}

impl WritableSet for LocalCollection {
    fn add(&self, profile_id: &ProfileId, items: Vec<VersionInfo>) -> Result<(), Error> {
        for item in &items {
            if let Some(field) = item.missing_required_field() {
                return Err(Error::InvalidItem {
                    field,
                    name: item.name.clone(),
                });
            }
        }
        let mut guard = self.inner.collections.lock();
        let collection = guard.entry(profile_id.clone()).or_default();
        for item in items {
            upsert(collection, item);
        }
        sort_items(collection);
        persist(&self.inner.dir, profile_id, collection)
    }

    fn delete(&self, profile_id: &ProfileId, init_ids: &[String]) -> Result<(), Error> {
        let mut guard = self.inner.collections.lock();
        let collection = guard.get_mut(profile_id).ok_or(Error::NotFound)?;
        let mut missing = false;
        for init_id in init_ids {
            match collection.iter().position(|vi| &vi.init_id == init_id) {
                Some(idx) => {
                    collection.remove(idx);
                }
                None => missing = true,
            }
        }
        persist(&self.inner.dir, profile_id, collection)?;
        if missing {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn get(&self, profile_id: &ProfileId, init_id: &str) -> Result<VersionInfo, Error> {
        self.inner
            .collections
            .lock()
            .get(profile_id)
            .ok_or(Error::NotFound)?
            .iter()
            .find(|vi| vi.init_id == init_id)
            .cloned()
            .ok_or(Error::NotFound)
    }
}

fn upsert(collection: &mut Vec<VersionInfo>, item: VersionInfo) {
    match collection.iter_mut().find(|vi| vi.init_id == item.init_id) {
        Some(stored) => *stored = item,
        None => collection.push(item),
    }
}

// stable, so equal names keep their insertion order
fn sort_items(items: &mut [VersionInfo]) {
    items.sort_by(|a, b| a.name.cmp(&b.name));
}

fn persist(
    dir: &Option<PathBuf>,
    profile_id: &ProfileId,
    items: &[VersionInfo],
) -> Result<(), Error> {
    let dir = match dir {
        Some(dir) => dir,
        None => return Ok(()),
    };
    let path = dir.join(format!("{}.json", profile_id));
    let tmp = dir.join(format!("{}.json.tmp", profile_id));
    // an empty collection is written as `[]`, keeping deletes and
    // migration idempotent across restarts
    let bytes = serde_json::to_vec_pretty(items)?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(seed: u8) -> ProfileId {
        ProfileId::from_base58(&bs58_of(seed)).unwrap()
    }

    fn bs58_of(seed: u8) -> String {
        // a tiny valid base58 payload per seed
        match seed {
            0 => "3mJr7A".to_owned(),
            1 => "3yZe7d".to_owned(),
            _ => format!("4fed{}", seed),
        }
    }

    fn item(init_id: &str, name: &str) -> VersionInfo {
        VersionInfo::new(init_id, "QmProfile", "kermit", name)
    }

    #[test]
    fn add_is_an_idempotent_upsert() {
        let store = LocalCollection::in_memory();
        let profile = pid(0);
        let vi = item("i1", "muppet_names");
        store.add(&profile, vec![vi.clone()]).unwrap();
        store.add(&profile, vec![vi.clone()]).unwrap();

        let listed = store.list(&profile, &List::list_all()).unwrap();
        assert_eq!(listed, vec![vi]);
    }

    #[test]
    fn add_rejects_missing_required_fields() {
        let store = LocalCollection::in_memory();
        let profile = pid(0);
        let mut invalid = item("i2", "half_formed");
        invalid.username.clear();

        let err = store
            .add(&profile, vec![item("i1", "fine"), invalid])
            .unwrap_err();
        match err {
            Error::InvalidItem { field, .. } => assert_eq!(field, "username"),
            other => panic!("unexpected error {:?}", other),
        }
        // wholesale failure: the valid item was not applied either
        assert!(matches!(
            store.list(&profile, &List::list_all()),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn collections_stay_sorted_by_name() {
        let store = LocalCollection::in_memory();
        let profile = pid(0);
        for name in ["delta", "alpha", "echo", "bravo", "charlie"] {
            store
                .add(&profile, vec![item(&format!("i-{}", name), name)])
                .unwrap();
        }
        let names: Vec<String> = store
            .list(&profile, &List::list_all())
            .unwrap()
            .into_iter()
            .map(|vi| vi.name)
            .collect();
        assert_eq!(names, ["alpha", "bravo", "charlie", "delta", "echo"]);
    }

    #[test]
    fn list_pages_with_offset_before_limit() {
        let store = LocalCollection::in_memory();
        let profile = pid(0);
        for name in ["a", "b", "c", "d", "e"] {
            store
                .add(&profile, vec![item(&format!("i-{}", name), name)])
                .unwrap();
        }

        let page = store
            .list(&profile, &List::list_all().with_offset_limit(1, 2))
            .unwrap();
        let names: Vec<&str> = page.iter().map(|vi| vi.name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);

        let all = store.list(&profile, &List::list_all()).unwrap();
        assert_eq!(all.len(), 5);

        let off_the_end = store
            .list(&profile, &List::list_all().with_offset_limit(9, 2))
            .unwrap();
        assert!(off_the_end.is_empty());
    }

    #[test]
    fn list_validates_params_and_profile() {
        let store = LocalCollection::in_memory();
        let profile = pid(0);
        assert!(matches!(
            store.list(&profile, &List::list_all()),
            Err(Error::NotFound)
        ));
        store.add(&profile, vec![item("i1", "a")]).unwrap();
        assert!(matches!(
            store.list(&profile, &List::list_all().with_offset_limit(-1, 1)),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn delete_attempts_every_id_and_reports_missing_ones() {
        let store = LocalCollection::in_memory();
        let profile = pid(0);
        store
            .add(&profile, vec![item("i1", "a"), item("i2", "b")])
            .unwrap();

        let err = store
            .delete(&profile, &["i1".into(), "nope".into(), "i2".into()])
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));

        // both known ids went away despite the miss in the middle
        assert!(matches!(store.get(&profile, "i1"), Err(Error::NotFound)));
        assert!(matches!(store.get(&profile, "i2"), Err(Error::NotFound)));
    }

    #[test]
    fn persistence_round_trips_through_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let profile = pid(0);
        let items = vec![item("i1", "alpha"), item("i2", "bravo")];
        {
            let store = LocalCollection::open(dir.path()).unwrap();
            store.add(&profile, items.clone()).unwrap();
        }
        let store = LocalCollection::open(dir.path()).unwrap();
        assert_eq!(store.list(&profile, &List::list_all()).unwrap(), items);
    }

    #[test]
    fn malformed_files_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("not-base58-0OIl.json"), b"[]").unwrap();
        std::fs::write(dir.path().join(format!("{}.json", pid(1))), b"{ nope").unwrap();

        let profile = pid(0);
        {
            let store = LocalCollection::open(dir.path()).unwrap();
            store.add(&profile, vec![item("i1", "alpha")]).unwrap();
        }
        let store = LocalCollection::open(dir.path()).unwrap();
        assert_eq!(store.profiles(), vec![profile.clone()]);
        assert_eq!(store.list(&profile, &List::list_all()).unwrap().len(), 1);
    }

    #[test]
    fn empty_collections_persist_as_empty_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let profile = pid(0);
        {
            let store = LocalCollection::open(dir.path()).unwrap();
            store.add(&profile, vec![item("i1", "alpha")]).unwrap();
            store.delete(&profile, &["i1".into()]).unwrap();
        }
        let file = dir.path().join(format!("{}.json", profile));
        let bytes = std::fs::read(&file).unwrap();
        let parsed: Vec<VersionInfo> = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed.is_empty());

        let store = LocalCollection::open(dir.path()).unwrap();
        assert_eq!(store.list(&profile, &List::list_all()).unwrap(), vec![]);
    }
}
