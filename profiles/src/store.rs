use crate::{Error, Profile, ProfileId};
use libp2p::PeerId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STORE_FILE: &str = "profiles.json";
const LOCK_FILE: &str = "profiles.lock";

/// Keyed lookup of every profile this node knows about, the local user's
/// included. Cheap to clone; all clones share state.
///
/// When rooted at a directory the store persists to `profiles.json` and
/// holds `profiles.lock` for the lifetime of the process, so two nodes
/// cannot share a repo.
#[derive(Clone)]
pub struct ProfileStore {
    inner: Arc<Inner>,
}

struct Inner {
    owner: Profile,
    profiles: Mutex<BTreeMap<ProfileId, Profile>>,
    path: Option<PathBuf>,
    // keeps the advisory lock alive until the store is dropped
    _lock: Option<fslock::LockFile>,
}

impl ProfileStore {
    /// A purely in-memory store seeded with the owner's profile.
    pub fn new(owner: Profile) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(owner.id.clone(), owner.clone());
        Self {
            inner: Arc::new(Inner {
                owner,
                profiles: Mutex::new(profiles),
                path: None,
                _lock: None,
            }),
        }
    }

    /// Opens (or creates) the persistent store under `dir`.
    pub fn open(dir: impl AsRef<Path>, owner: Profile) -> Result<Self, Error> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let lock_path = dir.join(LOCK_FILE);
        let lock_path = lock_path
            .to_str()
            .ok_or_else(|| Error::Io(IoError::new(ErrorKind::Other, "non-utf8 repo path")))?;
        let mut lock = fslock::LockFile::open(lock_path).map_err(io_error)?;
        if !lock.try_lock().map_err(io_error)? {
            return Err(Error::Locked);
        }

        let path = dir.join(STORE_FILE);
        let mut profiles: BTreeMap<ProfileId, Profile> = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            BTreeMap::new()
        };
        profiles.insert(owner.id.clone(), owner.clone());

        let store = Self {
            inner: Arc::new(Inner {
                owner,
                profiles: Mutex::new(profiles),
                path: Some(path),
                _lock: Some(lock),
            }),
        };
        store.save()?;
        Ok(store)
    }

    /// The local user.
    pub fn owner(&self) -> Profile {
        self.inner.owner.clone()
    }

    /// Inserts or replaces a profile, persisting the store.
    pub fn put(&self, profile: Profile) -> Result<(), Error> {
        profile.validate()?;
        self.inner
            .profiles
            .lock()
            .insert(profile.id.clone(), profile);
        self.save()
    }

    pub fn profile(&self, id: &ProfileId) -> Result<Profile, Error> {
        self.inner
            .profiles
            .lock()
            .get(id)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Every known profile, in stable id order.
    pub fn list(&self) -> Vec<Profile> {
        self.inner.profiles.lock().values().cloned().collect()
    }

    pub fn peername_id(&self, peername: &str) -> Result<ProfileId, Error> {
        self.inner
            .profiles
            .lock()
            .values()
            .find(|p| p.peername == peername)
            .map(|p| p.id.clone())
            .ok_or(Error::NotFound)
    }

    pub fn peer_ids(&self, id: &ProfileId) -> Result<Vec<PeerId>, Error> {
        Ok(self.profile(id)?.peer_ids)
    }

    /// The profile currently answering for a network peer id.
    pub fn peer_profile(&self, peer_id: &PeerId) -> Result<Profile, Error> {
        self.inner
            .profiles
            .lock()
            .values()
            .find(|p| p.peer_ids.contains(peer_id))
            .cloned()
            .ok_or(Error::NotFound)
    }

    pub fn len(&self) -> usize {
        self.inner.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self) -> Result<(), Error> {
        let path = match &self.inner.path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };
        let bytes = {
            let profiles = self.inner.profiles.lock();
            serde_json::to_vec_pretty(&*profiles)?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn io_error(e: fslock::Error) -> Error {
    Error::Io(IoError::new(ErrorKind::Other, e.to_string()))
}
