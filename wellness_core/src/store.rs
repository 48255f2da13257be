//! Profile persistence.
//!
//! Each user's profile (population tag, assessment records, profile-level
//! completion marker) is one JSON document. The file store serialises
//! read-modify-write cycles per user with an advisory lock and replaces
//! documents atomically. Read and write failures are always returned to the
//! caller; a corrupt document is an error, never silently reset.

use crate::{Error, Result, UserProfileState};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Storage backend for per-user profile documents
pub trait ProfileStore {
    /// Load a user's profile. Unknown users get an empty profile.
    fn load(&self, user_id: &str) -> Result<UserProfileState>;

    /// Replace a user's stored profile
    fn save(&self, state: &UserProfileState) -> Result<()>;

    /// Ids of every user with a stored profile, sorted
    fn user_ids(&self) -> Result<Vec<String>>;

    /// Load, modify and save one user's profile
    ///
    /// Nothing is written if `f` returns an error.
    fn update(
        &self,
        user_id: &str,
        f: &mut dyn FnMut(&mut UserProfileState) -> Result<()>,
    ) -> Result<UserProfileState> {
        let mut state = self.load(user_id)?;
        f(&mut state)?;
        self.save(&state)?;
        Ok(state)
    }
}

// ============================================================================
// File store
// ============================================================================

/// Directory of `<encoded user id>.json` documents, with per-user lock files
/// kept apart under `locks/`
#[derive(Clone, Debug)]
pub struct FileProfileStore {
    dir: PathBuf,
}

impl FileProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document holding `user_id`'s profile
    pub fn profile_path(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.json", encode_user_id(user_id)?)))
    }

    fn lock_path(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self
            .dir
            .join(LOCK_DIR)
            .join(format!("{}.lock", encode_user_id(user_id)?)))
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// User id recorded inside a stored document
    fn stored_user_id(path: &Path) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Stored {
            user_id: String,
        }

        let contents = std::fs::read_to_string(path)?;
        let stored: Stored = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("corrupt profile {:?}: {}", path, e)))?;
        Ok(stored.user_id)
    }
}

impl ProfileStore for FileProfileStore {
    fn load(&self, user_id: &str) -> Result<UserProfileState> {
        let path = self.profile_path(user_id)?;
        if !path.exists() {
            tracing::debug!("No profile for user {:?}, starting empty", user_id);
            return Ok(UserProfileState::new(user_id));
        }

        let file = File::open(&path)?;

        // Acquire shared lock for reading
        file.lock_shared()?;
        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let state: UserProfileState = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("corrupt profile {:?}: {}", path, e)))?;

        if state.user_id != user_id {
            return Err(Error::Storage(format!(
                "profile {:?} belongs to {:?}, expected {:?}",
                path, state.user_id, user_id
            )));
        }

        tracing::debug!("Loaded profile for user {:?} from {:?}", user_id, path);
        Ok(state)
    }

    /// Atomically writes the profile by:
    /// 1. Writing to a temp file in the same directory
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    fn save(&self, state: &UserProfileState) -> Result<()> {
        let path = self.profile_path(&state.user_id)?;
        self.ensure_dir()?;

        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved profile for user {:?} to {:?}", state.user_id, path);
        Ok(())
    }

    fn user_ids(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.contains(DIGEST_SEPARATOR) {
                ids.push(Self::stored_user_id(&path)?);
                continue;
            }
            match decode_user_id(stem) {
                Some(id) => ids.push(id),
                None => tracing::warn!("Skipping unrecognised profile file {:?}", path),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Holds an exclusive per-user lock for the whole load-modify-save cycle
    fn update(
        &self,
        user_id: &str,
        f: &mut dyn FnMut(&mut UserProfileState) -> Result<()>,
    ) -> Result<UserProfileState> {
        std::fs::create_dir_all(self.dir.join(LOCK_DIR))?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(user_id)?)?;
        lock.lock_exclusive()?;

        let result = self.load(user_id).and_then(|mut state| {
            f(&mut state)?;
            self.save(&state)?;
            Ok(state)
        });

        lock.unlock()?;
        result
    }
}

/// Subdirectory of the profile directory holding lock files
const LOCK_DIR: &str = "locks";

/// Longest stem kept reversible; longer ones are shortened with a digest
const MAX_PLAIN_STEM: usize = 120;

/// Marks a shortened stem. Never produced by the reversible encoding.
const DIGEST_SEPARATOR: char = '~';

/// Encode a user id as a file stem
///
/// Lowercase ASCII letters, digits, `-` and `_` are kept. Every other byte,
/// uppercase included, becomes `%XX` so ids that differ only in case never
/// share a file on case-insensitive filesystems. Stems longer than
/// [`MAX_PLAIN_STEM`] are cut back and suffixed with `~` plus a name-based
/// UUID of the id, which keeps file names well under filesystem limits.
pub fn encode_user_id(user_id: &str) -> Result<String> {
    if user_id.is_empty() {
        return Err(Error::InvalidUserId(user_id.to_string()));
    }

    let mut encoded = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    if encoded.len() > MAX_PLAIN_STEM {
        let mut cut = MAX_PLAIN_STEM;
        // don't split a %XX escape
        if let Some(escape) = encoded[cut.saturating_sub(2)..cut].find('%') {
            cut = cut - 2 + escape;
        }
        encoded.truncate(cut);
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, user_id.as_bytes());
        encoded.push(DIGEST_SEPARATOR);
        encoded.push_str(&digest.simple().to_string());
    }
    Ok(encoded)
}

/// Inverse of [`encode_user_id`]. Returns `None` for stems it did not
/// produce and for shortened stems, whose id lives only in the document.
pub fn decode_user_id(stem: &str) -> Option<String> {
    if stem.contains(DIGEST_SEPARATOR) {
        return None;
    }
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok().filter(|s| !s.is_empty())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store, used by tests and embedders without a data directory
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<BTreeMap<String, UserProfileState>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn profiles(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, UserProfileState>>> {
        self.profiles
            .lock()
            .map_err(|_| Error::Storage("profile map lock poisoned".into()))
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load(&self, user_id: &str) -> Result<UserProfileState> {
        if user_id.is_empty() {
            return Err(Error::InvalidUserId(user_id.to_string()));
        }
        Ok(self
            .profiles()?
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserProfileState::new(user_id)))
    }

    fn save(&self, state: &UserProfileState) -> Result<()> {
        if state.user_id.is_empty() {
            return Err(Error::InvalidUserId(state.user_id.clone()));
        }
        self.profiles()?.insert(state.user_id.clone(), state.clone());
        Ok(())
    }

    fn user_ids(&self) -> Result<Vec<String>> {
        Ok(self.profiles()?.keys().cloned().collect())
    }

    fn update(
        &self,
        user_id: &str,
        f: &mut dyn FnMut(&mut UserProfileState) -> Result<()>,
    ) -> Result<UserProfileState> {
        if user_id.is_empty() {
            return Err(Error::InvalidUserId(user_id.to_string()));
        }
        let mut profiles = self.profiles()?;
        let mut state = profiles
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserProfileState::new(user_id));
        f(&mut state)?;
        profiles.insert(user_id.to_string(), state.clone());
        Ok(state)
    }
}
