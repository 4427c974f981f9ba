//! Durable holders for the access/refresh token pair and the cached user.
//!
//! Every backend stores the access token, the refresh token and the user
//! profile as independent entries. A credential only exists when both token
//! entries are readable, so a half-written or half-corrupted store reads as
//! logged out. Store operations never fail: IO problems are logged and the
//! affected entry behaves as absent.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use tracing::{debug, warn};

use crate::models::UserProfile;

/// Keychain service name
const SERVICE_NAME: &str = "lmsdash";

/// Name of the key file that encrypts the file backend's entries
const KEY_FILE: &str = "store.key";

/// ChaCha20-Poly1305 nonce length in bytes
const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 key length in bytes
const KEY_LEN: usize = 32;

/// Access/refresh bearer pair. Debug output never shows the secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access: String,
    pub refresh: String,
}

impl Credential {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Access,
    Refresh,
    User,
}

impl EntryKey {
    pub const ALL: [EntryKey; 3] = [EntryKey::Access, EntryKey::Refresh, EntryKey::User];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKey::Access => "access",
            EntryKey::Refresh => "refresh",
            EntryKey::User => "user",
        }
    }
}

/// Key/value storage for session secrets.
///
/// Backends implement the three entry primitives; the credential-level
/// operations are shared.
pub trait CredentialStore: Send + Sync {
    fn read_entry(&self, key: EntryKey) -> Option<String>;
    fn write_entry(&self, key: EntryKey, value: &str);
    fn remove_entry(&self, key: EntryKey);

    fn get(&self) -> Option<Credential> {
        let access = self.read_entry(EntryKey::Access);
        let refresh = self.read_entry(EntryKey::Refresh);
        match (access, refresh) {
            (Some(access), Some(refresh)) => Some(Credential { access, refresh }),
            (None, None) => None,
            _ => {
                debug!("Only one token entry present, treating credential as absent");
                None
            }
        }
    }

    fn set(&self, credential: &Credential) {
        self.write_entry(EntryKey::Access, &credential.access);
        self.write_entry(EntryKey::Refresh, &credential.refresh);
    }

    /// Remove tokens and cached user. Safe to call repeatedly.
    fn clear(&self) {
        for key in EntryKey::ALL {
            self.remove_entry(key);
        }
    }

    fn user(&self) -> Option<UserProfile> {
        let raw = self.read_entry(EntryKey::User)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Cached user entry is corrupt, ignoring");
                None
            }
        }
    }

    fn set_user(&self, user: &UserProfile) {
        match serde_json::to_string(user) {
            Ok(raw) => self.write_entry(EntryKey::User, &raw),
            Err(e) => warn!(error = %e, "Failed to encode user profile"),
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<EntryKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: &Credential) -> Self {
        let store = Self::new();
        store.set(credential);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read_entry(&self, key: EntryKey) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&key).cloned()
    }

    fn write_entry(&self, key: EntryKey, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, value.to_string());
    }

    fn remove_entry(&self, key: EntryKey) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&key);
    }
}

// ============================================================================
// Encrypted file backend
// ============================================================================

/// One encrypted file per entry inside a private directory.
///
/// Files hold `nonce || ciphertext`; the key lives next to them in
/// `store.key` and is generated on first use.
pub struct FileCredentialStore {
    dir: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl FileCredentialStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create credential directory {}", dir.display()))?;
        let key = Self::load_or_create_key(&dir)?;
        Ok(Self {
            dir,
            cipher: ChaCha20Poly1305::new(&key),
        })
    }

    /// Default location under the platform's local data directory.
    pub fn default_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find local data directory"))?;
        Ok(data_dir.join(SERVICE_NAME).join("credentials"))
    }

    fn load_or_create_key(dir: &Path) -> Result<Key> {
        let path = dir.join(KEY_FILE);
        if path.exists() {
            let bytes = fs::read(&path).context("Failed to read credential key file")?;
            if bytes.len() == KEY_LEN {
                return Ok(*Key::from_slice(&bytes));
            }
            warn!("Credential key file has wrong length, regenerating");
        }

        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        fs::write(&path, key.as_slice()).context("Failed to write credential key file")?;
        restrict_permissions(&path);
        Ok(key)
    }

    fn entry_path(&self, key: EntryKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn seal(&self, plaintext: &str) -> Option<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext.as_bytes()).ok()?;
        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Some(sealed)
    }

    fn open_sealed(&self, sealed: &[u8]) -> Option<String> {
        if sealed.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl CredentialStore for FileCredentialStore {
    fn read_entry(&self, key: EntryKey) -> Option<String> {
        let path = self.entry_path(key);
        let sealed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(entry = key.as_str(), error = %e, "Failed to read credential entry");
                return None;
            }
        };
        let value = self.open_sealed(&sealed);
        if value.is_none() {
            warn!(entry = key.as_str(), "Credential entry failed to decrypt, ignoring");
        }
        value
    }

    fn write_entry(&self, key: EntryKey, value: &str) {
        let Some(sealed) = self.seal(value) else {
            warn!(entry = key.as_str(), "Failed to encrypt credential entry");
            return;
        };
        let path = self.entry_path(key);
        if let Err(e) = fs::write(&path, sealed) {
            warn!(entry = key.as_str(), error = %e, "Failed to write credential entry");
            return;
        }
        restrict_permissions(&path);
    }

    fn remove_entry(&self, key: EntryKey) {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(entry = key.as_str(), error = %e, "Failed to remove credential entry"),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        warn!(error = %e, "Failed to restrict credential file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

// ============================================================================
// OS keychain backend
// ============================================================================

/// One keychain item per entry, under the `lmsdash` service.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: EntryKey) -> Option<Entry> {
        match Entry::new(&self.service, key.as_str()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(entry = key.as_str(), error = %e, "Failed to create keyring entry");
                None
            }
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn read_entry(&self, key: EntryKey) -> Option<String> {
        match self.entry(key)?.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(entry = key.as_str(), error = %e, "Failed to read from keychain");
                None
            }
        }
    }

    fn write_entry(&self, key: EntryKey, value: &str) {
        if let Some(entry) = self.entry(key) {
            if let Err(e) = entry.set_password(value) {
                warn!(entry = key.as_str(), error = %e, "Failed to store in keychain");
            }
        }
    }

    fn remove_entry(&self, key: EntryKey) {
        if let Some(entry) = self.entry(key) {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => warn!(entry = key.as_str(), error = %e, "Failed to delete from keychain"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> UserProfile {
        UserProfile {
            id: 7,
            username: "alice".into(),
            first_name: Some("Alice".into()),
            last_name: Some("Liddell".into()),
            email: None,
            role: Some("instructor".into()),
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set(&Credential::new("A1", "R1"));
        assert_eq!(store.get(), Some(Credential::new("A1", "R1")));

        store.clear();
        assert!(store.get().is_none());
        // Idempotent
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_partial_credential_is_absent() {
        let store = MemoryCredentialStore::new();
        store.write_entry(EntryKey::Access, "A1");
        assert!(store.get().is_none());

        store.clear();
        store.write_entry(EntryKey::Refresh, "R1");
        assert!(store.get().is_none());
    }

    #[test]
    fn test_clear_removes_cached_user() {
        let store = MemoryCredentialStore::with_credential(&Credential::new("A1", "R1"));
        store.set_user(&sample_user());
        assert_eq!(store.user().map(|u| u.username), Some("alice".to_string()));

        store.clear();
        assert!(store.user().is_none());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let printed = format!("{:?}", Credential::new("secret-access", "secret-refresh"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCredentialStore::open(dir.path()).unwrap();
            store.set(&Credential::new("A1", "R1"));
            store.set_user(&sample_user());
        }

        let reopened = FileCredentialStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(), Some(Credential::new("A1", "R1")));
        assert_eq!(reopened.user(), Some(sample_user()));
    }

    #[test]
    fn test_file_store_encrypts_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        store.set(&Credential::new("plain-access-token", "R1"));

        let raw = fs::read(dir.path().join("access")).unwrap();
        let needle = b"plain-access-token";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_file_store_corrupt_entry_reads_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        store.set(&Credential::new("A1", "R1"));

        fs::write(dir.path().join("refresh"), b"garbage that is not sealed").unwrap();
        assert!(store.get().is_none());
        // The surviving entry is still readable on its own
        assert_eq!(store.read_entry(EntryKey::Access).as_deref(), Some("A1"));
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        store.clear();
        store.set(&Credential::new("A1", "R1"));
        store.clear();
        store.clear();
        assert!(store.get().is_none());
        assert!(!dir.path().join("access").exists());
    }

    #[test]
    fn test_file_store_key_mismatch_reads_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        store.set(&Credential::new("A1", "R1"));

        fs::remove_file(dir.path().join(KEY_FILE)).unwrap();
        let rekeyed = FileCredentialStore::open(dir.path()).unwrap();
        assert!(rekeyed.get().is_none());
    }
}
