//! Consent string persistence
//!
//! The encoded string lives in the `euconsent-v2` cookie and is mirrored to
//! a local fallback store. Every backend sits behind [`ConsentStorage`] so
//! the reconciler never cares which one answered.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cmp_config::StorageSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage {backend} unavailable: {reason}")]
    Unavailable { backend: &'static str, reason: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid cookie value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl StorageError {
    pub fn unavailable(backend: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Where the encoded consent string is kept between visits
#[async_trait]
pub trait ConsentStorage: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn load(&self) -> StorageResult<Option<String>>;

    async fn save(&self, tc_string: &str) -> StorageResult<()>;

    async fn clear(&self) -> StorageResult<()>;
}

/// Cookie value plus its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// Cookie-backed storage
///
/// Holds the jar for one visitor. Values are primed from a request's
/// `Cookie` header and rendered back as a `Set-Cookie` header.
pub struct CookieStorage {
    name: String,
    max_age: Duration,
    jar: Mutex<BTreeMap<String, StoredCookie>>,
}

impl CookieStorage {
    pub fn new(name: impl Into<String>, max_age_days: u32) -> Self {
        Self {
            name: name.into(),
            max_age: Duration::days(i64::from(max_age_days)),
            jar: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.cookie_name.clone(), settings.cookie_max_age_days)
    }

    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    /// Prime the jar from a `Cookie` request header; returns whether the
    /// consent cookie was present
    pub fn prime_from_header(&self, header: &str) -> bool {
        let value = header
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| name.trim() == self.name)
            .map(|(_, value)| value.trim().to_string());

        match value {
            Some(value) if !value.is_empty() => {
                let cookie = StoredCookie {
                    value,
                    expires_at: Utc::now() + self.max_age,
                };
                self.jar.lock().insert(self.name.clone(), cookie);
                true
            }
            _ => false,
        }
    }

    /// `Set-Cookie` header for the current value, or an expiring one after
    /// a clear
    pub fn set_cookie_header(&self) -> String {
        match self.jar.lock().get(&self.name) {
            Some(cookie) => format!(
                "{}={}; Max-Age={}; Path=/; SameSite=Lax; Secure",
                self.name,
                cookie.value,
                self.max_age.num_seconds()
            ),
            None => format!("{}=; Max-Age=0; Path=/; SameSite=Lax; Secure", self.name),
        }
    }

    pub fn stored(&self) -> Option<StoredCookie> {
        self.jar.lock().get(&self.name).cloned()
    }

    fn expire_stale(&self, now: DateTime<Utc>) {
        let mut jar = self.jar.lock();
        if jar.get(&self.name).is_some_and(|c| c.expires_at <= now) {
            debug!(cookie = %self.name, "Consent cookie expired");
            jar.remove(&self.name);
        }
    }
}

fn check_cookie_value(name: &str, value: &str) -> StorageResult<()> {
    let bad = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | ',' | '"' | '\\'));
    match bad {
        Some(ch) => Err(StorageError::InvalidValue {
            name: name.to_string(),
            reason: format!("character {ch:?} not allowed"),
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl ConsentStorage for CookieStorage {
    fn name(&self) -> &'static str {
        "cookie"
    }

    async fn load(&self) -> StorageResult<Option<String>> {
        self.expire_stale(Utc::now());
        Ok(self.stored().map(|cookie| cookie.value))
    }

    async fn save(&self, tc_string: &str) -> StorageResult<()> {
        check_cookie_value(&self.name, tc_string)?;
        let cookie = StoredCookie {
            value: tc_string.to_string(),
            expires_at: Utc::now() + self.max_age,
        };
        self.jar.lock().insert(self.name.clone(), cookie);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.jar.lock().remove(&self.name);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalEntries(BTreeMap<String, LocalEntry>);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalEntry {
    value: String,
    saved_at: DateTime<Utc>,
}

/// JSON file store keyed like browser local storage
pub struct LocalStorage {
    path: PathBuf,
    key: String,
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.local_path.clone(), settings.local_key.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> StorageResult<LocalEntries> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(LocalEntries::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalEntries::default()),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    /// Write through a sibling temp file and rename over the target
    async fn write_entries(&self, entries: &LocalEntries) -> StorageResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::io(dir, e))?;
        }
        let bytes = serde_json::to_vec_pretty(entries).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let temp = self.path.with_extension("tmp");
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| StorageError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))
    }
}

#[async_trait]
impl ConsentStorage for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn load(&self) -> StorageResult<Option<String>> {
        let entries = self.read_entries().await?;
        Ok(entries.0.get(&self.key).map(|entry| entry.value.clone()))
    }

    async fn save(&self, tc_string: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        // A corrupt file is replaced rather than blocking the save
        let mut entries = match self.read_entries().await {
            Ok(entries) => entries,
            Err(e @ StorageError::Corrupt { .. }) => {
                warn!(error = %e, "Replacing corrupt local consent store");
                LocalEntries::default()
            }
            Err(e) => return Err(e),
        };
        entries.0.insert(
            self.key.clone(),
            LocalEntry {
                value: tc_string.to_string(),
                saved_at: Utc::now(),
            },
        );
        self.write_entries(&entries).await?;
        debug!(path = ?self.path, key = %self.key, "Consent string written to local store");
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.0.remove(&self.key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }
}

/// In-process storage; can be switched off to act like a blocked store
#[derive(Default)]
pub struct MemoryStorage {
    value: Mutex<Option<String>>,
    unavailable: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        let storage = Self::new();
        *storage.value.lock() = Some(value.into());
        storage
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    pub fn value(&self) -> Option<String> {
        self.value.lock().clone()
    }

    fn check(&self) -> StorageResult<()> {
        if *self.unavailable.lock() {
            return Err(StorageError::unavailable("memory", "storage disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl ConsentStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> StorageResult<Option<String>> {
        self.check()?;
        Ok(self.value())
    }

    async fn save(&self, tc_string: &str) -> StorageResult<()> {
        self.check()?;
        *self.value.lock() = Some(tc_string.to_string());
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.check()?;
        *self.value.lock() = None;
        Ok(())
    }
}

/// Primary store mirrored to a fallback
///
/// Reads prefer the primary. Writes go to both and succeed if either one
/// took the value.
pub struct MirroredStorage {
    primary: Arc<dyn ConsentStorage>,
    fallback: Arc<dyn ConsentStorage>,
}

impl MirroredStorage {
    pub fn new(primary: Arc<dyn ConsentStorage>, fallback: Arc<dyn ConsentStorage>) -> Self {
        Self { primary, fallback }
    }

    /// Cookie primary with the JSON file as fallback
    pub fn from_settings(settings: &StorageSettings) -> Self {
        info!(
            cookie = %settings.cookie_name,
            local = ?settings.local_path,
            "Consent storage configured"
        );
        Self::new(
            Arc::new(CookieStorage::from_settings(settings)),
            Arc::new(LocalStorage::from_settings(settings)),
        )
    }
}

#[async_trait]
impl ConsentStorage for MirroredStorage {
    fn name(&self) -> &'static str {
        "mirrored"
    }

    async fn load(&self) -> StorageResult<Option<String>> {
        match self.primary.load().await {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => warn!(backend = self.primary.name(), error = %e, "Primary consent store unreadable"),
        }
        let value = self.fallback.load().await?;
        if value.is_some() {
            debug!(backend = self.fallback.name(), "Consent string restored from fallback");
        }
        Ok(value)
    }

    async fn save(&self, tc_string: &str) -> StorageResult<()> {
        let primary = self.primary.save(tc_string).await;
        let fallback = self.fallback.save(tc_string).await;
        match (primary, fallback) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => {
                warn!(backend = self.primary.name(), error = %e, "Consent string kept in fallback only");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                warn!(backend = self.fallback.name(), error = %e, "Consent string mirror failed");
                Ok(())
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    async fn clear(&self) -> StorageResult<()> {
        let primary = self.primary.clear().await;
        let fallback = self.fallback.clear().await;
        primary.and(fallback)
    }
}
