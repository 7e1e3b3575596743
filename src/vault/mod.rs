// Session-scoped persistent token vault
// Bidirectional placeholder store with per-session category counters,
// TTL-bounded entries, a global LRU cap, and debounced atomic persistence.

pub mod persistence;

use crate::error::{GatewayError, Result};
use crate::types::{Category, VaultEntry};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_ENTRY_TTL_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 300;
pub const FLUSH_DEBOUNCE_MS: u64 = 100;

/// Insertion-ordered placeholder-to-original map handed to the sanitizer and
/// restorer. A plain concrete type; mutations made through the vault are what
/// get persisted.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    order: Vec<String>,
    entries: HashMap<String, String>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, token: impl Into<String>, original: impl Into<String>) {
        let token = token.into();
        if !self.entries.contains_key(&token) {
            self.order.push(token.clone());
        }
        self.entries.insert(token, original.into());
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries.get(token).map(|s| s.as_str())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    pub fn delete(&mut self, token: &str) -> bool {
        if self.entries.remove(token).is_some() {
            self.order.retain(|t| t != token);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .filter_map(|t| self.entries.get(t).map(|o| (t.as_str(), o.as_str())))
    }
}

/// In-memory per-session state.
struct SessionRecord {
    entries: HashMap<String, VaultEntry>,
    order: Vec<String>,
    reverse: HashMap<String, String>,
    counters: HashMap<Category, u32>,
    created_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(created_at: DateTime<Utc>) -> Self {
        SessionRecord {
            entries: HashMap::new(),
            order: Vec::new(),
            reverse: HashMap::new(),
            counters: HashMap::new(),
            created_at,
        }
    }

    fn insert(&mut self, entry: VaultEntry) {
        if let Some((category, n)) = parse_placeholder(&entry.token) {
            let counter = self.counters.entry(category).or_insert(0);
            if n > *counter {
                *counter = n;
            }
        }
        self.reverse
            .insert(entry.original_value.clone(), entry.token.clone());
        self.order.push(entry.token.clone());
        self.entries.insert(entry.token.clone(), entry);
    }

    fn remove(&mut self, token: &str) -> Option<VaultEntry> {
        let entry = self.entries.remove(token)?;
        self.order.retain(|t| t != token);
        self.reverse.remove(&entry.original_value);
        // Counters never decrease within a live session.
        Some(entry)
    }

    fn mapping(&self) -> MappingTable {
        let mut table = MappingTable::new();
        for token in &self.order {
            if let Some(entry) = self.entries.get(token) {
                table.set(token.clone(), entry.original_value.clone());
            }
        }
        table
    }
}

struct VaultInner {
    sessions: HashMap<Uuid, SessionRecord>,
    total_entries: usize,
}

impl VaultInner {
    fn session_mut(&mut self, session_id: Uuid, now: DateTime<Utc>) -> &mut SessionRecord {
        self.sessions
            .entry(session_id)
            .or_insert_with(|| SessionRecord::new(now))
    }

    /// Evict the entry with the oldest last access, across all sessions.
    fn evict_lru(&mut self) {
        let mut victim: Option<(Uuid, String, DateTime<Utc>)> = None;
        for (session_id, record) in &self.sessions {
            for entry in record.entries.values() {
                match &victim {
                    Some((_, _, oldest)) if entry.last_accessed_at >= *oldest => {}
                    _ => {
                        victim = Some((*session_id, entry.token.clone(), entry.last_accessed_at));
                    }
                }
            }
        }
        if let Some((session_id, token, _)) = victim {
            if let Some(record) = self.sessions.get_mut(&session_id) {
                record.remove(&token);
                self.total_entries = self.total_entries.saturating_sub(1);
                tracing::debug!(session = %session_id, "evicted least-recently-used vault entry");
            }
        }
    }

    fn snapshot(&self) -> Vec<VaultEntry> {
        let mut entries = Vec::with_capacity(self.total_entries);
        for record in self.sessions.values() {
            for token in &record.order {
                if let Some(entry) = record.entries.get(token) {
                    entries.push(entry.clone());
                }
            }
        }
        entries
    }
}

/// Process-lived placeholder vault.
///
/// All operations are safe under concurrent calls: one mutex guards the
/// in-memory maps, and the disk flush is debounced onto a background task.
pub struct TokenVault {
    inner: Arc<Mutex<VaultInner>>,
    path: PathBuf,
    ttl: Duration,
    max_entries: usize,
    dirty: Arc<Notify>,
    closing: Arc<AtomicBool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    purge_task: Mutex<Option<JoinHandle<()>>>,
    _lock: persistence::DirLock,
}

impl TokenVault {
    /// Open (or create) the vault at `path`, acquiring the directory lock and
    /// hydrating live entries. Must be called from within a tokio runtime;
    /// the debounced flush runs as a background task.
    pub fn open(path: &Path) -> Result<Arc<TokenVault>> {
        Self::open_with(path, DEFAULT_MAX_ENTRIES, Duration::seconds(DEFAULT_ENTRY_TTL_SECS))
    }

    pub fn open_with(path: &Path, max_entries: usize, ttl: Duration) -> Result<Arc<TokenVault>> {
        let dir = path
            .parent()
            .ok_or_else(|| GatewayError::Vault("vault path has no parent directory".to_string()))?;
        persistence::ensure_vault_dir(dir)?;
        let lock = persistence::DirLock::acquire(dir)?;

        let mut inner = VaultInner {
            sessions: HashMap::new(),
            total_entries: 0,
        };
        for entry in persistence::load_entries(path) {
            inner
                .session_mut(entry.session_id, entry.created_at)
                .insert(entry);
            inner.total_entries += 1;
        }

        let vault = Arc::new(TokenVault {
            inner: Arc::new(Mutex::new(inner)),
            path: path.to_path_buf(),
            ttl,
            max_entries,
            dirty: Arc::new(Notify::new()),
            closing: Arc::new(AtomicBool::new(false)),
            flush_task: Mutex::new(None),
            purge_task: Mutex::new(None),
            _lock: lock,
        });

        vault.spawn_flush_task();
        Ok(vault)
    }

    fn spawn_flush_task(self: &Arc<Self>) {
        let inner = Arc::clone(&self.inner);
        let dirty = Arc::clone(&self.dirty);
        let closing = Arc::clone(&self.closing);
        let path = self.path.clone();

        let handle = tokio::spawn(async move {
            loop {
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                dirty.notified().await;
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                // Coalesce the burst of mutations behind one write.
                tokio::time::sleep(std::time::Duration::from_millis(FLUSH_DEBOUNCE_MS)).await;
                let snapshot = {
                    let inner = inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.snapshot()
                };
                if let Err(e) = persistence::write_entries(&path, &snapshot) {
                    // In-memory state stays authoritative; retry on the next
                    // mutation.
                    tracing::warn!(error = %e, "vault flush failed");
                }
            }
        });
        *self.flush_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Run `purge_expired` on a timer until `close`.
    pub fn start_purge_timer(self: &Arc<Self>, interval_secs: u64) {
        let vault = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if vault.closing.load(Ordering::SeqCst) {
                    break;
                }
                let purged = vault.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "purged expired vault entries");
                }
            }
        });
        *self.purge_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Mint a new session id.
    pub fn create_session(&self) -> Uuid {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let mut inner = self.lock_inner();
        inner.session_mut(session_id, now);
        session_id
    }

    /// Current mapping table and counters for a session, creating it on first
    /// touch. Expired entries are dropped from the projection.
    pub fn session_state(&self, session_id: Uuid) -> (MappingTable, HashMap<Category, u32>) {
        let now = Utc::now();
        let mut inner = self.lock_inner();
        let record = inner.session_mut(session_id, now);

        let expired: Vec<String> = record
            .entries
            .values()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.token.clone())
            .collect();
        let expired_count = expired.len();
        for token in expired {
            record.remove(&token);
        }
        let state = (record.mapping(), record.counters.clone());
        inner.total_entries = inner.total_entries.saturating_sub(expired_count);
        state
    }

    /// Look up the original behind a placeholder, refreshing its last access.
    pub fn resolve(&self, session_id: Uuid, token: &str) -> Option<String> {
        let now = Utc::now();
        let mut inner = self.lock_inner();
        let record = inner.sessions.get_mut(&session_id)?;
        let entry = record.entries.get_mut(token)?;
        if entry.expires_at <= now {
            return None;
        }
        entry.last_accessed_at = now;
        let original = entry.original_value.clone();
        drop(inner);
        self.dirty.notify_one();
        Some(original)
    }

    /// Idempotent store: an original already mapped in this session keeps its
    /// existing token; otherwise the given placeholder is persisted.
    pub fn store(&self, session_id: Uuid, token: &str, original: &str, category: Category) -> String {
        let now = Utc::now();
        let result = {
            let mut inner = self.lock_inner();
            let record = inner.session_mut(session_id, now);
            if let Some(existing) = record.reverse.get(original) {
                let existing = existing.clone();
                if let Some(entry) = record.entries.get_mut(&existing) {
                    entry.last_accessed_at = now;
                }
                existing
            } else {
                record.insert(VaultEntry {
                    token: token.to_string(),
                    original_value: original.to_string(),
                    category,
                    session_id,
                    created_at: now,
                    last_accessed_at: now,
                    expires_at: now + self.ttl,
                });
                inner.total_entries += 1;
                if inner.total_entries > self.max_entries {
                    inner.evict_lru();
                }
                token.to_string()
            }
        };
        self.dirty.notify_one();
        result
    }

    /// Atomically allocate the next placeholder for `original`, reusing the
    /// existing token when the session has already seen this value.
    pub fn allocate(&self, session_id: Uuid, original: &str, category: Category) -> String {
        let now = Utc::now();
        let result = {
            let mut inner = self.lock_inner();
            let record = inner.session_mut(session_id, now);
            if let Some(existing) = record.reverse.get(original) {
                let existing = existing.clone();
                if let Some(entry) = record.entries.get_mut(&existing) {
                    entry.last_accessed_at = now;
                }
                existing
            } else {
                let n = record.counters.get(&category).copied().unwrap_or(0) + 1;
                let token = category.placeholder(n);
                record.insert(VaultEntry {
                    token: token.clone(),
                    original_value: original.to_string(),
                    category,
                    session_id,
                    created_at: now,
                    last_accessed_at: now,
                    expires_at: now + self.ttl,
                });
                inner.total_entries += 1;
                if inner.total_entries > self.max_entries {
                    inner.evict_lru();
                }
                token
            }
        };
        self.dirty.notify_one();
        result
    }

    /// Drop expired entries everywhere; returns how many were removed.
    /// Sessions left empty past their TTL are destroyed with them.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0;
        {
            let mut inner = self.lock_inner();
            for record in inner.sessions.values_mut() {
                let expired: Vec<String> = record
                    .entries
                    .values()
                    .filter(|e| e.expires_at <= now)
                    .map(|e| e.token.clone())
                    .collect();
                for token in expired {
                    record.remove(&token);
                    purged += 1;
                }
            }
            inner.total_entries = inner.total_entries.saturating_sub(purged);
            let ttl = self.ttl;
            inner
                .sessions
                .retain(|_, record| !(record.entries.is_empty() && now - record.created_at > ttl));
        }
        if purged > 0 {
            self.dirty.notify_one();
        }
        purged
    }

    /// Remove a session and everything in it; returns the entry count.
    pub fn destroy_session(&self, session_id: Uuid) -> usize {
        let removed = {
            let mut inner = self.lock_inner();
            match inner.sessions.remove(&session_id) {
                Some(record) => {
                    let n = record.entries.len();
                    inner.total_entries = inner.total_entries.saturating_sub(n);
                    n
                }
                None => 0,
            }
        };
        if removed > 0 {
            self.dirty.notify_one();
        }
        removed
    }

    /// Total live entries across sessions.
    pub fn entry_count(&self) -> usize {
        self.lock_inner().total_entries
    }

    /// Live session count.
    pub fn session_count(&self) -> usize {
        self.lock_inner().sessions.len()
    }

    /// Flush pending state and stop the background tasks. The final write
    /// completes before this returns.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.dirty.notify_one();

        let flush = self.flush_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = flush {
            let _ = handle.await;
        }
        let purge = self.purge_task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = purge {
            handle.abort();
        }

        let snapshot = self.lock_inner().snapshot();
        if let Err(e) = persistence::write_entries(&self.path, &snapshot) {
            tracing::warn!(error = %e, "final vault flush failed");
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, VaultInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse `[category_n]` back into its parts.
pub fn parse_placeholder(token: &str) -> Option<(Category, u32)> {
    let bare = token.strip_prefix('[')?.strip_suffix(']')?;
    let (prefix, n) = bare.rsplit_once('_')?;
    let n: u32 = n.parse().ok()?;
    Category::from_prefix(prefix).map(|c| (c, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_vault(dir: &tempfile::TempDir) -> Arc<TokenVault> {
        TokenVault::open(&dir.path().join(persistence::VAULT_FILE_NAME)).unwrap()
    }

    #[test]
    fn test_parse_placeholder() {
        assert_eq!(parse_placeholder("[ssn_1]"), Some((Category::Ssn, 1)));
        assert_eq!(
            parse_placeholder("[credit_card_12]"),
            Some((Category::CreditCard, 12))
        );
        assert_eq!(parse_placeholder("[nope_1]"), None);
        assert_eq!(parse_placeholder("ssn_1"), None);
        assert_eq!(parse_placeholder("[ssn_x]"), None);
    }

    #[test]
    fn test_mapping_table_insertion_order() {
        let mut table = MappingTable::new();
        table.set("[ssn_1]", "a");
        table.set("[person_1]", "b");
        table.set("[ssn_1]", "a2");
        let pairs: Vec<_> = table.iter().collect();
        assert_eq!(pairs, vec![("[ssn_1]", "a2"), ("[person_1]", "b")]);
        assert!(table.contains("[person_1]"));
        assert!(table.delete("[ssn_1]"));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_allocate_is_idempotent_per_original() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);
        let session = vault.create_session();

        let t1 = vault.allocate(session, "123-45-6789", Category::Ssn);
        let t2 = vault.allocate(session, "123-45-6789", Category::Ssn);
        let t3 = vault.allocate(session, "987-65-4321", Category::Ssn);

        assert_eq!(t1, "[ssn_1]");
        assert_eq!(t2, "[ssn_1]");
        assert_eq!(t3, "[ssn_2]");
        assert_eq!(vault.entry_count(), 2);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_counters_isolated_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);
        let a = vault.create_session();
        let b = vault.create_session();

        assert_eq!(vault.allocate(a, "x@example.com", Category::Email), "[email_1]");
        assert_eq!(vault.allocate(b, "y@example.com", Category::Email), "[email_1]");
        vault.close().await;
    }

    #[tokio::test]
    async fn test_resolve_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let vault = TokenVault::open_with(
            &dir.path().join(persistence::VAULT_FILE_NAME),
            100,
            Duration::seconds(-1), // everything is born expired
        )
        .unwrap();
        let session = vault.create_session();
        let token = vault.allocate(session, "secret-value", Category::Secret);
        assert_eq!(vault.resolve(session, &token), None);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_resolve_live_entry() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);
        let session = vault.create_session();
        let token = vault.allocate(session, "j@example.com", Category::Email);
        assert_eq!(vault.resolve(session, &token).as_deref(), Some("j@example.com"));
        assert_eq!(vault.resolve(session, "[email_99]"), None);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_persistence_round_trip_rebuilds_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(persistence::VAULT_FILE_NAME);
        let session;
        {
            let vault = TokenVault::open(&path).unwrap();
            session = vault.create_session();
            vault.allocate(session, "a@example.com", Category::Email);
            vault.allocate(session, "b@example.com", Category::Email);
            vault.close().await;
        }
        {
            let vault = TokenVault::open(&path).unwrap();
            // Counter resumes past the persisted maximum.
            assert_eq!(
                vault.allocate(session, "c@example.com", Category::Email),
                "[email_3]"
            );
            // Identity survives the restart.
            assert_eq!(
                vault.allocate(session, "a@example.com", Category::Email),
                "[email_1]"
            );
            vault.close().await;
        }
    }

    #[tokio::test]
    async fn test_lru_eviction_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let vault = TokenVault::open_with(
            &dir.path().join(persistence::VAULT_FILE_NAME),
            2,
            Duration::seconds(3600),
        )
        .unwrap();
        let session = vault.create_session();
        vault.allocate(session, "first", Category::Secret);
        vault.allocate(session, "second", Category::Secret);
        vault.allocate(session, "third", Category::Secret);
        assert_eq!(vault.entry_count(), 2);

        // The oldest entry is the one that went away.
        let (mapping, _) = vault.session_state(session);
        assert!(!mapping.contains("[secret_1]"));
        assert!(mapping.contains("[secret_2]"));
        assert!(mapping.contains("[secret_3]"));
        vault.close().await;
    }

    #[tokio::test]
    async fn test_destroy_session() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(&dir);
        let session = vault.create_session();
        vault.allocate(session, "x", Category::Secret);
        vault.allocate(session, "y", Category::Secret);
        assert_eq!(vault.destroy_session(session), 2);
        assert_eq!(vault.entry_count(), 0);
        assert_eq!(vault.destroy_session(session), 0);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let dir = tempfile::tempdir().unwrap();
        let vault = TokenVault::open_with(
            &dir.path().join(persistence::VAULT_FILE_NAME),
            100,
            Duration::seconds(-1),
        )
        .unwrap();
        let session = vault.create_session();
        vault.allocate(session, "gone", Category::Secret);
        assert_eq!(vault.purge_expired(), 1);
        assert_eq!(vault.entry_count(), 0);
        vault.close().await;
    }

    #[tokio::test]
    async fn test_second_process_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(persistence::VAULT_FILE_NAME);
        let vault = TokenVault::open(&path).unwrap();
        assert!(TokenVault::open(&path).is_err());
        vault.close().await;
    }

    #[tokio::test]
    async fn test_session_state_skips_expired() {
        let dir = tempfile::tempdir().unwrap();
        let vault = TokenVault::open_with(
            &dir.path().join(persistence::VAULT_FILE_NAME),
            100,
            Duration::seconds(-1),
        )
        .unwrap();
        let session = vault.create_session();
        vault.allocate(session, "x", Category::Secret);
        let (mapping, counters) = vault.session_state(session);
        assert!(mapping.is_empty());
        // Counters never decrease, even when their entries expire.
        assert_eq!(counters.get(&Category::Secret), Some(&1));
        vault.close().await;
    }
}
