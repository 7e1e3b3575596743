// On-disk representation of the token vault
// A single JSON array of entries, written atomically (sibling .tmp + rename)
// with owner-only permissions, behind an advisory directory lock.

use crate::error::{GatewayError, Result};
use crate::types::VaultEntry;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const VAULT_FILE_NAME: &str = "token-vault.json";
const LOCK_FILE_NAME: &str = ".vault.lock";

/// Advisory exclusive lock on the vault directory.
///
/// The vault file is a single-writer resource; a second gateway process must
/// refuse to start rather than interleave writes. The lock is released when
/// the guard drops.
pub struct DirLock {
    _file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<DirLock> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| {
            GatewayError::Vault(format!(
                "vault directory {} is locked by another process",
                dir.display()
            ))
        })?;
        restrict_file_permissions(&lock_path)?;
        Ok(DirLock { _file: file })
    }
}

/// Create the vault directory with owner-only permissions.
pub fn ensure_vault_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    restrict_dir_permissions(dir)?;
    Ok(())
}

/// Default vault location: `~/.moltguard/token-vault.json`.
pub fn default_vault_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".moltguard").join(VAULT_FILE_NAME))
}

/// Load persisted entries, dropping anything already expired.
///
/// A missing file means a fresh vault. A corrupt file is treated as empty
/// with a log line; losing mappings is recoverable, refusing to start is not.
pub fn load_entries(path: &Path) -> Vec<VaultEntry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read vault file, starting empty");
            return Vec::new();
        }
    };

    let entries: Vec<VaultEntry> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt vault file, starting empty");
            return Vec::new();
        }
    };

    let now = Utc::now();
    let total = entries.len();
    let live: Vec<VaultEntry> = entries.into_iter().filter(|e| e.expires_at > now).collect();
    if live.len() < total {
        tracing::debug!(expired = total - live.len(), "skipped expired vault entries on load");
    }
    live
}

/// Write the full entry set atomically: sibling `.tmp`, fsync, rename.
pub fn write_entries(path: &Path, entries: &[VaultEntry]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let payload = serde_json::to_vec_pretty(entries)?;

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&payload)?;
        tmp.sync_all()?;
    }
    restrict_file_permissions(&tmp_path)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use chrono::Duration;
    use uuid::Uuid;

    fn entry(token: &str, original: &str, expires_in_secs: i64) -> VaultEntry {
        let now = Utc::now();
        VaultEntry {
            token: token.to_string(),
            original_value: original.to_string(),
            category: Category::Ssn,
            session_id: Uuid::new_v4(),
            created_at: now,
            last_accessed_at: now,
            expires_at: now + Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn test_write_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VAULT_FILE_NAME);
        let entries = vec![entry("[ssn_1]", "123-45-6789", 3600)];
        write_entries(&path, &entries).unwrap();

        let loaded = load_entries(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].token, "[ssn_1]");
        assert_eq!(loaded[0].original_value, "123-45-6789");
    }

    #[test]
    fn test_expired_entries_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VAULT_FILE_NAME);
        let entries = vec![entry("[ssn_1]", "123-45-6789", -10), entry("[ein_1]", "12-3456789", 3600)];
        write_entries(&path, &entries).unwrap();

        let loaded = load_entries(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].token, "[ein_1]");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_entries(&dir.path().join("absent.json")).is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VAULT_FILE_NAME);
        fs::write(&path, "{ definitely not an array").unwrap();
        assert!(load_entries(&path).is_empty());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VAULT_FILE_NAME);
        write_entries(&path, &[entry("[ssn_1]", "x", 60)]).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VAULT_FILE_NAME);
        write_entries(&path, &[entry("[ssn_1]", "x", 60)]).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_dir_lock_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let first = DirLock::acquire(dir.path()).unwrap();
        assert!(DirLock::acquire(dir.path()).is_err());
        drop(first);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
