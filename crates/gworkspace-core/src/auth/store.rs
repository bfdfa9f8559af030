//! Owner-only persistence for the local token file
//!
//! Files are written to a temporary sibling that is created with mode 0600
//! and then renamed over the target, so the token is never readable by other
//! users, not even briefly.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::credential::TokenFile;
use crate::error::{Error, Result};

/// File-backed token storage
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the token file. A missing file is `Ok(None)`; an unreadable or
    /// malformed one is an error.
    pub fn load(&self) -> Result<Option<TokenFile>> {
        if !self.path.exists() {
            debug!("No token file at {:?}", self.path);
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let file = serde_json::from_str(&contents)
            .map_err(|e| Error::Token(format!("Malformed token file {:?}: {}", self.path, e)))?;
        Ok(Some(file))
    }

    /// Persist the token file with owner-only permissions
    pub fn save(&self, file: &TokenFile) -> Result<()> {
        let contents = serde_json::to_vec_pretty(file)?;
        write_private(&self.path, &contents)?;
        debug!("Saved token to {:?}", self.path);
        Ok(())
    }

    /// Remove the token file. Returns false if there was nothing to remove.
    pub fn delete(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed token file {:?}", self.path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Atomically write `contents` to `path`, readable only by the owner.
///
/// The parent directory is created (0700 on Unix) when missing.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Token(format!("Invalid file path: {:?}", path)))?
        .to_string_lossy();

    create_private_dir(&parent)?;

    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));
    let result = write_and_rename(&tmp, path, contents);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    let mut file = open_private(tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(tmp, target)?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    // The umask can only narrow the mode; pin it exactly
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::DEFAULT_TOKEN_URI;

    fn sample() -> TokenFile {
        TokenFile {
            token: Some("ya29.access".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec![],
            expiry: None,
        }
    }

    #[cfg(unix)]
    fn mode(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = TokenStore::new(&path);
        assert!(matches!(store.load(), Err(Error::Token(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("token.json"));
        store.save(&sample()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token.as_deref(), Some("ya29.access"));
        assert_eq!(loaded.client_id, "client");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_first_save_is_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("gworkspace");
        let store = TokenStore::new(config_dir.join("token.json"));
        store.save(&sample()).unwrap();

        assert_eq!(mode(store.path()), 0o600);
        assert_eq!(mode(&config_dir), 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_resave_narrows_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = TokenStore::new(&path);
        store.save(&sample()).unwrap();
        assert_eq!(mode(&path), 0o600);

        let mut refreshed = sample();
        refreshed.token = Some("ya29.second".to_string());
        store.save(&refreshed).unwrap();
        assert_eq!(mode(&path), 0o600);
        assert_eq!(store.load().unwrap().unwrap().token.as_deref(), Some("ya29.second"));
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(!store.delete().unwrap());
        store.save(&sample()).unwrap();
        assert!(store.delete().unwrap());
        assert!(!store.exists());
    }
}
