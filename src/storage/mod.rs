//! Download destinations.
//!
//! A local destination receives files directly. A remote destination
//! stages them in temporary local storage and uploads them through a
//! [`RemoteStore`]; the shipped store writes into a locally mounted share.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{Destination, Settings};
use crate::error::ScrapeError;
use crate::metadata::{nfo_path, write_nfo, FinalMetadata};

/// What a remote store reports about a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttributes {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Remote storage collaborator. Paths are relative to the store root.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Upload `local` to `path`. Returns `false` when the file was already
    /// present and `overwrite` is off.
    async fn upload(&self, local: &Path, path: &str, overwrite: bool) -> Result<bool>;

    async fn attributes(&self, path: &str) -> Result<Option<RemoteAttributes>>;
}

/// Rename, falling back to copy and delete across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("rename {} failed ({}); copying", from.display(), e);
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

/// A share mounted into the local filesystem.
pub struct MountedShare {
    root: PathBuf,
}

impl MountedShare {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteStore for MountedShare {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn upload(&self, local: &Path, path: &str, overwrite: bool) -> Result<bool> {
        let target = self.resolve(path);
        if !overwrite && tokio::fs::try_exists(&target).await? {
            info!("File '{}' exists on share. Skipping.", path);
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        // Copy under a temporary name so a partial upload never looks complete.
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        tokio::fs::copy(local, &partial)
            .await
            .with_context(|| format!("Failed to copy {} to {}", local.display(), partial.display()))?;
        tokio::fs::rename(&partial, &target)
            .await
            .with_context(|| format!("Failed to finish upload to {}", target.display()))?;
        Ok(true)
    }

    async fn attributes(&self, path: &str) -> Result<Option<RemoteAttributes>> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(Some(RemoteAttributes {
                size: meta.len(),
                modified: meta.modified().ok(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Where an item was finally put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Stored(String),
    /// Already present at the destination.
    Skipped(String),
}

enum Target {
    Local {
        dir: PathBuf,
    },
    Remote {
        store: Box<dyn RemoteStore>,
        dir: String,
        staging: PathBuf,
    },
}

/// The configured destination of a run.
pub struct Storage {
    target: Target,
}

fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Storage {
    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Local { dir: dir.into() },
        }
    }

    pub fn remote(store: Box<dyn RemoteStore>, dir: impl Into<String>, staging: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Remote {
                store,
                dir: dir.into(),
                staging: staging.into(),
            },
        }
    }

    /// Build the first configured destination.
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.destination() {
            Destination::Local { path } => Self::local(settings.resolve_path(&path)),
            Destination::Remote {
                share,
                path,
                temporary_storage,
            } => {
                let staging = temporary_storage
                    .map(|t| settings.resolve_path(&t))
                    .unwrap_or_else(|| std::env::temp_dir().join("sitegrab"));
                Self::remote(Box::new(MountedShare::new(settings.resolve_path(&share))), path, staging)
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.target, Target::Remote { .. })
    }

    /// Where a download named `filename` is written first.
    pub async fn working_path(&self, filename: &str) -> std::io::Result<PathBuf> {
        let dir = match &self.target {
            Target::Local { dir } => dir,
            Target::Remote { staging, .. } => staging,
        };
        tokio::fs::create_dir_all(dir).await?;
        Ok(dir.join(filename))
    }

    /// Whether `filename` is already on the remote destination. Always
    /// `false` for local destinations, whose files are probed instead.
    pub async fn exists_remotely(&self, filename: &str) -> Result<bool, ScrapeError> {
        match &self.target {
            Target::Local { .. } => Ok(false),
            Target::Remote { store, dir, .. } => store
                .exists(&join_remote(dir, filename))
                .await
                .map_err(|e| ScrapeError::UploadFailed(format!("{:#}", e))),
        }
    }

    /// Make sure a remote item has its sidecar, writing one through the
    /// staging area when it is missing or `regenerate` is set.
    pub async fn ensure_remote_nfo(
        &self,
        filename: &str,
        meta: &FinalMetadata,
        regenerate: bool,
    ) -> Result<(), ScrapeError> {
        let Target::Remote { store, dir, staging } = &self.target else {
            return Ok(());
        };
        let remote_nfo = join_remote(dir, &file_name(&nfo_path(Path::new(filename))));
        let exists = store
            .exists(&remote_nfo)
            .await
            .map_err(|e| ScrapeError::UploadFailed(format!("{:#}", e)))?;
        if exists && !regenerate {
            return Ok(());
        }
        tokio::fs::create_dir_all(staging).await?;
        let (local_nfo, _) = write_nfo(&staging.join(filename), meta, true)
            .await
            .map_err(|e| ScrapeError::UploadFailed(format!("{:#}", e)))?;
        let result = store.upload(&local_nfo, &remote_nfo, true).await;
        let _ = tokio::fs::remove_file(&local_nfo).await;
        result.map_err(|e| ScrapeError::UploadFailed(format!("{:#}", e)))?;
        info!("Uploaded NFO to {}", remote_nfo);
        Ok(())
    }

    /// Move a finished download (and its sidecar, if any) to the final
    /// destination.
    ///
    /// Remote: skip when already present unless `overwrite`, upload, then
    /// delete the local copies. Local: files written in place stay put;
    /// anything else is moved in, skipping existing files.
    pub async fn finish(&self, local: &Path, overwrite: bool) -> Result<Placement, ScrapeError> {
        let name = file_name(local);
        match &self.target {
            Target::Remote { store, dir, .. } => {
                let remote = join_remote(dir, &name);
                let upload_err = |e: anyhow::Error| ScrapeError::UploadFailed(format!("{}: {:#}", remote, e));
                if !overwrite && store.exists(&remote).await.map_err(upload_err)? {
                    info!("File exists on share at {}. Skipping upload.", remote);
                    return Ok(Placement::Skipped(remote));
                }
                store.upload(local, &remote, overwrite).await.map_err(upload_err)?;
                tokio::fs::remove_file(local).await?;

                let local_nfo = nfo_path(local);
                if tokio::fs::try_exists(&local_nfo).await.unwrap_or(false) {
                    let remote_nfo = join_remote(dir, &file_name(&local_nfo));
                    store
                        .upload(&local_nfo, &remote_nfo, overwrite)
                        .await
                        .map_err(|e| ScrapeError::UploadFailed(format!("{}: {:#}", remote_nfo, e)))?;
                    tokio::fs::remove_file(&local_nfo).await?;
                }
                info!("Uploaded to share: {}", remote);
                Ok(Placement::Stored(remote))
            }
            Target::Local { dir } => {
                let final_path = dir.join(&name);
                if local == final_path {
                    return Ok(Placement::Stored(final_path.display().to_string()));
                }
                if !overwrite && tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
                    info!("File exists locally at {}. Skipping move.", final_path.display());
                    return Ok(Placement::Skipped(final_path.display().to_string()));
                }
                move_file(local, &final_path).await?;
                info!("Moved to local destination: {}", final_path.display());
                Ok(Placement::Stored(final_path.display().to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory remote store.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    pub struct MemoryStore {
        pub files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        pub fail_uploads: bool,
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        async fn exists(&self, path: &str) -> Result<bool> {
            Ok(self.files.lock().unwrap().contains_key(path))
        }

        async fn upload(&self, local: &Path, path: &str, overwrite: bool) -> Result<bool> {
            if self.fail_uploads {
                anyhow::bail!("share unreachable");
            }
            if !overwrite && self.files.lock().unwrap().contains_key(path) {
                return Ok(false);
            }
            let data = tokio::fs::read(local).await?;
            self.files.lock().unwrap().insert(path.to_string(), data);
            Ok(true)
        }

        async fn attributes(&self, path: &str) -> Result<Option<RemoteAttributes>> {
            Ok(self.files.lock().unwrap().get(path).map(|d| RemoteAttributes {
                size: d.len() as u64,
                modified: None,
            }))
        }
    }
}
