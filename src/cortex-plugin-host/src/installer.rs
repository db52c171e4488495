//! Selective extraction of one plugin's subtree from a repository archive.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use crate::identity::Identity;
use crate::{PluginError, Result};

/// Result of an install call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Install directory
    pub path: PathBuf,
    /// The directory already existed and nothing was written
    pub skipped: bool,
    /// Files written from the archive
    pub files_written: usize,
}

/// Extracts plugins into `{plugins_dir}/{owner}/{repo}/{name}-{branch}`.
pub struct SelectiveInstaller {
    plugins_dir: PathBuf,
}

impl SelectiveInstaller {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn install_path(&self, identity: &Identity) -> PathBuf {
        identity.install_dir(&self.plugins_dir)
    }

    pub fn is_installed(&self, identity: &Identity) -> bool {
        self.install_path(identity).is_dir()
    }

    /// Extract the entries under `<archive root>/<name>/` into the install directory.
    ///
    /// An existing install directory is left untouched unless `force` is set,
    /// in which case files are overwritten in place.
    pub async fn install(
        &self,
        identity: &Identity,
        archive: Bytes,
        force: bool,
    ) -> Result<InstallReport> {
        let dest = self.install_path(identity);

        if dest.is_dir() && !force {
            tracing::debug!(plugin = %identity, "Already extracted at {:?}", dest);
            return Ok(InstallReport {
                path: dest,
                skipped: true,
                files_written: 0,
            });
        }

        let name = identity.name.clone();
        let target = dest.clone();
        let files_written = tokio::task::spawn_blocking(move || {
            extract_subtree(&archive, &name, &target)
        })
        .await
        .map_err(|e| PluginError::Archive(format!("Extraction task failed: {}", e)))??;

        if files_written == 0 {
            tracing::warn!(plugin = %identity, "Archive contains no files for '{}'", identity.name);
        } else {
            tracing::info!(plugin = %identity, "Extracted {} files to {:?}", files_written, dest);
        }

        Ok(InstallReport {
            path: dest,
            skipped: false,
            files_written,
        })
    }

    /// Delete the install directory and prune empty `{repo}` and `{owner}` parents.
    pub async fn uninstall(&self, identity: &Identity) -> Result<()> {
        let dest = self.install_path(identity);

        if dest.exists() {
            tokio::fs::remove_dir_all(&dest)
                .await
                .map_err(|e| PluginError::filesystem_error(&dest, e.to_string()))?;
        }

        let mut parent = dest.parent();
        while let Some(dir) = parent {
            if dir == self.plugins_dir || !dir.starts_with(&self.plugins_dir) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            parent = dir.parent();
        }

        Ok(())
    }
}

fn extract_subtree(archive: &[u8], name: &str, dest: &Path) -> Result<usize> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    std::fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let entry_name = entry.name().to_string();

        let Some(relative) = select_entry(&entry_name, name) else {
            continue;
        };

        let outpath = match safe_join(dest, &relative) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Skipping archive entry {}: {}", entry_name, e);
                continue;
            }
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
            written += 1;
        }
    }

    Ok(written)
}

/// Path of an entry relative to the plugin root, if it belongs to `name`.
///
/// Archive paths look like `repo-branch/name/...`.
fn select_entry(entry_name: &str, name: &str) -> Option<String> {
    let segments: Vec<&str> = entry_name.split('/').collect();
    if segments.len() < 3 || segments[1] != name {
        return None;
    }

    let relative = segments[2..].join("/");
    let relative = relative.trim_end_matches('/');
    if relative.is_empty() {
        None
    } else {
        Some(relative.to_string())
    }
}

/// Join an archive path onto `dest`, rejecting anything that could escape it.
fn safe_join(dest: &Path, relative: &str) -> std::result::Result<PathBuf, String> {
    if relative.contains('\0') {
        return Err("Path contains null byte".to_string());
    }

    let path = Path::new(relative);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("Path traversal not allowed: {}", relative));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Absolute path not allowed: {}", relative));
            }
        }
    }

    Ok(dest.join(path))
}
