//! Resource model
//!
//! A resource is a declarative description of one thing to reconcile into the
//! target home. The list is static configuration; the only runtime derivation
//! is destination interpolation against the resolved home directory.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Copy one file into place
    FileCopy,
    /// Copy a directory tree into place, overwriting files, keeping extras
    DirectoryMerge,
    /// Clone or update a git repository
    GitRepository,
    /// Download a binary or tar.gz archive and install one file from it
    Download,
    /// Create a symlink
    Symlink,
}

impl ResourceKind {
    /// Whether acquisition reaches over the network
    pub fn is_remote(self) -> bool {
        matches!(self, ResourceKind::GitRepository | ResourceKind::Download)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    /// Symbolic name used in logs and the summary
    pub name: String,
    pub kind: ResourceKind,
    /// Local path or URL, depending on kind
    pub source: String,
    /// Destination under the target home; `{home}` is interpolated, relative
    /// paths are joined onto the home directory
    pub dest: String,
    /// Subpath that must exist after acquisition
    #[serde(default)]
    pub verify: Option<String>,
    /// Shallow clone depth for git repositories
    #[serde(default)]
    pub depth: Option<u32>,
    /// Subpath inside a downloaded archive to install as `dest`
    #[serde(default)]
    pub extract: Option<String>,
}

impl Resource {
    /// Destination path with the resolved home applied. `{home}` and a
    /// leading `~` are interpolated; a tilde elsewhere is a literal filename
    /// character.
    pub fn dest_path(&self, home: &Path) -> PathBuf {
        let interpolated = self.dest.replace("{home}", &home.to_string_lossy());
        let path = if interpolated == "~" {
            home.to_path_buf()
        } else if let Some(rest) = interpolated.strip_prefix("~/") {
            home.join(rest)
        } else {
            PathBuf::from(interpolated)
        };
        if path.is_absolute() {
            path
        } else {
            home.join(path)
        }
    }
}

/// Per-resource outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    Created,
    Updated,
    /// Already current, nothing to do
    Skipped,
    Failed,
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            ReconcileStatus::Created => "created",
            ReconcileStatus::Updated => "updated",
            ReconcileStatus::Skipped => "skipped",
            ReconcileStatus::Failed => "failed",
        };
        write!(f, "{word}")
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub name: String,
    pub status: ReconcileStatus,
    pub detail: String,
}

impl ReconciliationResult {
    pub fn new(name: &str, status: ReconcileStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(dest: &str) -> Resource {
        Resource {
            name: "r".to_string(),
            kind: ResourceKind::FileCopy,
            source: "/src".to_string(),
            dest: dest.to_string(),
            verify: None,
            depth: None,
            extract: None,
        }
    }

    #[test]
    fn test_dest_relative_joins_home() {
        let home = Path::new("/home/alice");
        assert_eq!(
            resource(".zshrc").dest_path(home),
            PathBuf::from("/home/alice/.zshrc")
        );
    }

    #[test]
    fn test_dest_home_placeholder() {
        let home = Path::new("/home/alice");
        assert_eq!(
            resource("{home}/.config/lsd").dest_path(home),
            PathBuf::from("/home/alice/.config/lsd")
        );
    }

    #[test]
    fn test_dest_tilde() {
        let home = Path::new("/home/alice");
        assert_eq!(
            resource("~/.oh-my-zsh").dest_path(home),
            PathBuf::from("/home/alice/.oh-my-zsh")
        );
    }

    #[test]
    fn test_dest_interior_tilde_is_literal() {
        let home = Path::new("/home/alice");
        assert_eq!(
            resource("notes~old").dest_path(home),
            PathBuf::from("/home/alice/notes~old")
        );
        assert_eq!(resource("~").dest_path(home), PathBuf::from("/home/alice"));
    }

    #[test]
    fn test_dest_absolute_kept() {
        let home = Path::new("/home/alice");
        assert_eq!(
            resource("/opt/tool").dest_path(home),
            PathBuf::from("/opt/tool")
        );
    }

    #[test]
    fn test_remote_kinds() {
        assert!(ResourceKind::GitRepository.is_remote());
        assert!(ResourceKind::Download.is_remote());
        assert!(!ResourceKind::FileCopy.is_remote());
        assert!(!ResourceKind::Symlink.is_remote());
        assert!(!ResourceKind::DirectoryMerge.is_remote());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ReconcileStatus::Created.to_string(), "created");
        assert_eq!(ReconcileStatus::Failed.to_string(), "failed");
    }
}
