//! Ownership correction after elevated mutations
//!
//! Anything we create while running as root on behalf of another user must end
//! up owned by that user, or the next login breaks in confusing ways.

use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

use crate::context::ExecutionContext;
use crate::target::TargetIdentity;

/// Set owner:group of `path` (and descendants if `recursive`) to the target
/// user. No-op unless the process is elevated and the invoking identity
/// differs from the target.
pub fn fix(
    ctx: &ExecutionContext,
    target: &TargetIdentity,
    path: &Path,
    recursive: bool,
) -> Result<()> {
    if !ctx.elevated || ctx.invoking_user == target.user {
        return Ok(());
    }

    if recursive && path.is_dir() {
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
            chown_one(entry.path(), target)?;
        }
    } else {
        chown_one(path, target)?;
    }

    log::debug!(
        "chown {}:{} {} (recursive={recursive})",
        target.uid,
        target.gid,
        path.display()
    );
    Ok(())
}

fn chown_one(path: &Path, target: &TargetIdentity) -> Result<()> {
    // lchown so a symlink itself is re-owned, not what it points at
    std::os::unix::fs::lchown(path, Some(target.uid), Some(target.gid))
        .with_context(|| format!("Failed to chown {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target(user: &str) -> TargetIdentity {
        TargetIdentity {
            user: user.to_string(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/x"),
        }
    }

    #[test]
    fn test_noop_when_not_elevated() {
        let ctx = ExecutionContext {
            invoking_user: "alice".to_string(),
            euid: 1000,
            elevated: false,
            unattended: false,
            sudo_invoker: None,
        };
        // Would fail with EPERM if it actually attempted a chown to uid 1000
        let dir = tempfile::tempdir().unwrap();
        assert!(fix(&ctx, &target("bob"), dir.path(), true).is_ok());
    }

    #[test]
    fn test_noop_when_same_identity() {
        let ctx = ExecutionContext {
            invoking_user: "root".to_string(),
            euid: 0,
            elevated: true,
            unattended: false,
            sudo_invoker: None,
        };
        let dir = tempfile::tempdir().unwrap();
        assert!(fix(&ctx, &target("root"), dir.path(), true).is_ok());
    }
}
