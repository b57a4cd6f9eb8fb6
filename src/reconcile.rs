//! Resource reconciliation - the core loop
//!
//! For each declared resource: determine local state, acquire or update it,
//! verify the result, and record exactly one outcome. A failed resource never
//! stops the batch; the resources are independent and the run must always
//! reach the summary.

use anyhow::{Context, Result, anyhow, bail};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::context::ExecutionContext;
use crate::error::SetupError;
use crate::ownership;
use crate::resource::{ReconcileStatus, ReconciliationResult, Resource, ResourceKind};
use crate::retry::{RetryPolicy, with_retry};
use crate::runner;
use crate::target::TargetIdentity;

/// Field names whose presence in an existing dotfile marks it as hand-edited
/// with credentials; such files are never overwritten.
const CREDENTIAL_MARKERS: &[&str] = &[
    "token",
    "api_key",
    "apikey",
    "secret",
    "password",
    "private_key",
    "credential",
];

pub struct Reconciler<'a> {
    ctx: &'a ExecutionContext,
    target: &'a TargetIdentity,
    policy: RetryPolicy,
    /// Base directory for relative local sources (dotfile payloads)
    source_root: PathBuf,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        ctx: &'a ExecutionContext,
        target: &'a TargetIdentity,
        policy: RetryPolicy,
        source_root: PathBuf,
        dry_run: bool,
    ) -> Self {
        Self {
            ctx,
            target,
            policy,
            source_root,
            dry_run,
        }
    }

    /// Reconcile every resource in declaration order. Never aborts early.
    pub fn reconcile_all(&self, resources: &[Resource]) -> Vec<ReconciliationResult> {
        let mut results = Vec::with_capacity(resources.len());

        for resource in resources {
            log::info!("reconciling {} ({:?})", resource.name, resource.kind);
            let result = self.reconcile(resource);
            match result.status {
                ReconcileStatus::Failed => {
                    log::error!("{}: {}", result.name, result.detail);
                }
                status => log::info!("{}: {status} {}", result.name, result.detail),
            }
            results.push(result);
        }

        results
    }

    /// Reconcile one resource, converting any error into a Failed result.
    pub fn reconcile(&self, resource: &Resource) -> ReconciliationResult {
        let dest = resource.dest_path(&self.target.home);

        if self.dry_run {
            let action = if dest.exists() {
                "update"
            } else if resource.kind.is_remote() {
                "fetch"
            } else {
                "install"
            };
            return ReconciliationResult::new(
                &resource.name,
                ReconcileStatus::Skipped,
                format!("dry run: would {action} {}", dest.display()),
            );
        }

        let existed = dest.exists();
        match self.converge(resource, &dest) {
            Ok((status, detail)) => ReconciliationResult::new(&resource.name, status, detail),
            Err(e) => {
                self.cleanup_partial(resource, &dest, existed);
                ReconciliationResult::new(&resource.name, ReconcileStatus::Failed, format!("{e:#}"))
            }
        }
    }

    fn converge(&self, resource: &Resource, dest: &Path) -> Result<(ReconcileStatus, String)> {
        let outcome = match resource.kind {
            ResourceKind::FileCopy => {
                if dest.exists() {
                    self.update_file(resource, dest)?
                } else {
                    self.acquire(resource, dest, |r, d| self.copy_file(r, d))?
                }
            }
            ResourceKind::DirectoryMerge => self.merge_directory(resource, dest)?,
            ResourceKind::GitRepository => {
                if self.git_clone_present(dest)? {
                    self.update_git(resource, dest)?
                } else {
                    self.acquire(resource, dest, |r, d| self.clone_git(r, d))?
                }
            }
            ResourceKind::Download => {
                if dest.exists() {
                    (ReconcileStatus::Skipped, "already installed".to_string())
                } else {
                    self.acquire(resource, dest, |r, d| self.download(r, d))?
                }
            }
            ResourceKind::Symlink => self.converge_symlink(resource, dest)?,
        };
        Ok(outcome)
    }

    /// Shared ABSENT path: ensure the parent, run the kind-specific acquire
    /// action, verify, then correct ownership.
    fn acquire<F>(
        &self,
        resource: &Resource,
        dest: &Path,
        action: F,
    ) -> Result<(ReconcileStatus, String)>
    where
        F: FnOnce(&Resource, &Path) -> Result<String>,
    {
        self.ensure_parent(dest)?;
        let detail = action(resource, dest)?;
        self.verify(resource, dest)?;
        ownership::fix(self.ctx, self.target, dest, dest.is_dir())?;
        Ok((ReconcileStatus::Created, detail))
    }

    // ------------------------------------------------------------------
    // file-copy
    // ------------------------------------------------------------------

    fn copy_file(&self, resource: &Resource, dest: &Path) -> Result<String> {
        let source = self.local_source(resource);
        fs::copy(&source, dest)
            .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;
        Ok(format!("copied from {}", source.display()))
    }

    fn update_file(&self, resource: &Resource, dest: &Path) -> Result<(ReconcileStatus, String)> {
        if destination_has_credentials(dest) {
            return Ok((
                ReconcileStatus::Skipped,
                "sensitive content preserved".to_string(),
            ));
        }

        let backup = backup_path(dest);
        fs::copy(dest, &backup)
            .with_context(|| format!("Failed to back up {}", dest.display()))?;
        let detail = self.copy_file(resource, dest)?;
        self.verify(resource, dest)?;
        ownership::fix(self.ctx, self.target, dest, false)?;
        ownership::fix(self.ctx, self.target, &backup, false)?;

        Ok((
            ReconcileStatus::Updated,
            format!("{detail} (backup: {})", backup.display()),
        ))
    }

    // ------------------------------------------------------------------
    // directory-merge
    // ------------------------------------------------------------------

    fn merge_directory(&self, resource: &Resource, dest: &Path) -> Result<(ReconcileStatus, String)> {
        let source = self.local_source(resource);
        if !source.is_dir() {
            bail!("source directory missing: {}", source.display());
        }

        let existed = dest.is_dir();
        let mut copied = 0usize;

        for entry in WalkDir::new(&source).follow_links(false) {
            let entry = entry?;
            let relative = entry.path().strip_prefix(&source)?;
            if relative.as_os_str().is_empty() {
                continue;
            }
            let into = dest.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&into)?;
            } else {
                if let Some(parent) = into.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &into).with_context(|| {
                    format!("Failed to copy {} to {}", entry.path().display(), into.display())
                })?;
                copied += 1;
            }
        }

        self.verify(resource, dest)?;
        ownership::fix(self.ctx, self.target, dest, true)?;

        let status = if existed {
            ReconcileStatus::Updated
        } else {
            ReconcileStatus::Created
        };
        Ok((status, format!("merged {copied} files")))
    }

    // ------------------------------------------------------------------
    // git-repository
    // ------------------------------------------------------------------

    /// A destination directory without the `.git` marker is a corrupt or
    /// partial clone; remove it and treat the resource as absent.
    fn git_clone_present(&self, dest: &Path) -> Result<bool> {
        if !dest.exists() {
            return Ok(false);
        }
        if dest.join(".git").exists() {
            return Ok(true);
        }
        log::warn!("removing corrupt clone at {}", dest.display());
        fs::remove_dir_all(dest)
            .with_context(|| format!("Failed to remove corrupt clone {}", dest.display()))?;
        Ok(false)
    }

    fn clone_git(&self, resource: &Resource, dest: &Path) -> Result<String> {
        let args = clone_args(resource, dest);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        with_retry(&self.policy, || {
            let out = runner::run_as(self.ctx, self.target, "git", &arg_refs, None)?;
            if out.success() {
                Ok(())
            } else {
                // A half-written clone would poison the next attempt
                let _ = fs::remove_dir_all(dest);
                Err(anyhow!("git clone failed: {}", out.detail()))
            }
        })
        .map_err(|e| SetupError::Network(format!("{e:#}")))?;

        if !dest.join(".git").exists() {
            bail!("clone completed but {} has no .git", dest.display());
        }
        Ok(format!("cloned {}", resource.source))
    }

    /// PRESENT path for git: fetch, converge onto the remote's default
    /// branch, fast-forward, falling back to a hard reset. If even the reset
    /// fails the existing clone is left untouched.
    fn update_git(&self, resource: &Resource, dest: &Path) -> Result<(ReconcileStatus, String)> {
        let cwd = Some(dest);

        with_retry(&self.policy, || {
            let out = runner::run_as(self.ctx, self.target, "git", &["fetch", "origin"], cwd)?;
            if out.success() {
                Ok(())
            } else {
                Err(anyhow!("git fetch failed: {}", out.detail()))
            }
        })
        .map_err(|e| SetupError::Network(format!("{e:#}")))?;

        let branch = self.remote_default_branch(dest);
        let remote_ref = format!("origin/{branch}");

        let head = runner::run_as(
            self.ctx,
            self.target,
            "git",
            &["rev-parse", "--abbrev-ref", "HEAD"],
            cwd,
        )?;
        if head.stdout != branch {
            let checkout = runner::run_as(self.ctx, self.target, "git", &["checkout", &branch], cwd)?;
            if !checkout.success() {
                runner::run_as_checked(
                    self.ctx,
                    self.target,
                    "git",
                    &["checkout", "-b", &branch, &remote_ref],
                    cwd,
                )?;
            }
        }

        let pull = runner::run_as(
            self.ctx,
            self.target,
            "git",
            &["pull", "--ff-only", "origin", &branch],
            cwd,
        )?;
        if pull.success() {
            ownership::fix(self.ctx, self.target, dest, true)?;
            return Ok((ReconcileStatus::Updated, format!("fast-forwarded to {remote_ref}")));
        }

        log::warn!(
            "{}: fast-forward failed ({}), falling back to hard reset",
            resource.name,
            pull.detail()
        );
        let reset = runner::run_as(
            self.ctx,
            self.target,
            "git",
            &["reset", "--hard", &remote_ref],
            cwd,
        )?;
        if reset.success() {
            ownership::fix(self.ctx, self.target, dest, true)?;
            return Ok((ReconcileStatus::Updated, format!("hard reset to {remote_ref}")));
        }

        // Existing content is better than none
        log::warn!(
            "{}: update failed ({}), keeping existing clone",
            resource.name,
            reset.detail()
        );
        Ok((
            ReconcileStatus::Failed,
            format!("update failed, kept existing clone: {}", reset.detail()),
        ))
    }

    /// Determine the remote's default branch from origin/HEAD, asking the
    /// remote to set it if unset; falls back to "main".
    fn remote_default_branch(&self, dest: &Path) -> String {
        let cwd = Some(dest);
        let symref = &["symbolic-ref", "refs/remotes/origin/HEAD"];

        if let Ok(out) = runner::run_as(self.ctx, self.target, "git", symref, cwd)
            && out.success()
            && let Some(branch) = parse_origin_head(&out.stdout)
        {
            return branch;
        }

        let _ = runner::run_as(
            self.ctx,
            self.target,
            "git",
            &["remote", "set-head", "origin", "--auto"],
            cwd,
        );

        if let Ok(out) = runner::run_as(self.ctx, self.target, "git", symref, cwd)
            && out.success()
            && let Some(branch) = parse_origin_head(&out.stdout)
        {
            return branch;
        }

        "main".to_string()
    }

    // ------------------------------------------------------------------
    // download
    // ------------------------------------------------------------------

    fn download(&self, resource: &Resource, dest: &Path) -> Result<String> {
        let partial = dest.with_extension("partial");

        with_retry(&self.policy, || {
            download_to(&resource.source, &partial).inspect_err(|_| {
                let _ = fs::remove_file(&partial);
            })
        })
        .map_err(|e| SetupError::Network(format!("{e:#}")))?;

        if is_tarball(&resource.source) {
            self.install_from_archive(resource, &partial, dest)?;
            let _ = fs::remove_file(&partial);
        } else {
            fs::rename(&partial, dest)
                .with_context(|| format!("Failed to move download into {}", dest.display()))?;
        }

        fs::set_permissions(dest, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to mark {} executable", dest.display()))?;

        Ok(format!("downloaded {}", resource.source))
    }

    fn install_from_archive(&self, resource: &Resource, archive: &Path, dest: &Path) -> Result<()> {
        let unpack_dir = dest.with_extension("unpack");
        fs::create_dir_all(&unpack_dir)?;

        let result = (|| -> Result<()> {
            let file = fs::File::open(archive)?;
            tar::Archive::new(flate2::read::GzDecoder::new(file))
                .unpack(&unpack_dir)
                .context("Failed to extract archive")?;

            let wanted = resource.extract.as_deref().unwrap_or(&resource.name);
            let entry = locate_entry(&unpack_dir, wanted)
                .ok_or_else(|| anyhow!("archive has no entry named {wanted}"))?;

            if fs::rename(&entry, dest).is_err() {
                fs::copy(&entry, dest)
                    .with_context(|| format!("Failed to install {}", dest.display()))?;
            }
            Ok(())
        })();

        let _ = fs::remove_dir_all(&unpack_dir);
        result
    }

    // ------------------------------------------------------------------
    // symlink
    // ------------------------------------------------------------------

    fn converge_symlink(&self, resource: &Resource, dest: &Path) -> Result<(ReconcileStatus, String)> {
        let source = self.local_source(resource);

        if dest.is_symlink() {
            let current = fs::read_link(dest)?;
            if current == source {
                return Ok((ReconcileStatus::Skipped, "link already current".to_string()));
            }
            fs::remove_file(dest)
                .with_context(|| format!("Failed to remove stale link {}", dest.display()))?;
            self.make_link(&source, dest)?;
            return Ok((
                ReconcileStatus::Updated,
                format!("relinked -> {}", source.display()),
            ));
        }

        if dest.exists() {
            // A real file where the link should be is user data; leave it
            return Ok((
                ReconcileStatus::Skipped,
                format!("{} exists and is not a link", dest.display()),
            ));
        }

        self.ensure_parent(dest)?;
        self.make_link(&source, dest)?;
        Ok((ReconcileStatus::Created, format!("linked -> {}", source.display())))
    }

    fn make_link(&self, source: &Path, dest: &Path) -> Result<()> {
        std::os::unix::fs::symlink(source, dest).with_context(|| {
            format!("Failed to create symlink {} -> {}", dest.display(), source.display())
        })?;
        ownership::fix(self.ctx, self.target, dest, false)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // shared plumbing
    // ------------------------------------------------------------------

    fn local_source(&self, resource: &Resource) -> PathBuf {
        let expanded = crate::manifest::expand_path(&resource.source);
        if expanded.is_absolute() {
            expanded
        } else {
            self.source_root.join(expanded)
        }
    }

    fn ensure_parent(&self, dest: &Path) -> Result<()> {
        let Some(parent) = dest.parent() else {
            return Ok(());
        };
        if parent.is_dir() {
            return Ok(());
        }
        // create_dir_all can add several ancestor levels; all of them must
        // end up owned by the target, not just the immediate parent
        let chown_root = first_missing_ancestor(parent).unwrap_or_else(|| parent.to_path_buf());
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        ownership::fix(self.ctx, self.target, &chown_root, true)?;
        Ok(())
    }

    fn verify(&self, resource: &Resource, dest: &Path) -> Result<()> {
        if let Some(subpath) = &resource.verify {
            let marker = dest.join(subpath);
            if !marker.exists() {
                bail!("verification failed: {} missing", marker.display());
            }
        }
        Ok(())
    }

    /// Best-effort removal of a partially acquired resource so the next run
    /// starts from a clean ABSENT state. Update failures keep the old state;
    /// only fresh acquisitions are removed.
    fn cleanup_partial(&self, resource: &Resource, dest: &Path, existed: bool) {
        if resource.kind == ResourceKind::GitRepository && dest.join(".git").exists() {
            return;
        }
        if resource.kind == ResourceKind::FileCopy && dest.is_file() {
            return;
        }
        // A failed merge into a pre-existing directory must not take the
        // user's own files with it
        if resource.kind == ResourceKind::DirectoryMerge && existed {
            return;
        }
        let _ = ownership::fix(self.ctx, self.target, dest, true);
        if dest.is_dir() {
            let _ = fs::remove_dir_all(dest);
        } else if dest.exists() || dest.is_symlink() {
            let _ = fs::remove_file(dest);
        }
        let _ = fs::remove_file(dest.with_extension("partial"));
    }
}

fn clone_args(resource: &Resource, dest: &Path) -> Vec<String> {
    let mut args = vec!["clone".to_string()];
    if let Some(depth) = resource.depth {
        args.push("--depth".to_string());
        args.push(depth.to_string());
        args.push("--single-branch".to_string());
    }
    args.push(resource.source.clone());
    args.push(dest.to_string_lossy().to_string());
    args
}

/// Parse `refs/remotes/origin/<branch>` from symbolic-ref output
fn parse_origin_head(output: &str) -> Option<String> {
    output
        .trim()
        .strip_prefix("refs/remotes/origin/")
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Highest ancestor of `path` (inclusive) that does not exist yet; None when
/// `path` itself already exists.
fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut missing = None;
    let mut current = Some(path);
    while let Some(p) = current {
        if p.as_os_str().is_empty() || p.exists() {
            break;
        }
        missing = Some(p.to_path_buf());
        current = p.parent();
    }
    missing
}

fn backup_path(dest: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    PathBuf::from(format!("{}.{stamp}.bak", dest.display()))
}

fn destination_has_credentials(dest: &Path) -> bool {
    let Ok(content) = fs::read_to_string(dest) else {
        return false;
    };
    let lowered = content.to_lowercase();
    CREDENTIAL_MARKERS.iter().any(|m| lowered.contains(m))
}

fn is_tarball(source: &str) -> bool {
    source.ends_with(".tar.gz") || source.ends_with(".tgz")
}

fn download_to(url: &str, path: &Path) -> Result<()> {
    log::debug!("downloading {url}");
    let response = ureq::get(url)
        .call()
        .map_err(|e| anyhow!("download failed: {e}"))?;
    let mut reader = response.into_reader();
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    io::copy(&mut reader, &mut file)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Find a file by name anywhere under the unpack directory; release tarballs
/// differ in whether they nest a top-level directory.
fn locate_entry(unpack_dir: &Path, wanted: &str) -> Option<PathBuf> {
    let direct = unpack_dir.join(wanted);
    if direct.exists() {
        return Some(direct);
    }
    WalkDir::new(unpack_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy() == wanted)
        .map(|e| e.path().to_path_buf())
}
