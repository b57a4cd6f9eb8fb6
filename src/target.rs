//! Target identity resolution
//!
//! Every filesystem operation in the run acts on exactly one (user, home)
//! pair, resolved here once. Precedence for the user: `HOMESTEAD_USER` env
//! override, then `--user`, then a context-derived default:
//!
//! - elevated + unattended: the sudo invoker if recorded, else the
//!   lowest-uid regular user on the host
//! - elevated + attended: root itself
//! - not elevated: the invoking user

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::context::ExecutionContext;
use crate::error::SetupError;
use crate::users::{UserDatabase, UserEntry};

/// Environment variable overriding the target user (highest precedence)
pub const ENV_TARGET_USER: &str = "HOMESTEAD_USER";

/// Environment variable overriding the target home directory
pub const ENV_TARGET_HOME: &str = "HOMESTEAD_HOME";

/// Well-known superuser home
#[cfg(target_os = "macos")]
const ROOT_HOME: &str = "/var/root";
#[cfg(not(target_os = "macos"))]
const ROOT_HOME: &str = "/root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl TargetIdentity {
    fn from_entry(entry: UserEntry, home_override: Option<&str>) -> Self {
        let home = match home_override {
            Some(path) => crate::manifest::expand_path(path),
            None if entry.uid == 0 => PathBuf::from(ROOT_HOME),
            None => entry.home.clone(),
        };
        Self {
            user: entry.name,
            uid: entry.uid,
            gid: entry.gid,
            home,
        }
    }
}

/// Resolve the target identity from the detected context plus overrides,
/// reading the override environment variables.
pub fn resolve(
    ctx: &ExecutionContext,
    arg_user: Option<&str>,
    db: &dyn UserDatabase,
) -> Result<TargetIdentity, SetupError> {
    let env_user = std::env::var(ENV_TARGET_USER).ok();
    let env_home = std::env::var(ENV_TARGET_HOME).ok();
    resolve_with(ctx, env_user.as_deref(), arg_user, env_home.as_deref(), db)
}

/// Override-aware resolution, separated from environment reads for testing
pub fn resolve_with(
    ctx: &ExecutionContext,
    env_user: Option<&str>,
    arg_user: Option<&str>,
    env_home: Option<&str>,
    db: &dyn UserDatabase,
) -> Result<TargetIdentity, SetupError> {
    let entry = match env_user.or(arg_user) {
        Some(name) => db
            .lookup(name)
            .ok_or_else(|| SetupError::UserNotFound(name.to_string()))?,
        None if ctx.elevated && ctx.unattended => {
            // Freshly provisioned host: install for the primary account, not root
            let invoker = ctx
                .sudo_invoker
                .as_deref()
                .and_then(|name| db.lookup(name));
            match invoker.or_else(|| db.primary_user()) {
                Some(entry) => entry,
                None => {
                    return Err(SetupError::UserNotFound(
                        "no regular user found on this host".to_string(),
                    ));
                }
            }
        }
        None if ctx.elevated => db
            .lookup("root")
            .ok_or_else(|| SetupError::UserNotFound("root".to_string()))?,
        None => db
            .lookup(&ctx.invoking_user)
            .ok_or_else(|| SetupError::UserNotFound(ctx.invoking_user.clone()))?,
    };

    let target = TargetIdentity::from_entry(entry, env_home);
    log::info!(
        "target: user={} uid={} home={}",
        target.user,
        target.uid,
        target.home.display()
    );
    Ok(target)
}

/// Make sure the target home exists before any resource work starts.
/// Creation is only possible when elevated; the fresh directory is owned by
/// the target user with mode 0755.
pub fn ensure_home(ctx: &ExecutionContext, target: &TargetIdentity) -> Result<(), SetupError> {
    if target.home.is_dir() {
        return Ok(());
    }

    if !ctx.elevated {
        return Err(SetupError::HomeUnavailable(format!(
            "{} does not exist and cannot be created without elevation",
            target.home.display()
        )));
    }

    log::info!("creating home directory {}", target.home.display());
    fs::create_dir_all(&target.home)
        .map_err(|e| SetupError::HomeUnavailable(format!("{}: {e}", target.home.display())))?;
    fs::set_permissions(&target.home, fs::Permissions::from_mode(0o755))
        .map_err(|e| SetupError::Filesystem(format!("{}: {e}", target.home.display())))?;
    std::os::unix::fs::chown(&target.home, Some(target.uid), Some(target.gid))
        .map_err(|e| SetupError::PermissionDenied(format!("{}: {e}", target.home.display())))?;

    Ok(())
}
