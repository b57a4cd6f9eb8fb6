//! Execution context detection
//!
//! Answers three questions once, at process start: who invoked us, are we
//! running with superuser privileges, and is this an unattended (cloud-init /
//! CI) run. The answers are immutable for the rest of the run.

use crate::users::{PasswdDatabase, UserDatabase};

/// Environment variables that mark an unattended host
pub const CI_INDICATORS: &[&str] = &["CI", "GITHUB_ACTIONS", "CLOUD_INIT"];

/// If sudo recorded the invoking account, it lives here
pub const ENV_SUDO_USER: &str = "SUDO_USER";

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Account name of the process owner
    pub invoking_user: String,
    /// Effective uid of the process
    pub euid: u32,
    /// Whether the process runs as the superuser
    pub elevated: bool,
    /// Whether the run must not expect an interactive terminal
    pub unattended: bool,
    /// Account recorded by sudo, if we were invoked through it
    pub sudo_invoker: Option<String>,
}

impl ExecutionContext {
    /// Detect the context from the process environment. Never fails; an
    /// ambiguous unattended indicator defaults to attended.
    pub fn detect(cloud_init_flag: bool) -> Self {
        // SAFETY: geteuid has no failure modes
        let euid = unsafe { libc::geteuid() };
        let elevated = euid == 0;

        let invoking_user = invoking_user_name(euid);
        let unattended = cloud_init_flag || ci_indicator_present();

        let sudo_invoker = std::env::var(ENV_SUDO_USER)
            .ok()
            .filter(|s| !s.is_empty() && s != "root");

        log::debug!(
            "context: user={invoking_user} euid={euid} elevated={elevated} unattended={unattended}"
        );

        Self {
            invoking_user,
            euid,
            elevated,
            unattended,
            sudo_invoker,
        }
    }
}

fn ci_indicator_present() -> bool {
    CI_INDICATORS
        .iter()
        .any(|var| std::env::var(var).is_ok_and(|v| !v.is_empty() && v != "false"))
}

/// Name of the process owner: USER/LOGNAME if set, else the passwd entry for
/// our euid, else the uid rendered as a string.
fn invoking_user_name(euid: u32) -> String {
    if let Ok(name) = std::env::var("USER")
        && !name.is_empty()
    {
        return name;
    }
    if let Ok(name) = std::env::var("LOGNAME")
        && !name.is_empty()
    {
        return name;
    }
    PasswdDatabase::system()
        .lookup_uid(euid)
        .map(|e| e.name)
        .unwrap_or_else(|| euid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// Uses unsafe env::set_var/remove_var; only safe in single-threaded
    /// test contexts.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    fn without_env_var<F, R>(key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation
        unsafe { env::remove_var(key) };
        let result = f();
        if let Some(v) = original {
            // SAFETY: Tests run in isolation
            unsafe { env::set_var(key, v) };
        }
        result
    }

    #[test]
    fn test_flag_forces_unattended() {
        without_env_var("CI", || {
            without_env_var("GITHUB_ACTIONS", || {
                without_env_var("CLOUD_INIT", || {
                    let ctx = ExecutionContext::detect(true);
                    assert!(ctx.unattended);
                });
            });
        });
    }

    #[test]
    fn test_ci_env_var_sets_unattended() {
        with_env_var("CLOUD_INIT", "1", || {
            let ctx = ExecutionContext::detect(false);
            assert!(ctx.unattended);
        });
    }

    #[test]
    fn test_false_ci_value_is_ignored() {
        without_env_var("CI", || {
            without_env_var("GITHUB_ACTIONS", || {
                with_env_var("CLOUD_INIT", "false", || {
                    let ctx = ExecutionContext::detect(false);
                    assert!(!ctx.unattended);
                });
            });
        });
    }

    #[test]
    fn test_sudo_invoker_ignores_root() {
        with_env_var(ENV_SUDO_USER, "root", || {
            let ctx = ExecutionContext::detect(false);
            assert!(ctx.sudo_invoker.is_none());
        });
        with_env_var(ENV_SUDO_USER, "alice", || {
            let ctx = ExecutionContext::detect(false);
            assert_eq!(ctx.sudo_invoker.as_deref(), Some("alice"));
        });
    }

    #[test]
    fn test_invoking_user_prefers_env() {
        with_env_var("USER", "someone", || {
            let ctx = ExecutionContext::detect(false);
            assert_eq!(ctx.invoking_user, "someone");
        });
    }
}
