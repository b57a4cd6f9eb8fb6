//! Typed failure taxonomy for the bootstrap run
//!
//! Only a handful of failures are allowed to terminate the whole run: bad
//! configuration, an unresolvable target identity, and permission/filesystem
//! problems while setting up the target home. Everything that happens inside
//! the per-resource loop is recorded as that resource's result instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    /// Bad CLI usage or an invalid manifest
    #[error("configuration error: {0}")]
    Config(String),

    /// The resolved target user does not exist on this system
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The target home directory does not exist and cannot be created
    #[error("home directory unavailable: {0}")]
    HomeUnavailable(String),

    /// An operation required privilege escalation that is not available
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A remote operation failed after exhausting retries
    #[error("network error: {0}")]
    Network(String),

    /// A required file or directory could not be created
    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SetupError {
    /// Process exit code for a fatal occurrence of this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::Config(_) | SetupError::UserNotFound(_) => 1,
            SetupError::Network(_) => 2,
            SetupError::HomeUnavailable(_) | SetupError::Filesystem(_) => 3,
            SetupError::PermissionDenied(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SetupError::Config("bad flag".into()).exit_code(), 1);
        assert_eq!(SetupError::UserNotFound("ghost".into()).exit_code(), 1);
        assert_eq!(SetupError::Network("unreachable".into()).exit_code(), 2);
        assert_eq!(SetupError::HomeUnavailable("/home/x".into()).exit_code(), 3);
        assert_eq!(SetupError::Filesystem("mkdir".into()).exit_code(), 3);
        assert_eq!(SetupError::PermissionDenied("chown".into()).exit_code(), 4);
    }

    #[test]
    fn test_display_messages() {
        let err = SetupError::UserNotFound("deploy".into());
        assert_eq!(err.to_string(), "user not found: deploy");
    }
}
