//! User database lookups
//!
//! Target resolution needs three queries: find a user by name, find the
//! "primary" regular user on a freshly provisioned host, and map a uid back to
//! a name. The trait exists so tests can substitute a fixed set of entries for
//! the real `/etc/passwd`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// First uid handed out to regular (non-system) accounts
#[cfg(target_os = "macos")]
pub const FIRST_REGULAR_UID: u32 = 500;
#[cfg(not(target_os = "macos"))]
pub const FIRST_REGULAR_UID: u32 = 1000;

/// The nobody account and friends live up here; never a bootstrap target
const UID_CEILING: u32 = 65000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

pub trait UserDatabase {
    /// Look up a user by account name
    fn lookup(&self, name: &str) -> Option<UserEntry>;

    /// Look up a user by uid
    fn lookup_uid(&self, uid: u32) -> Option<UserEntry>;

    /// Lowest-uid regular user at or above the platform threshold
    fn primary_user(&self) -> Option<UserEntry>;
}

/// System user database backed by `/etc/passwd`
pub struct PasswdDatabase {
    path: PathBuf,
}

impl PasswdDatabase {
    pub fn system() -> Self {
        Self {
            path: PathBuf::from("/etc/passwd"),
        }
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn entries(&self) -> Result<Vec<UserEntry>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Could not read {}", self.path.display()))?;
        Ok(content.lines().filter_map(parse_passwd_line).collect())
    }
}

/// Parse one `name:x:uid:gid:gecos:home:shell` line; malformed lines are skipped
fn parse_passwd_line(line: &str) -> Option<UserEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 {
        return None;
    }

    Some(UserEntry {
        name: fields[0].to_string(),
        uid: fields[2].parse().ok()?,
        gid: fields[3].parse().ok()?,
        home: PathBuf::from(fields[5]),
        shell: fields[6].to_string(),
    })
}

/// Accounts with a disabled shell are never login users
fn has_login_shell(entry: &UserEntry) -> bool {
    !entry.shell.ends_with("nologin") && !entry.shell.ends_with("false")
}

impl UserDatabase for PasswdDatabase {
    fn lookup(&self, name: &str) -> Option<UserEntry> {
        self.entries().ok()?.into_iter().find(|e| e.name == name)
    }

    fn lookup_uid(&self, uid: u32) -> Option<UserEntry> {
        self.entries().ok()?.into_iter().find(|e| e.uid == uid)
    }

    fn primary_user(&self) -> Option<UserEntry> {
        self.entries()
            .ok()?
            .into_iter()
            .filter(|e| e.uid >= FIRST_REGULAR_UID && e.uid < UID_CEILING)
            .filter(has_login_shell)
            .min_by_key(|e| e.uid)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// In-memory user database for resolver tests
    pub struct FakeDatabase {
        pub entries: Vec<UserEntry>,
    }

    impl FakeDatabase {
        pub fn new(entries: Vec<UserEntry>) -> Self {
            Self { entries }
        }
    }

    impl UserDatabase for FakeDatabase {
        fn lookup(&self, name: &str) -> Option<UserEntry> {
            self.entries.iter().find(|e| e.name == name).cloned()
        }

        fn lookup_uid(&self, uid: u32) -> Option<UserEntry> {
            self.entries.iter().find(|e| e.uid == uid).cloned()
        }

        fn primary_user(&self) -> Option<UserEntry> {
            self.entries
                .iter()
                .filter(|e| e.uid >= FIRST_REGULAR_UID && e.uid < UID_CEILING)
                .filter(|e| has_login_shell(e))
                .min_by_key(|e| e.uid)
                .cloned()
        }
    }

    pub fn entry(name: &str, uid: u32, home: &str) -> UserEntry {
        UserEntry {
            name: name.to_string(),
            uid,
            gid: uid,
            home: PathBuf::from(home),
            shell: "/bin/bash".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_passwd(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const SAMPLE: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
alice:x:1000:1000:Alice:/home/alice:/bin/zsh
bob:x:1001:1001:Bob:/home/bob:/bin/bash
";

    #[test]
    fn test_lookup_by_name() {
        let file = write_passwd(SAMPLE);
        let db = PasswdDatabase::at(file.path());

        let alice = db.lookup("alice").unwrap();
        assert_eq!(alice.uid, 1000);
        assert_eq!(alice.home, PathBuf::from("/home/alice"));

        assert!(db.lookup("ghost").is_none());
    }

    #[test]
    fn test_lookup_by_uid() {
        let file = write_passwd(SAMPLE);
        let db = PasswdDatabase::at(file.path());

        assert_eq!(db.lookup_uid(0).unwrap().name, "root");
        assert_eq!(db.lookup_uid(1001).unwrap().name, "bob");
    }

    #[test]
    fn test_primary_user_is_lowest_regular_uid() {
        let file = write_passwd(SAMPLE);
        let db = PasswdDatabase::at(file.path());

        assert_eq!(db.primary_user().unwrap().name, "alice");
    }

    #[test]
    fn test_primary_user_skips_nologin_and_nobody() {
        let file = write_passwd(
            "root:x:0:0:root:/root:/bin/bash\n\
             svc:x:1000:1000:service:/srv/svc:/usr/sbin/nologin\n\
             nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin\n\
             carol:x:1002:1002:Carol:/home/carol:/bin/bash\n",
        );
        let db = PasswdDatabase::at(file.path());

        assert_eq!(db.primary_user().unwrap().name, "carol");
    }

    #[test]
    fn test_primary_user_none_when_only_system_accounts() {
        let file = write_passwd("root:x:0:0:root:/root:/bin/bash\n");
        let db = PasswdDatabase::at(file.path());

        assert!(db.primary_user().is_none());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let file = write_passwd("garbage\nalice:x:1000:1000:Alice:/home/alice:/bin/zsh\n");
        let db = PasswdDatabase::at(file.path());

        assert!(db.lookup("alice").is_some());
        assert!(db.lookup("garbage").is_none());
    }
}
