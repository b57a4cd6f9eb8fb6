use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "homestead")]
#[command(version)]
#[command(about = "Bootstrap a developer home environment", long_about = None)]
#[command(disable_help_flag = false)]
pub struct Cli {
    /// Run unattended (no prompts, patient network retries)
    #[arg(long)]
    pub cloud_init: bool,

    /// Install for this user instead of the detected one
    #[arg(long)]
    pub user: Option<String>,

    /// Path to a TOML resource manifest (built-in set if omitted)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Show what would be done without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["homestead"]);
        assert!(!cli.cloud_init);
        assert!(cli.user.is_none());
        assert!(!cli.dry_run);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cloud_init_and_user() {
        let cli = Cli::parse_from(["homestead", "--cloud-init", "--user", "deploy"]);
        assert!(cli.cloud_init);
        assert_eq!(cli.user.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["homestead", "--bogus"]).is_err());
    }
}
