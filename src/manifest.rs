//! Resource manifest loading
//!
//! The resource list is data, not code. A TOML manifest can be supplied with
//! `--manifest`; otherwise the built-in set covering the standard shell
//! environment (oh-my-zsh, plugins, prompt theme, tools) is used.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::resource::Resource;

#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Manifest {
    /// Load a manifest from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let manifest: Manifest =
            toml::from_str(&content).context("Invalid manifest format")?;
        Ok(manifest)
    }

    /// Built-in resource set used when no manifest file is given
    pub fn builtin() -> Self {
        toml::from_str(BUILTIN_MANIFEST).expect("built-in manifest is valid")
    }
}

/// Expand ~ and environment variables in a path string
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

const BUILTIN_MANIFEST: &str = r#"
[[resources]]
name = "oh-my-zsh"
kind = "git_repository"
source = "https://github.com/ohmyzsh/ohmyzsh.git"
dest = ".oh-my-zsh"
verify = "oh-my-zsh.sh"
depth = 1

[[resources]]
name = "zsh-autosuggestions"
kind = "git_repository"
source = "https://github.com/zsh-users/zsh-autosuggestions.git"
dest = ".oh-my-zsh/custom/plugins/zsh-autosuggestions"
verify = "zsh-autosuggestions.zsh"
depth = 1

[[resources]]
name = "zsh-syntax-highlighting"
kind = "git_repository"
source = "https://github.com/zsh-users/zsh-syntax-highlighting.git"
dest = ".oh-my-zsh/custom/plugins/zsh-syntax-highlighting"
verify = "zsh-syntax-highlighting.zsh"
depth = 1

[[resources]]
name = "zsh-completions"
kind = "git_repository"
source = "https://github.com/zsh-users/zsh-completions.git"
dest = ".oh-my-zsh/custom/plugins/zsh-completions"
verify = "zsh-completions.plugin.zsh"
depth = 1

[[resources]]
name = "powerlevel10k"
kind = "git_repository"
source = "https://github.com/romkatv/powerlevel10k.git"
dest = ".oh-my-zsh/custom/themes/powerlevel10k"
verify = "powerlevel10k.zsh-theme"
depth = 1

[[resources]]
name = "tfenv"
kind = "git_repository"
source = "https://github.com/tfutils/tfenv.git"
dest = ".tfenv"
verify = "bin/tfenv"
depth = 1

[[resources]]
name = "oh-my-posh"
kind = "download"
source = "https://github.com/JanDeDobbeleer/oh-my-posh/releases/latest/download/posh-linux-amd64"
dest = ".local/bin/oh-my-posh"

[[resources]]
name = "zshrc"
kind = "file_copy"
source = "dotfiles/zshrc"
dest = ".zshrc"

[[resources]]
name = "gitconfig"
kind = "file_copy"
source = "dotfiles/gitconfig"
dest = ".gitconfig"

[[resources]]
name = "p10k-config"
kind = "file_copy"
source = "dotfiles/p10k.zsh"
dest = ".p10k.zsh"

[[resources]]
name = "config-dir"
kind = "directory_merge"
source = "dotfiles/config"
dest = ".config"

[[resources]]
name = "local-bin"
kind = "directory_merge"
source = "dotfiles/bin"
dest = ".local/bin"
"#;
