//! `--install`: write shell completion scripts under the user's home.
//!
//! The target shell comes from `$SHELL`. Install locations match common
//! conventions:
//!
//! - bash: `~/.bash_completion.d/wtd`
//! - zsh:  `~/.zsh/completions/_wtd`
//! - fish: `~/.config/fish/completions/wtd.fish`
//!
//! An unrecognized shell prints the supported list and exits 2.

use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::{Shell, generate};

use wtd::layout::display_path;
use wtd::styling::{eprintln, error_message, println, success_message};

use crate::cli::Cli;

pub fn handle_install() -> i32 {
    let shell_var = std::env::var("SHELL").unwrap_or_default();
    let shell_name = shell_var.rsplit('/').next().unwrap_or_default();

    let Some(home) = home::home_dir() else {
        eprintln!("{}", error_message("cannot determine home directory"));
        return 2;
    };

    let (shell, target, hint): (Shell, PathBuf, &str) = match shell_name {
        "bash" => (
            Shell::Bash,
            home.join(".bash_completion.d").join("wtd"),
            "Run 'source ~/.bashrc' or restart your terminal to enable completion",
        ),
        "zsh" => (
            Shell::Zsh,
            home.join(".zsh").join("completions").join("_wtd"),
            "Add 'fpath=(~/.zsh/completions $fpath)' to ~/.zshrc and re-run compinit",
        ),
        "fish" => (
            Shell::Fish,
            home.join(".config")
                .join("fish")
                .join("completions")
                .join("wtd.fish"),
            "Restart your fish shell to enable completion",
        ),
        other => {
            eprintln!(
                "{}",
                error_message(&format!(
                    "unknown shell '{other}' (from $SHELL); supported: bash, zsh, fish"
                ))
            );
            return 2;
        }
    };

    if let Err(err) = write_script(shell, &target) {
        eprintln!(
            "{}",
            error_message(&format!("cannot write {}: {err}", target.display()))
        );
        return 2;
    }

    println!(
        "{}",
        success_message(&format!(
            "{shell_name} completion installed to {}",
            display_path(&target)
        ))
    );
    println!("{hint}");
    0
}

fn write_script(shell: Shell, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut cmd = Cli::command();
    let mut buffer = Vec::new();
    generate(shell, &mut cmd, "wtd", &mut buffer);
    std::fs::write(target, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_bash_script_mentions_binary() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wtd");
        write_script(Shell::Bash, &target).unwrap();
        let script = std::fs::read_to_string(&target).unwrap();
        assert!(script.contains("wtd"));
        assert!(!script.is_empty());
    }

    #[test]
    fn generated_fish_script_is_fish_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wtd.fish");
        write_script(Shell::Fish, &target).unwrap();
        let script = std::fs::read_to_string(&target).unwrap();
        assert!(script.contains("complete"));
    }
}
