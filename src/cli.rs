use clap::{ArgAction, Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "wtd")]
#[command(about = "Development environment launcher using Docker, git worktrees, and Buildx/Bake")]
#[command(version)]
#[command(after_help = r#"EXAMPLES:
  wtd blooop/test_wtd@main
  wtd -e uv blooop/test_wtd@feature/foo
  wtd blooop/test_wtd git status
  wtd blooop/test_wtd@dev "bash -c 'git pull && make test'"
  wtd --prune blooop/test_wtd

ENVIRONMENT:
  WTD_CACHE_DIR        Cache directory (default: ~/.wtd)
  WTD_BASE_IMAGE       Base image for the root build stage
  WTD_CACHE_REGISTRY   Registry for pushing/pulling the build cache
  WTD_REMOTE_TEMPLATE  Clone URL template ({owner}, {repo} placeholders)

Worktrees live under ~/.wtd/workspaces/<owner>/<repo>/worktree-<branch>.
Generated build artifacts (Dockerfile, docker-compose.yml, docker-bake.hcl,
.buildx-cache/) are written into the worktree and kept out of git status."#)]
pub struct Cli {
    /// Repository specifier: owner/repo[@branch][#subfolder]
    pub spec: Option<String>,

    /// Command to run inside the container (default: interactive shell)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Extensions to enable (repeatable)
    #[arg(short = 'e', long = "extension", action = ArgAction::Append, value_name = "NAME")]
    pub extensions: Vec<String>,

    /// Install shell completion scripts (bash/zsh/fish, chosen from $SHELL)
    #[arg(long)]
    pub install: bool,

    /// Force rebuild of the image even when cached
    #[arg(long)]
    pub rebuild: bool,

    /// Disable the build engine's layer cache
    #[arg(long)]
    pub nocache: bool,

    /// Disable X11 socket mounting and GUI support
    #[arg(long)]
    pub no_gui: bool,

    /// Disable GPU passthrough and the NVIDIA runtime
    #[arg(long)]
    pub no_gpu: bool,

    /// Stop after the worktree is ready; skip image and container work
    #[arg(long)]
    pub no_container: bool,

    /// Like --no-container, but run the command on the host in the worktree
    #[arg(long)]
    pub no_docker: bool,

    /// Remove containers, images, and worktrees (optionally scoped to a spec)
    #[arg(long, value_name = "SPEC", num_args = 0..=1, default_missing_value = "")]
    pub prune: Option<String>,

    /// Show active wtd containers
    #[arg(long)]
    pub list: bool,

    /// Print the effective extension catalog and exit
    #[arg(long)]
    pub ext_list: bool,

    /// Check that docker, compose, buildx, and git are available
    #[arg(long)]
    pub doctor: bool,

    /// Buildx builder name
    #[arg(long, default_value = "wtd_builder", value_name = "NAME")]
    pub builder: String,

    /// Target platforms, comma separated (e.g. linux/amd64,linux/arm64)
    #[arg(long, value_name = "PLATFORMS")]
    pub platforms: Option<String>,

    /// Log verbosity
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Shorthand for --log-level debug
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn parses_spec_and_trailing_command() {
        let cli = parse(&["wtd", "blooop/test_wtd", "git", "status"]);
        assert_eq!(cli.spec.as_deref(), Some("blooop/test_wtd"));
        assert_eq!(cli.command, vec!["git", "status"]);
    }

    #[test]
    fn repeatable_extensions_accumulate() {
        let cli = parse(&["wtd", "-e", "uv", "-e", "pixi", "a/b"]);
        assert_eq!(cli.extensions, vec!["uv", "pixi"]);
    }

    #[test]
    fn prune_without_value_means_all() {
        let cli = parse(&["wtd", "--prune"]);
        assert_eq!(cli.prune.as_deref(), Some(""));

        let cli = parse(&["wtd", "--prune", "a/b"]);
        assert_eq!(cli.prune.as_deref(), Some("a/b"));
    }

    #[test]
    fn flags_before_spec_are_recognized() {
        let cli = parse(&["wtd", "--rebuild", "--no-gui", "a/b"]);
        assert!(cli.rebuild);
        assert!(cli.no_gui);
        assert_eq!(cli.spec.as_deref(), Some("a/b"));
    }

    #[test]
    fn hyphen_values_flow_into_the_command() {
        let cli = parse(&["wtd", "a/b", "ls", "-la"]);
        assert_eq!(cli.command, vec!["ls", "-la"]);
    }
}
