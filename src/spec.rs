//! Repository specifier parsing.
//!
//! Grammar: `owner "/" repo ("@" branch)? ("#" subfolder)?`
//!
//! Owner, repo, and subfolder accept `[A-Za-z0-9._-]+`; branch additionally
//! permits `/`. The branch defaults to `main`. Subfolders are stored
//! verbatim but `..` components are rejected.

use std::fmt;

use crate::error::{Result, WtdError};

/// A normalized `(owner, repo, branch, subfolder)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RepoSpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub subfolder: Option<String>,
}

impl RepoSpec {
    /// Parse a specifier of the form `owner/repo[@branch][#subfolder]`.
    pub fn parse(input: &str) -> Result<RepoSpec> {
        let malformed = |reason: &str| WtdError::MalformedSpec {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.chars().any(char::is_whitespace) {
            return Err(malformed("whitespace is not allowed"));
        }

        let (rest, subfolder) = match input.split_once('#') {
            Some((rest, sub)) => {
                if sub.is_empty() {
                    return Err(malformed("empty subfolder after '#'"));
                }
                (rest, Some(sub.to_string()))
            }
            None => (input, None),
        };

        let (owner_repo, branch) = match rest.split_once('@') {
            Some((owner_repo, branch)) => {
                if branch.is_empty() {
                    return Err(malformed("empty branch after '@'"));
                }
                (owner_repo, branch.to_string())
            }
            None => (rest, "main".to_string()),
        };

        let Some((owner, repo)) = owner_repo.split_once('/') else {
            return Err(malformed("expected owner/repo"));
        };

        if !is_plain_field(owner) {
            return Err(malformed("owner must match [A-Za-z0-9._-]+"));
        }
        if !is_plain_field(repo) {
            return Err(malformed("repo must match [A-Za-z0-9._-]+"));
        }
        if !is_branch_field(&branch) {
            return Err(malformed("branch must match [A-Za-z0-9._/-]+"));
        }
        if let Some(sub) = &subfolder {
            if !sub.split('/').all(is_plain_field) {
                return Err(malformed("subfolder must match [A-Za-z0-9._-]+ components"));
            }
            if sub.split('/').any(|part| part == "..") {
                return Err(malformed("subfolder must not contain '..'"));
            }
        }

        Ok(RepoSpec {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
            subfolder,
        })
    }

    /// Branch with `/` replaced by `-`, used in directory and container names.
    pub fn safe_branch(&self) -> String {
        self.branch.replace('/', "-")
    }

    /// Container and image name: `<repo>-<safe-branch>`.
    pub fn container_name(&self) -> String {
        format!("{}-{}", self.repo, self.safe_branch())
    }

    /// Canonical label value: `<owner>/<repo>@<branch>`, used for
    /// `wtd.spec` container labels and selective pruning.
    pub fn label(&self) -> String {
        format!("{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)?;
        if let Some(sub) = &self.subfolder {
            write!(f, "#{sub}")?;
        }
        Ok(())
    }
}

fn is_plain_field(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_branch_field(s: &str) -> bool {
    !s.is_empty() && s.split('/').all(is_plain_field)
}
