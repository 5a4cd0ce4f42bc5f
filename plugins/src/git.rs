//! `RepoMerger` backed by the `git` binary.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use conductor_core::error::MergeError;
use conductor_core::executor::traits::RepoMerger;
use conductor_core::executor::MergeOutcome;

/// Merges stage branches into whatever is checked out in `repo_dir`.
///
/// Callers must hold the merge lock; the working tree is shared.
#[derive(Debug, Clone)]
pub struct GitMerger {
    repo_dir: PathBuf,
    git_bin: String,
}

impl GitMerger {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            git_bin: "git".to_string(),
        }
    }

    pub fn with_git_bin(mut self, git_bin: impl Into<String>) -> Self {
        self.git_bin = git_bin.into();
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<Output, MergeError> {
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output)
    }

    async fn git_ok(&self, args: &[&str]) -> Result<String, MergeError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(git_failure(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, MergeError> {
        let listing = self
            .git_ok(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn abort_merge(&self) {
        match self.git(&["merge", "--abort"]).await {
            Ok(out) if out.status.success() => {}
            Ok(out) => tracing::warn!(
                repo = %self.repo_dir.display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "git merge --abort failed"
            ),
            Err(e) => tracing::warn!(repo = %self.repo_dir.display(), error = %e, "git merge --abort failed"),
        }
    }
}

fn git_failure(args: &[&str], output: &Output) -> MergeError {
    MergeError::Git {
        command: args.join(" "),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl RepoMerger for GitMerger {
    fn name(&self) -> &str {
        "git"
    }

    async fn merge(&self, branch_ref: &str) -> Result<MergeOutcome, MergeError> {
        if branch_ref.starts_with('-') {
            return Err(MergeError::Git {
                command: "merge".to_string(),
                stderr: format!("refusing option-like ref '{branch_ref}'"),
            });
        }

        let ancestor = self
            .git(&["merge-base", "--is-ancestor", branch_ref, "HEAD"])
            .await?;
        if ancestor.status.success() {
            tracing::debug!(branch_ref, "branch already merged");
            return Ok(MergeOutcome::UpToDate);
        }

        let args = ["merge", "--no-ff", "--no-edit", branch_ref];
        let merged = self.git(&args).await?;
        if !merged.status.success() {
            let files = self.conflicted_files().await?;
            self.abort_merge().await;
            if files.is_empty() {
                return Err(git_failure(&args, &merged));
            }
            tracing::info!(branch_ref, files = files.len(), "merge conflict, aborted");
            return Ok(MergeOutcome::Conflict { files });
        }

        let commit = self.git_ok(&["rev-parse", "HEAD"]).await?;
        tracing::info!(branch_ref, commit = %commit, "branch merged");
        Ok(MergeOutcome::Merged { commit })
    }
}
