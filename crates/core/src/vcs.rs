//! Git history extraction.
//!
//! A remote repository is cloned into a scratch directory (blobless,
//! single-branch, no checkout), converted into a commit-event log by
//! gource, and queried for its latest commit and tags. The scratch
//! directory is removed on every exit path when its [`TempDir`] drops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tempfile::TempDir;
use url::Url;

use crate::executables::{Tool, ToolError, ToolPaths};
use crate::process::{run_command, CommandOutput, ProcessError};

/// Default allow-list of hosting domains for project URLs.
pub const DEFAULT_PROJECT_DOMAINS: &[&str] = &["bitbucket.org", "github.com", "gitlab.com"];

const LOG_FILE_NAME: &str = "gource.log";
const CLONE_DIR_NAME: &str = "vcs_source";
const COMMIT_TIMEOUT: Duration = Duration::from_secs(5);
const CONFIG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("URL must be a valid HTTP resource: {0}")]
    InvalidUrl(String),

    #[error("URL host '{host}' is not an allowed project domain")]
    DomainNotAllowed { host: String },

    #[error("clone failed (exit code {exit_code:?}): {stderr}")]
    Clone {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("log generation failed (exit code {exit_code:?}): {stderr}")]
    LogGeneration {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VcsError {
    /// Failures caused by the request itself or by the remote being
    /// unreachable. These are reported back to the caller as bad input
    /// rather than as internal errors.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_) | Self::DomainNotAllowed { .. } | Self::Clone { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// URL validation
// ---------------------------------------------------------------------------

/// Reject anything that is not an `http://` or `https://` URL.
pub fn check_http_url(url: &str) -> Result<Url, VcsError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(VcsError::InvalidUrl(url.to_string()));
    }
    Url::parse(url).map_err(|_| VcsError::InvalidUrl(url.to_string()))
}

/// Validate a project URL against an allow-list of hosting domains.
///
/// The host must equal one of `domains` exactly (case-insensitive);
/// subdomains are not accepted.
pub fn validate_project_url<S: AsRef<str>>(url: &str, domains: &[S]) -> Result<Url, VcsError> {
    let parsed = check_http_url(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| VcsError::InvalidUrl(url.to_string()))?
        .to_ascii_lowercase();
    if domains
        .iter()
        .any(|d| d.as_ref().trim().eq_ignore_ascii_case(&host))
    {
        Ok(parsed)
    } else {
        Err(VcsError::DomainNotAllowed { host })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub timestamp: DateTime<FixedOffset>,
    pub name: String,
}

/// Latest commit on the cloned branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub time: Option<DateTime<Utc>>,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedLog {
    pub log_text: String,
    pub commit: Option<CommitInfo>,
    pub tags: Vec<Tag>,
}

/// Parse `for-each-ref` output of `<iso-strict date>|<tag name>` lines.
/// Lines that do not parse are skipped.
pub fn parse_tag_lines(text: &str) -> Vec<Tag> {
    text.lines()
        .filter_map(|line| {
            let (date, name) = line.trim().split_once('|')?;
            let timestamp = DateTime::parse_from_rfc3339(date.trim()).ok()?;
            let name = name.trim();
            (!name.is_empty()).then(|| Tag {
                timestamp,
                name: name.to_string(),
            })
        })
        .collect()
}

/// Parse `git log -n1 --pretty=format:%H|%ct|%s` output.
pub fn parse_commit_line(text: &str) -> Option<CommitInfo> {
    let mut parts = text.trim().splitn(3, '|');
    let hash = parts.next().filter(|h| !h.is_empty())?;
    let time = parts
        .next()
        .and_then(|t| t.parse::<i64>().ok())
        .and_then(|t| DateTime::from_timestamp(t, 0));
    let subject = parts.next().unwrap_or_default();
    Some(CommitInfo {
        hash: hash.to_string(),
        time,
        subject: subject.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Per-step subprocess timeouts.
#[derive(Debug, Clone, Copy)]
pub struct VcsTimeouts {
    pub clone: Duration,
    pub log: Duration,
    pub tags: Duration,
}

impl Default for VcsTimeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(60),
            log: Duration::from_secs(10),
            tags: Duration::from_secs(60),
        }
    }
}

pub struct VcsExtractor {
    tools: Arc<ToolPaths>,
    timeouts: VcsTimeouts,
}

impl VcsExtractor {
    pub fn new(tools: Arc<ToolPaths>, timeouts: VcsTimeouts) -> Self {
        Self { tools, timeouts }
    }

    /// Clone `url` at `branch` and produce its commit-event log, latest
    /// commit, and tags. Commit and tag lookups are best effort.
    pub async fn extract_log(&self, url: &str, branch: &str) -> Result<ExtractedLog, VcsError> {
        let (workdir, repo) = self.prepare_clone(url, branch).await?;
        let log_path = workdir.path().join(LOG_FILE_NAME);

        let mut cmd = self.tools.command(Tool::Gource)?;
        cmd.arg("--git-branch")
            .arg(branch)
            .arg("--output-custom-log")
            .arg(&log_path)
            .arg(&repo)
            .current_dir(workdir.path());
        let output = run_command(&mut cmd, self.timeouts.log).await?;
        if !output.success() {
            return Err(VcsError::LogGeneration {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let commit = match self.latest_commit(&repo).await {
            Ok(commit) => commit,
            Err(e) => {
                tracing::error!(url, error = %e, "Failed to retrieve latest commit");
                None
            }
        };
        let tags = self.tags_or_empty(&repo, url).await;

        let log_text = tokio::fs::read_to_string(&log_path).await?;
        tracing::info!(
            url,
            branch,
            bytes = log_text.len(),
            tags = tags.len(),
            "Extracted commit log",
        );
        Ok(ExtractedLog {
            log_text,
            commit,
            tags,
        })
    }

    /// Clone and list tags only.
    pub async fn extract_tags(&self, url: &str, branch: &str) -> Result<Vec<Tag>, VcsError> {
        let (_workdir, repo) = self.prepare_clone(url, branch).await?;
        Ok(self.tags_or_empty(&repo, url).await)
    }

    /// Validate, clone, and neuter the promisor remote. The returned
    /// [`TempDir`] owns the clone.
    async fn prepare_clone(&self, url: &str, branch: &str) -> Result<(TempDir, PathBuf), VcsError> {
        check_http_url(url)?;
        let workdir = tempfile::Builder::new().prefix("commitreel_").tempdir()?;
        let repo = workdir.path().join(CLONE_DIR_NAME);

        let mut cmd = self.tools.command(Tool::Git)?;
        // Blobless, not --depth: the log needs every commit.
        cmd.args([
            "clone",
            "--quiet",
            "--filter=blob:none",
            "--no-checkout",
            "--single-branch",
            "--branch",
        ])
        .arg(branch)
        .arg(url)
        .arg(&repo)
        .current_dir(workdir.path());
        let output = run_command(&mut cmd, self.timeouts.clone).await?;
        if !output.success() {
            return Err(VcsError::Clone {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        self.disable_promisor(&repo).await;
        Ok((workdir, repo))
    }

    /// Drop partial-clone settings so later commands never fetch.
    async fn disable_promisor(&self, repo: &Path) {
        for key in ["remote.origin.promisor", "remote.origin.partialclonefilter"] {
            let result = match self.git_in(repo) {
                Ok(mut cmd) => {
                    cmd.args(["config", "--unset", key]);
                    run_command(&mut cmd, CONFIG_TIMEOUT).await.map_err(VcsError::from)
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(out) if out.success() => {}
                Ok(out) => tracing::debug!(key, exit_code = ?out.exit_code, "git config --unset had no effect"),
                Err(e) => tracing::warn!(key, error = %e, "Failed to unset partial clone config"),
            }
        }
    }

    async fn latest_commit(&self, repo: &Path) -> Result<Option<CommitInfo>, VcsError> {
        let mut cmd = self.git_in(repo)?;
        cmd.args(["log", "-n", "1", "--pretty=format:%H|%ct|%s"]);
        let output = run_command(&mut cmd, COMMIT_TIMEOUT).await?;
        if !output.success() {
            tracing::error!(exit_code = ?output.exit_code, stderr = %output.stderr, "git log failed");
            return Ok(None);
        }
        Ok(parse_commit_line(&output.stdout))
    }

    async fn list_tags(&self, repo: &Path) -> Result<CommandOutput, VcsError> {
        let mut cmd = self.git_in(repo)?;
        cmd.args([
            "for-each-ref",
            "--sort=creatordate",
            "--format=%(creatordate:iso-strict)|%(refname:short)",
            "refs/tags",
        ]);
        Ok(run_command(&mut cmd, self.timeouts.tags).await?)
    }

    async fn tags_or_empty(&self, repo: &Path, url: &str) -> Vec<Tag> {
        match self.list_tags(repo).await {
            Ok(output) if output.success() => parse_tag_lines(&output.stdout),
            Ok(output) => {
                tracing::warn!(url, exit_code = ?output.exit_code, "Tag listing failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "Tag listing failed");
                Vec::new()
            }
        }
    }

    fn git_in(&self, repo: &Path) -> Result<tokio::process::Command, VcsError> {
        let mut cmd = self.tools.command(Tool::Git)?;
        cmd.arg("-C").arg(repo);
        Ok(cmd)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
