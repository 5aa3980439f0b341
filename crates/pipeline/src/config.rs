//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use commitreel_core::render::RenderSettings;
use commitreel_core::vcs::{VcsTimeouts, DEFAULT_PROJECT_DOMAINS};

/// Pipeline configuration.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory of the local blob store.
    pub media_root: PathBuf,
    /// Hosts a project URL may point at.
    pub project_domains: Vec<String>,
    pub clone_timeout: Duration,
    pub log_timeout: Duration,
    pub tag_timeout: Duration,
    pub render_timeout: Duration,
    pub ffmpeg_timeout: Duration,
    /// How often a running render checks for cancellation, and how often
    /// the abort watcher re-reads the build status.
    pub render_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let vcs = VcsTimeouts::default();
        let render = RenderSettings::default();
        Self {
            media_root: PathBuf::from("./media"),
            project_domains: DEFAULT_PROJECT_DOMAINS.iter().map(|d| d.to_string()).collect(),
            clone_timeout: vcs.clone,
            log_timeout: vcs.log,
            tag_timeout: vcs.tags,
            render_timeout: render.timeout,
            ffmpeg_timeout: commitreel_core::ffmpeg::DEFAULT_FFMPEG_TIMEOUT,
            render_poll_interval: render.poll_interval,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                                |
    /// |-----------------------------|----------------------------------------|
    /// | `MEDIA_ROOT`                | `./media`                              |
    /// | `PROJECT_DOMAINS`           | `bitbucket.org,github.com,gitlab.com`  |
    /// | `CLONE_TIMEOUT_SECS`        | `60`                                   |
    /// | `LOG_TIMEOUT_SECS`          | `10`                                   |
    /// | `TAG_TIMEOUT_SECS`          | `60`                                   |
    /// | `RENDER_TIMEOUT_SECS`       | `14400`                                |
    /// | `FFMPEG_TIMEOUT_SECS`       | `600`                                  |
    /// | `RENDER_POLL_INTERVAL_SECS` | `5`                                    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let media_root = std::env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.media_root);

        let project_domains = match std::env::var("PROJECT_DOMAINS") {
            Ok(raw) => parse_domains(&raw),
            Err(_) => defaults.project_domains,
        };

        Self {
            media_root,
            project_domains,
            clone_timeout: env_secs("CLONE_TIMEOUT_SECS", defaults.clone_timeout),
            log_timeout: env_secs("LOG_TIMEOUT_SECS", defaults.log_timeout),
            tag_timeout: env_secs("TAG_TIMEOUT_SECS", defaults.tag_timeout),
            render_timeout: env_secs("RENDER_TIMEOUT_SECS", defaults.render_timeout),
            ffmpeg_timeout: env_secs("FFMPEG_TIMEOUT_SECS", defaults.ffmpeg_timeout),
            render_poll_interval: env_secs(
                "RENDER_POLL_INTERVAL_SECS",
                defaults.render_poll_interval,
            ),
        }
    }

    pub fn vcs_timeouts(&self) -> VcsTimeouts {
        VcsTimeouts {
            clone: self.clone_timeout,
            log: self.log_timeout,
            tags: self.tag_timeout,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            timeout: self.render_timeout,
            poll_interval: self.render_poll_interval,
            ..RenderSettings::default()
        }
    }

    pub fn ffmpeg_timeout(&self) -> Duration {
        self.ffmpeg_timeout
    }
}

/// Comma-separated, trimmed, lowercased, empties dropped.
fn parse_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_secs(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => Duration::from_secs(
            raw.trim()
                .parse()
                .unwrap_or_else(|_| panic!("{name} must be a valid u64")),
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.clone_timeout, Duration::from_secs(60));
        assert_eq!(config.log_timeout, Duration::from_secs(10));
        assert_eq!(config.tag_timeout, Duration::from_secs(60));
        assert_eq!(config.render_timeout, Duration::from_secs(14_400));
        assert_eq!(config.ffmpeg_timeout, Duration::from_secs(600));
        assert_eq!(config.render_poll_interval, Duration::from_secs(5));
        assert_eq!(
            config.project_domains,
            vec!["bitbucket.org", "github.com", "gitlab.com"]
        );
    }

    #[test]
    fn domain_list_parsing() {
        assert_eq!(
            parse_domains(" GitHub.com, ,git.example.org,"),
            vec!["github.com", "git.example.org"]
        );
    }

    #[test]
    fn render_settings_carry_timeout_and_interval() {
        let config = PipelineConfig {
            render_timeout: Duration::from_secs(30),
            render_poll_interval: Duration::from_millis(200),
            ..PipelineConfig::default()
        };
        let settings = config.render_settings();
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.poll_interval, Duration::from_millis(200));
    }
}
