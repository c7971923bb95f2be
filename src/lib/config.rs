use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use url::Url;

use crate::lib::aws_region::AwsRegion;
use crate::lib::cli::{Cli, OutputFormat};
use crate::lib::error::{ConfigError, Result};
use crate::lib::model::{ResourceKind, Window};
use crate::lib::orchestrator::{MAX_CONCURRENCY, default_concurrency};
use crate::lib::recommender::RecommendationPolicy;
use crate::lib::review::ApplyMode;

/// Which workloads to discover
#[derive(Clone, Debug, Default)]
pub struct KubernetesConfig {
    pub context: Option<String>,
    pub namespace: Option<String>,
    pub selector: Option<String>,
}

/// Metrics backend authentication, before credentials are resolved
#[derive(Clone, Debug, PartialEq)]
pub enum MetricsAuthConfig {
    None,
    Bearer(String),
    SigV4(AwsRegion),
}

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub endpoint: Url,
    pub auth: MetricsAuthConfig,
    pub scrape_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct RecommenderConfig {
    pub window_hours: f64,
    pub policy: RecommendationPolicy,
    pub concurrency: usize,
    pub resources: Vec<ResourceKind>,
}

/// Git hosting providers with a pull request API
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
    Bitbucket,
    Gitea,
    Generic,
}

impl GitProvider {
    /// Guess the provider from the repository host
    pub fn detect(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if host.contains("github") {
            GitProvider::GitHub
        } else if host.contains("gitlab") {
            GitProvider::GitLab
        } else if host.contains("bitbucket") {
            GitProvider::Bitbucket
        } else if host.contains("gitea") || host.contains("codeberg") {
            GitProvider::Gitea
        } else {
            GitProvider::Generic
        }
    }

    /// REST API root for the provider
    pub fn api_base_url(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        match self {
            GitProvider::GitHub if host == "github.com" => Some("https://api.github.com".into()),
            GitProvider::GitHub => Some(format!("https://{}/api/v3", host)),
            GitProvider::GitLab => Some(format!("https://{}/api/v4", host)),
            GitProvider::Bitbucket => Some("https://api.bitbucket.org/2.0".into()),
            GitProvider::Gitea => Some(format!("https://{}/api/v1", host)),
            GitProvider::Generic => None,
        }
    }
}

/// How git talks to the remote
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GitConnectionType {
    Https,
    Ssh,
    /// `file://` remotes, used for mirrors and tests
    Local,
}

impl GitConnectionType {
    pub fn detect(url: &Url) -> Self {
        match url.scheme() {
            "ssh" => GitConnectionType::Ssh,
            "file" => GitConnectionType::Local,
            _ => GitConnectionType::Https,
        }
    }
}

/// Manifest repository and the branch to publish
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    pub url: Url,
    pub provider: GitProvider,
    pub connection_type: GitConnectionType,
    pub auth_token: Option<String>,
    pub auth_username: Option<String>,
    pub base_branch: String,
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
}

impl RepositoryConfig {
    pub fn new(url: Url, base_branch: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            provider: GitProvider::detect(&url),
            connection_type: GitConnectionType::detect(&url),
            url,
            auth_token: None,
            auth_username: None,
            base_branch: base_branch.into(),
            branch: branch.into(),
            author_name: "rightsizer".into(),
            author_email: "rightsizer@users.noreply.local".into(),
        }
    }
}

/// What to do with accepted recommendations
#[derive(Clone, Debug)]
pub struct ApplyConfig {
    /// Skip review and take every `Ok` recommendation
    pub apply_all: bool,
    pub mode: ApplyMode,
    pub manifest_dir: Option<PathBuf>,
    pub repository: Option<RepositoryConfig>,
}

/// The single configuration object consumed by the core
#[derive(Clone, Debug)]
pub struct Config {
    pub kubernetes: KubernetesConfig,
    pub metrics: MetricsConfig,
    pub recommender: RecommenderConfig,
    pub output: OutputFormat,
    pub apply: ApplyConfig,
}

impl Config {
    /// Validate CLI input; nothing here touches the network
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let policy = RecommendationPolicy::new(cli.buffer_fraction, cli.limit_multiplier)?;

        if cli.scrape_interval_secs == 0 {
            return Err(
                ConfigError::InvalidValue("--scrape-interval-secs must be positive".into()).into(),
            );
        }
        // Same bounds the fetch pass applies
        Window::ending_now(
            cli.window_hours,
            Duration::from_secs(cli.scrape_interval_secs),
        )?;
        if cli.resources.is_empty() {
            return Err(ConfigError::MissingRequired("--resource".into()).into());
        }

        let concurrency = match cli.concurrency {
            Some(0) => {
                return Err(
                    ConfigError::InvalidValue("--concurrency must be at least 1".into()).into(),
                );
            }
            Some(n) => n.min(MAX_CONCURRENCY),
            None => default_concurrency(),
        };

        let auth = match (&cli.region, &cli.bearer_token) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue(
                    "--region (SigV4) and --bearer-token are mutually exclusive".into(),
                )
                .into());
            }
            (Some(region), None) => MetricsAuthConfig::SigV4(*region),
            (None, Some(token)) => MetricsAuthConfig::Bearer(token.clone()),
            (None, None) => MetricsAuthConfig::None,
        };

        let repository = cli.manifest_url.clone().map(|url| {
            let branch = cli
                .branch
                .clone()
                .unwrap_or_else(|| default_branch_name(Utc::now()));
            RepositoryConfig {
                auth_token: cli.git_token.clone(),
                auth_username: cli.git_username.clone(),
                author_name: cli.author_name.clone(),
                author_email: cli.author_email.clone(),
                ..RepositoryConfig::new(url, cli.base_branch.clone(), branch)
            }
        });

        match cli.apply_mode {
            ApplyMode::PullRequest if cli.apply && repository.is_none() => {
                return Err(ConfigError::MissingRequired(
                    "--manifest-url is required to publish a pull request".into(),
                )
                .into());
            }
            ApplyMode::Local if cli.apply && cli.manifest_dir.is_none() => {
                return Err(ConfigError::MissingRequired(
                    "--manifest-dir is required for local apply".into(),
                )
                .into());
            }
            _ => {}
        }

        Ok(Self {
            kubernetes: KubernetesConfig {
                context: cli.context.clone(),
                namespace: cli.namespace.clone(),
                selector: cli.selector.clone(),
            },
            metrics: MetricsConfig {
                endpoint: cli.metrics_url.clone(),
                auth,
                scrape_interval: Duration::from_secs(cli.scrape_interval_secs),
            },
            recommender: RecommenderConfig {
                window_hours: cli.window_hours,
                policy,
                concurrency,
                resources: cli.resources.clone(),
            },
            output: cli.output,
            apply: ApplyConfig {
                apply_all: cli.apply,
                mode: cli.apply_mode,
                manifest_dir: cli.manifest_dir.clone(),
                repository,
            },
        })
    }
}

pub fn default_branch_name(now: chrono::DateTime<Utc>) -> String {
    format!("rightsizing-{}", now.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut all = vec!["rightsizer", "--metrics-url", "http://prom:9090"];
        all.extend_from_slice(args);
        Cli::try_parse_from(all).unwrap()
    }

    #[test]
    fn builds_config_from_defaults() {
        let config = Config::from_cli(&cli(&[])).unwrap();
        assert_eq!(config.metrics.auth, MetricsAuthConfig::None);
        assert!(config.recommender.concurrency >= 1);
        assert!(config.recommender.concurrency <= MAX_CONCURRENCY);
        assert!(config.apply.repository.is_none());
    }

    #[test]
    fn rejects_invalid_numbers() {
        assert!(Config::from_cli(&cli(&["--window-hours", "0"])).is_err());
        assert!(Config::from_cli(&cli(&["--window-hours", "1e300"])).is_err());
        assert!(Config::from_cli(&cli(&["--buffer-fraction=-0.5"])).is_err());
        assert!(Config::from_cli(&cli(&["--limit-multiplier", "0.5"])).is_err());
        assert!(Config::from_cli(&cli(&["--concurrency", "0"])).is_err());
    }

    #[test]
    fn apply_requires_a_destination() {
        assert!(Config::from_cli(&cli(&["--apply"])).is_err());
        assert!(Config::from_cli(&cli(&["--apply", "--apply-mode", "local"])).is_err());
        assert!(
            Config::from_cli(&cli(&["--apply", "--apply-mode", "local", "--manifest-dir", "."]))
                .is_ok()
        );
    }

    #[test]
    fn repository_settings_carry_through() {
        let config = Config::from_cli(&cli(&[
            "--manifest-url",
            "https://github.com/acme/deploy.git",
            "--branch",
            "feature-x",
            "--git-token",
            "t0k3n",
        ]))
        .unwrap();
        let repo = config.apply.repository.unwrap();
        assert_eq!(repo.provider, GitProvider::GitHub);
        assert_eq!(repo.connection_type, GitConnectionType::Https);
        assert_eq!(repo.branch, "feature-x");
        assert_eq!(repo.base_branch, "main");
        assert_eq!(repo.auth_token.as_deref(), Some("t0k3n"));
    }

    #[test]
    fn detects_provider_api_roots() {
        let gh = Url::parse("https://github.com/acme/deploy").unwrap();
        assert_eq!(
            GitProvider::detect(&gh).api_base_url(&gh).as_deref(),
            Some("https://api.github.com")
        );
        let gl = Url::parse("https://gitlab.example.com/acme/deploy").unwrap();
        assert_eq!(
            GitProvider::detect(&gl).api_base_url(&gl).as_deref(),
            Some("https://gitlab.example.com/api/v4")
        );
        let other = Url::parse("https://git.internal/acme/deploy").unwrap();
        assert_eq!(GitProvider::detect(&other), GitProvider::Generic);
    }

    #[test]
    fn default_branch_is_timestamped() {
        let now = chrono::DateTime::parse_from_rfc3339("2025-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(default_branch_name(now), "rightsizing-20250304-050607");
    }
}
