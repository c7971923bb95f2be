use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::lib::aws_region::AwsRegion;
use crate::lib::model::ResourceKind;
use crate::lib::review::ApplyMode;

/// Kubernetes Resource Rightsizer
///
/// Reads CPU/memory usage from Prometheus, derives capped request/limit
/// recommendations and publishes accepted changes as a pull request against
/// the workload manifests.
#[derive(Parser, Debug)]
#[command(name = "rightsizer", author, version, about, styles=get_styles())]
pub struct Cli {
    /// Prometheus (or Amazon Managed Prometheus workspace) endpoint
    #[arg(long, value_name = "URL", visible_alias = "amp-url")]
    pub metrics_url: Url,

    /// AWS Region; enables SigV4 request signing
    #[arg(short, long)]
    pub region: Option<AwsRegion>,

    /// Bearer token for the metrics backend
    #[arg(long, env = "RIGHTSIZER_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress log output to stdout/stderr (logs still written to file)
    #[arg(short, long)]
    pub quiet: bool,

    /// Provide context name
    ///
    /// Use if you have multiple clusters in your kubeconfig
    #[arg(long)]
    pub context: Option<String>,

    /// Namespace to scan workloads for rightsizing
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Label selector for workloads, e.g. `app=api,tier!=batch`
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Resource kinds to analyse
    #[arg(long = "resource", value_delimiter = ',', default_values = ["cpu", "memory"])]
    pub resources: Vec<ResourceKind>,

    /// Lookback window in hours, fractions allowed (default: 168 = 7 days)
    #[arg(long, default_value = "168")]
    pub window_hours: f64,

    /// Scrape interval of the metrics backend in seconds
    #[arg(long, default_value = "15")]
    pub scrape_interval_secs: u64,

    /// Safety buffer added on top of the observed p95 (default: 0.20 = 20%)
    #[arg(long, default_value = "0.20")]
    pub buffer_fraction: f64,

    /// Ratio of recommended limit to recommended request
    #[arg(long, default_value = "2.0")]
    pub limit_multiplier: f64,

    /// Parallel metric queries (default: number of CPUs, at most 16)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Output format
    #[arg(short, long, value_name = "FORMAT", default_value = "table")]
    pub output: OutputFormat,

    /// Apply every successful recommendation without interactive review
    #[arg(long)]
    pub apply: bool,

    /// Where accepted changes go
    #[arg(long, default_value = "pull-request")]
    pub apply_mode: ApplyMode,

    /// Local manifest directory for `--apply-mode local`
    #[arg(long, value_name = "DIR")]
    pub manifest_dir: Option<PathBuf>,

    /// Git repository holding the workload manifests
    #[arg(long, value_name = "URL")]
    pub manifest_url: Option<Url>,

    /// Branch the pull request targets
    #[arg(long, default_value = "main")]
    pub base_branch: String,

    /// Branch to create (default: rightsizing-<timestamp>)
    #[arg(long)]
    pub branch: Option<String>,

    /// Username for HTTPS git authentication
    #[arg(long)]
    pub git_username: Option<String>,

    /// Token for git push and pull request creation
    #[arg(long, env = "RIGHTSIZER_GIT_TOKEN", hide_env_values = true)]
    pub git_token: Option<String>,

    /// Commit author name
    #[arg(long, default_value = "rightsizer")]
    pub author_name: String,

    /// Commit author email
    #[arg(long, default_value = "rightsizer@users.noreply.local")]
    pub author_email: String,
}

/// Output format for the recommender results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain table on stdout
    Table,
    /// JSON document
    Json,
    /// YAML document
    Yaml,
    /// Interactive review (TUI)
    Interactive,
}

/// Set color and variants for help description
///
/// Thanks to [Praveen Perera](https://stackoverflow.com/a/76916424)
fn get_styles() -> clap::builder::Styles {
    let yellow_header = anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
    let red = anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

    clap::builder::Styles::styled()
        .usage(yellow_header)
        .header(yellow_header)
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(red)
        .error(red)
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recommendation_policy() {
        let cli = Cli::try_parse_from(["rightsizer", "--metrics-url", "http://prom:9090"]).unwrap();
        assert_eq!(cli.window_hours, 168.0);
        assert_eq!(cli.buffer_fraction, 0.20);
        assert_eq!(cli.limit_multiplier, 2.0);
        assert_eq!(cli.resources, vec![ResourceKind::Cpu, ResourceKind::Memory]);
        assert_eq!(cli.output, OutputFormat::Table);
        assert_eq!(cli.apply_mode, ApplyMode::PullRequest);
    }

    #[test]
    fn parses_fractional_window_and_resource_list() {
        let cli = Cli::try_parse_from([
            "rightsizer",
            "--amp-url",
            "https://aps.example.com/workspaces/ws-1",
            "--region",
            "eu-west-1",
            "--window-hours",
            "0.5",
            "--resource",
            "memory",
            "--output",
            "interactive",
        ])
        .unwrap();
        assert_eq!(cli.window_hours, 0.5);
        assert_eq!(cli.region, Some(AwsRegion::EuWest1));
        assert_eq!(cli.resources, vec![ResourceKind::Memory]);
        assert_eq!(cli.output, OutputFormat::Interactive);
    }
}
