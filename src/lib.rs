//! Kubernetes Resource Rightsizer Library
//!
//! Reads container CPU/memory usage from Prometheus (or Amazon Managed Prometheus),
//! derives capped request/limit recommendations and publishes accepted changes as
//! edits to the workload manifests, locally or as a pull request.

pub mod lib {
    pub mod aws_region;
    pub mod cli;
    pub mod config;
    pub mod error;
    pub mod kubernetes;
    pub mod logger;
    pub mod manifest;
    pub mod model;
    pub mod orchestrator;
    pub mod output;
    pub mod patch;
    pub mod prometheus;
    pub mod publish;
    pub mod quantity;
    pub mod recommender;
    pub mod review;
    pub mod stats;
    pub mod tui;
}

// Re-export commonly used types at the root level for convenience
pub use lib::aws_region::AwsRegion;
pub use lib::cli::{Cli, OutputFormat};
pub use lib::config::Config;
pub use lib::error::{
    ConfigError, ExitStatus, KubernetesError, ManifestError, MetricsError, PublishError,
    RecommenderError, Result,
};
pub use lib::kubernetes::KubernetesLoader;
pub use lib::logger::init_logger;
pub use lib::manifest::ManifestUpdater;
pub use lib::model::{ResourceKind, Window, WorkloadKind, WorkloadTarget};
pub use lib::orchestrator::{CancelSignal, FetchOrchestrator, FetchReport, plan_units};
pub use lib::output::{OutputMetadata, RecommenderOutput};
pub use lib::patch::{PatchSet, Selection};
pub use lib::prometheus::{MetricsAuth, MetricsSource, PrometheusClient};
pub use lib::publish::{PublishPipeline, PullRequestSpec};
pub use lib::recommender::{Recommendation, RecommendationPolicy, RecommendationStatus};
pub use lib::review::{ApplyMode, ReviewState};
pub use lib::stats::UsageStats;
pub use lib::tui::run_review;
