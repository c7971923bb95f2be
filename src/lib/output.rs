use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::lib::cli::OutputFormat;
use crate::lib::config::Config;
use crate::lib::error::Result;
use crate::lib::orchestrator::FetchReport;
use crate::lib::quantity::display_quantity;
use crate::lib::recommender::{Recommendation, RecommendationStatus};

/// Top-level output structure containing metadata and recommendations
#[derive(Debug, Clone, Serialize)]
pub struct RecommenderOutput {
    pub metadata: OutputMetadata,
    pub recommendations: Vec<Recommendation>,
}

/// Metadata about the recommendation run
#[derive(Debug, Clone, Serialize)]
pub struct OutputMetadata {
    pub timestamp: String,
    pub namespace: Option<String>,
    pub selector: Option<String>,
    pub window_hours: f64,
    pub buffer_fraction: f64,
    pub limit_multiplier: f64,
    pub total_workloads: usize,
    pub total_targets: usize,
    pub status_counts: StatusCounts,
    /// The fetch was interrupted and the list is partial
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub insufficient_data: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn of(recommendations: &[Recommendation]) -> Self {
        recommendations
            .iter()
            .fold(Self::default(), |mut counts, r| {
                match r.status {
                    RecommendationStatus::Ok => counts.ok += 1,
                    RecommendationStatus::InsufficientData => counts.insufficient_data += 1,
                    RecommendationStatus::Error(_) => counts.error += 1,
                }
                counts
            })
    }
}

impl RecommenderOutput {
    pub fn new(
        config: &Config,
        total_workloads: usize,
        report: FetchReport,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let recommendations = report.recommendations;
        let policy = &config.recommender.policy;

        Self {
            metadata: OutputMetadata {
                timestamp: timestamp.to_rfc3339(),
                namespace: config.kubernetes.namespace.clone(),
                selector: config.kubernetes.selector.clone(),
                window_hours: config.recommender.window_hours,
                buffer_fraction: policy.buffer_fraction,
                limit_multiplier: policy.limit_multiplier,
                total_workloads,
                total_targets: report.total_units,
                status_counts: StatusCounts::of(&recommendations),
                cancelled: report.cancelled,
            },
            recommendations,
        }
    }
}

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "Limit")]
    limit: String,
    #[tabled(rename = "p95")]
    p95: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

impl From<&Recommendation> for TableRow {
    fn from(r: &Recommendation) -> Self {
        let kind = r.resource;
        let change = |current: Option<f64>, new: Option<f64>| match new {
            Some(_) => format!(
                "{} → {}",
                display_quantity(kind, current),
                display_quantity(kind, new)
            ),
            None => display_quantity(kind, current),
        };

        let mut notes = Vec::new();
        if r.capped {
            notes.push("capped".to_string());
        }
        if r.caution {
            notes.push("few samples".to_string());
        }
        if let RecommendationStatus::Error(reason) = &r.status {
            notes.push(reason.clone());
        }

        Self {
            target: r.target.to_string(),
            resource: kind.to_string(),
            request: change(r.current.request, r.final_request),
            limit: change(r.current.limit, r.final_limit),
            p95: r
                .observed_p95
                .map(|p| display_quantity(kind, Some(p)))
                .unwrap_or_else(|| "-".into()),
            status: r.status.label().to_string(),
            notes: notes.join(", "),
        }
    }
}

/// Every recommendation as a table, failures and insufficient data included
pub fn render_table(recommendations: &[Recommendation]) -> String {
    if recommendations.is_empty() {
        return "No recommendations".to_string();
    }
    let rows: Vec<TableRow> = recommendations.iter().map(TableRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn render_json(output: &RecommenderOutput) -> Result<String> {
    Ok(serde_json::to_string_pretty(output)?)
}

pub fn render_yaml(output: &RecommenderOutput) -> Result<String> {
    Ok(serde_yaml::to_string(output)?)
}

/// Render for a non-interactive output format. Table output carries a one-line summary.
pub fn render(output: &RecommenderOutput, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => render_json(output),
        OutputFormat::Yaml => render_yaml(output),
        OutputFormat::Table | OutputFormat::Interactive => {
            let counts = output.metadata.status_counts;
            Ok(format!(
                "{}\n{} ok, {} insufficient data, {} failed{}",
                render_table(&output.recommendations),
                counts.ok,
                counts.insufficient_data,
                counts.error,
                if output.metadata.cancelled {
                    " (cancelled, partial results)"
                } else {
                    ""
                }
            ))
        }
    }
}
