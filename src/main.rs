use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rightsizer::lib::config::MetricsAuthConfig;
use rightsizer::lib::output::render;
use rightsizer::{
    CancelSignal, Cli, Config, ExitStatus, FetchOrchestrator, KubernetesLoader, MetricsAuth,
    OutputFormat, PrometheusClient, PublishPipeline, RecommenderError, RecommenderOutput, Result,
    ReviewState, Selection, Window, init_logger, plan_units, run_review,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Install the default crypto provider for rustls
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();

    // The review TUI owns the terminal, so logs only go to the file
    let interactive = cli.output == OutputFormat::Interactive;
    if let Err(e) = init_logger(cli.verbose, cli.quiet || interactive) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let status = match run(cli).await {
        Ok(status) => status,
        Err(RecommenderError::Cancelled) => {
            warn!("Cancelled by operator");
            ExitStatus::Cancelled
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitStatus::from_error(&e)
        }
    };
    ExitCode::from(status.code())
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    let config = Config::from_cli(&cli)?;

    info!("Starting Kubernetes Resource Rightsizer");
    debug!("Metrics endpoint: {}", config.metrics.endpoint);
    debug!("Window: {} hours", config.recommender.window_hours);

    let window = Window::ending_now(
        config.recommender.window_hours,
        config.metrics.scrape_interval,
    )?;

    let loader = KubernetesLoader::new(config.kubernetes.clone()).await?;
    let workloads = loader.discover().await?;
    let units = plan_units(&workloads, &config.recommender.resources);
    if units.is_empty() {
        warn!("No workloads matched the namespace/selector, nothing to analyse");
    }

    let auth = match &config.metrics.auth {
        MetricsAuthConfig::None => MetricsAuth::None,
        MetricsAuthConfig::Bearer(token) => MetricsAuth::Bearer(token.clone()),
        MetricsAuthConfig::SigV4(region) => MetricsAuth::sigv4(*region).await?,
    };
    let client = PrometheusClient::new(config.metrics.endpoint.clone(), auth)?
        .with_scrape_interval(config.metrics.scrape_interval);
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::new(client),
        config.recommender.policy,
        config.recommender.concurrency,
    ));
    let cancel = CancelSignal::new();
    let pipeline = PublishPipeline::new();

    if config.output == OutputFormat::Interactive {
        let state = run_review(
            orchestrator,
            units,
            window,
            cancel,
            config.apply.clone(),
            pipeline,
        )
        .await?;

        match &state {
            ReviewState::Done { summary, .. } => println!("{}", summary),
            ReviewState::Failed { reason, .. }
            | ReviewState::Cancelled {
                failure: Some(reason),
            } => eprintln!("Error: {}", reason),
            _ => return Err(RecommenderError::Cancelled),
        }
        return Ok(state.exit_status());
    }

    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight queries");
            watcher.cancel();
        }
    });

    let bar = progress_bar(units.len() as u64, cli.quiet);
    let report = orchestrator
        .run(units, &window, &cancel, |p| bar.set_position(p.completed as u64))
        .await?;
    bar.finish_and_clear();

    info!(
        "{} recommendations, {} without a usable result",
        report.recommendations.len(),
        report.failed_count()
    );

    let cancelled = report.cancelled;
    let errors = report
        .recommendations
        .iter()
        .filter(|r| matches!(r.status, rightsizer::RecommendationStatus::Error(_)))
        .count();

    let output = RecommenderOutput::new(&config, workloads.len(), report, Utc::now());
    println!("{}", render(&output, config.output)?);

    if cancelled {
        return Err(RecommenderError::Cancelled);
    }

    if config.apply.apply_all {
        let selection = Selection::apply_all(&output.recommendations);
        if selection.is_empty() {
            warn!("No successful recommendations to apply");
        } else {
            info!("Applying {} recommendations", selection.len());
            let summary = pipeline
                .apply_selection(
                    &output.recommendations,
                    &selection,
                    &config.apply,
                    config.apply.mode,
                    |step| info!("{}", step.label()),
                )
                .await?;
            eprintln!("{}", summary);
        }
    }

    Ok(if errors > 0 {
        ExitStatus::PartialFailure
    } else {
        ExitStatus::Success
    })
}

fn progress_bar(total: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.cyan} [{bar:40.cyan/dim}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━━╸"),
    );
    pb.set_message("fetching metrics");
    pb
}
