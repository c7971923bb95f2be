//! Concurrent fan-out of metric queries over every discovered target.
//!
//! Each unit (target, resource kind) is fetched and turned into a [`Recommendation`]
//! independently. Workers return owned results; the loop in [`FetchOrchestrator::run`]
//! is the only place that accumulates them and reports progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::lib::error::{RecommenderError, Result};
use crate::lib::model::{
    CurrentSpec, DiscoveredWorkload, ResourceKind, Window, WorkloadKind, WorkloadTarget,
};
use crate::lib::prometheus::MetricsSource;
use crate::lib::recommender::{
    Recommendation, RecommendationPolicy, RecommendationStatus, recommend,
};
use crate::lib::stats::UsageStats;

/// Hard ceiling on parallel queries against the metrics backend
pub const MAX_CONCURRENCY: usize = 16;

pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, MAX_CONCURRENCY)
}

/// Completed units out of the total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Global stop flag. Once set no new fetches are issued.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One fetch-and-recommend task
#[derive(Debug, Clone)]
pub struct FetchUnit {
    pub target: WorkloadTarget,
    pub workload_kind: WorkloadKind,
    pub resource: ResourceKind,
    pub current: CurrentSpec,
}

/// Expand workloads into units, one per container and resource kind
pub fn plan_units(workloads: &[DiscoveredWorkload], resources: &[ResourceKind]) -> Vec<FetchUnit> {
    workloads
        .iter()
        .flat_map(|w| {
            w.targets().flat_map(move |(target, container)| {
                resources.iter().map(move |resource| FetchUnit {
                    target: target.clone(),
                    workload_kind: w.kind,
                    resource: *resource,
                    current: container.spec_for(*resource),
                })
            })
        })
        .collect()
}

/// Result of a fetch pass
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Sorted by target identity then resource kind
    pub recommendations: Vec<Recommendation>,
    pub total_units: usize,
    pub cancelled: bool,
}

impl FetchReport {
    pub fn ok_count(&self) -> usize {
        self.recommendations.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.recommendations.len() - self.ok_count()
    }
}

pub struct FetchOrchestrator<S> {
    source: Arc<S>,
    policy: RecommendationPolicy,
    concurrency: usize,
}

impl<S: MetricsSource> FetchOrchestrator<S> {
    pub fn new(source: Arc<S>, policy: RecommendationPolicy, concurrency: usize) -> Self {
        Self {
            source,
            policy,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch every unit with bounded concurrency.
    ///
    /// Per-unit failures become `Error` recommendations. Fails only when units ran and
    /// every one of them failed against the backend.
    pub async fn run(
        &self,
        units: Vec<FetchUnit>,
        window: &Window,
        cancel: &CancelSignal,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<FetchReport> {
        let total = units.len();
        info!(
            "Fetching {} units with concurrency {}",
            total, self.concurrency
        );
        on_progress(Progress {
            completed: 0,
            total,
        });

        let mut results = stream::iter(units)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|unit| self.fetch_one(unit, window))
            .buffer_unordered(self.concurrency);

        let mut recommendations = Vec::with_capacity(total);
        let mut backend_failures = 0;
        while let Some((recommendation, backend_failed)) = results.next().await {
            if backend_failed {
                backend_failures += 1;
            }
            recommendations.push(recommendation);
            on_progress(Progress {
                completed: recommendations.len(),
                total,
            });
        }

        let cancelled = cancel.is_cancelled() && recommendations.len() < total;
        if cancelled {
            warn!(
                "Fetch cancelled after {}/{} units",
                recommendations.len(),
                total
            );
        }

        if !recommendations.is_empty() && backend_failures == recommendations.len() {
            let reason = recommendations
                .iter()
                .find_map(|r| match &r.status {
                    RecommendationStatus::Error(reason) => Some(reason.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            return Err(RecommenderError::BackendUnavailable(reason));
        }

        recommendations.sort_by(|a, b| a.id().cmp(&b.id()));

        Ok(FetchReport {
            recommendations,
            total_units: total,
            cancelled,
        })
    }

    /// Returns the recommendation and whether the backend call itself failed
    async fn fetch_one(&self, unit: FetchUnit, window: &Window) -> (Recommendation, bool) {
        let FetchUnit {
            target,
            workload_kind,
            resource,
            current,
        } = unit;

        match self.source.fetch(&target, workload_kind, resource, window).await {
            Ok(series) => {
                let usage = UsageStats::from_series(&series);
                let rec = recommend(
                    &self.policy,
                    target,
                    workload_kind,
                    resource,
                    current,
                    usage,
                );
                debug!("{} {}: {}", rec.target, rec.resource, rec.status.label());
                (rec, false)
            }
            Err(e) => {
                warn!("Failed to fetch {} {}: {}", target, resource, e);
                (
                    Recommendation::failed(target, workload_kind, resource, current, e.to_string()),
                    true,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::error::MetricsError;
    use crate::lib::model::{ContainerSpec, SampleSeries};
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Canned outcomes keyed by workload name
    struct FakeSource {
        outcomes: HashMap<String, std::result::Result<Vec<f64>, MetricsError>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(outcomes: Vec<(&str, std::result::Result<Vec<f64>, MetricsError>)>) -> Self {
            Self {
                outcomes: outcomes
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetricsSource for FakeSource {
        fn fetch(
            &self,
            target: &WorkloadTarget,
            _workload_kind: WorkloadKind,
            _kind: ResourceKind,
            _window: &Window,
        ) -> impl Future<Output = std::result::Result<SampleSeries, MetricsError>> + Send {
            let outcome = self
                .outcomes
                .get(&target.workload)
                .cloned()
                .unwrap_or(Ok(Vec::new()));
            self.calls.lock().unwrap().push(target.workload.clone());
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                outcome.map(|v| SampleSeries::from_values(&v))
            }
        }
    }

    fn workload(name: &str, containers: &[&str]) -> DiscoveredWorkload {
        DiscoveredWorkload {
            kind: WorkloadKind::Deployment,
            namespace: "default".into(),
            name: name.into(),
            containers: containers
                .iter()
                .map(|c| ContainerSpec {
                    name: c.to_string(),
                    cpu: CurrentSpec {
                        request: Some(0.5),
                        limit: Some(2.0),
                    },
                    memory: CurrentSpec {
                        request: None,
                        limit: None,
                    },
                })
                .collect(),
        }
    }

    fn window() -> Window {
        Window::ending_now(1.0, Duration::from_secs(15)).unwrap()
    }

    #[test]
    fn plans_one_unit_per_container_and_resource() {
        let units = plan_units(
            &[workload("api", &["app", "sidecar"]), workload("web", &["nginx"])],
            &ResourceKind::ALL,
        );
        assert_eq!(units.len(), 6);
        assert_eq!(units[0].current.limit, Some(2.0));
        assert_eq!(units[1].current.limit, None);
    }

    #[tokio::test]
    async fn isolates_per_target_failures_and_sorts_results() {
        let source = Arc::new(FakeSource::new(vec![
            ("web", Ok(vec![0.1, 0.2, 0.3, 0.4, 0.5])),
            ("api", Err(MetricsError::Network("timeout".into()))),
            ("batch", Ok(vec![])),
        ]));
        let orchestrator =
            FetchOrchestrator::new(source, RecommendationPolicy::default(), 4);
        let units = plan_units(
            &[workload("web", &["nginx"]), workload("api", &["app"]), workload("batch", &["job"])],
            &[ResourceKind::Cpu],
        );

        let report = orchestrator
            .run(units, &window(), &CancelSignal::new(), |_| {})
            .await
            .unwrap();

        let names: Vec<_> = report
            .recommendations
            .iter()
            .map(|r| r.target.workload.as_str())
            .collect();
        assert_eq!(names, vec!["api", "batch", "web"]);
        assert!(matches!(report.recommendations[0].status, RecommendationStatus::Error(_)));
        assert_eq!(
            report.recommendations[1].status,
            RecommendationStatus::InsufficientData
        );
        assert!(report.recommendations[2].is_ok());
        assert_eq!(report.ok_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn reports_progress_from_zero_to_total() {
        let source = Arc::new(FakeSource::new(vec![]));
        let orchestrator = FetchOrchestrator::new(source, RecommendationPolicy::default(), 2);
        let units = plan_units(&[workload("api", &["a", "b", "c"])], &ResourceKind::ALL);

        let mut seen = Vec::new();
        orchestrator
            .run(units, &window(), &CancelSignal::new(), |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(seen.first(), Some(&Progress { completed: 0, total: 6 }));
        assert_eq!(seen.last(), Some(&Progress { completed: 6, total: 6 }));
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_bound() {
        let source = Arc::new(FakeSource::new(vec![]));
        let orchestrator =
            FetchOrchestrator::new(source.clone(), RecommendationPolicy::default(), 3);
        let workloads: Vec<_> = (0..10).map(|i| workload(&format!("w{}", i), &["c"])).collect();

        orchestrator
            .run(
                plan_units(&workloads, &ResourceKind::ALL),
                &window(),
                &CancelSignal::new(),
                |_| {},
            )
            .await
            .unwrap();

        let peak = source.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {}", peak);
        assert!(peak > 1);
    }

    #[tokio::test]
    async fn fails_when_every_unit_hits_the_backend_error() {
        let source = Arc::new(FakeSource::new(vec![
            ("api", Err(MetricsError::Auth("403".into()))),
            ("web", Err(MetricsError::Network("refused".into()))),
        ]));
        let orchestrator = FetchOrchestrator::new(source, RecommendationPolicy::default(), 2);
        let units = plan_units(
            &[workload("api", &["app"]), workload("web", &["nginx"])],
            &ResourceKind::ALL,
        );

        let err = orchestrator
            .run(units, &window(), &CancelSignal::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RecommenderError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_target_list_is_not_a_failure() {
        let source = Arc::new(FakeSource::new(vec![]));
        let orchestrator = FetchOrchestrator::new(source, RecommendationPolicy::default(), 2);
        let report = orchestrator
            .run(Vec::new(), &window(), &CancelSignal::new(), |_| {})
            .await
            .unwrap();
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_new_fetches_and_keeps_completed_ones() {
        let source = Arc::new(FakeSource::new(vec![]));
        let orchestrator =
            FetchOrchestrator::new(source.clone(), RecommendationPolicy::default(), 1);
        let workloads: Vec<_> = (0..5).map(|i| workload(&format!("w{}", i), &["c"])).collect();
        let cancel = CancelSignal::new();

        let report = orchestrator
            .run(
                plan_units(&workloads, &[ResourceKind::Cpu]),
                &window(),
                &cancel,
                |p| {
                    if p.completed == 2 {
                        cancel.cancel();
                    }
                },
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.recommendations.len() < 5);
        assert!(report.recommendations.len() >= 2);
        assert_eq!(
            source.calls.lock().unwrap().len(),
            report.recommendations.len()
        );
    }
}
