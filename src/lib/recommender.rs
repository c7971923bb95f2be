use serde::Serialize;

use crate::lib::error::{ConfigError, Result};
use crate::lib::model::{CurrentSpec, ResourceKind, WorkloadKind, WorkloadTarget};
use crate::lib::quantity::{display_quantity, format_quantity};
use crate::lib::stats::{InsufficientData, UsageStats};

pub const DEFAULT_BUFFER_FRACTION: f64 = 0.20;
pub const DEFAULT_LIMIT_MULTIPLIER: f64 = 2.0;

/// Buffering and limit derivation applied to an observed p95
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecommendationPolicy {
    pub buffer_fraction: f64,
    pub limit_multiplier: f64,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            buffer_fraction: DEFAULT_BUFFER_FRACTION,
            limit_multiplier: DEFAULT_LIMIT_MULTIPLIER,
        }
    }
}

/// Numbers produced by the policy for one observed p95
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    pub buffered_request: f64,
    pub computed_limit: f64,
    pub final_request: f64,
    pub final_limit: f64,
    pub capped: bool,
}

impl RecommendationPolicy {
    pub fn new(buffer_fraction: f64, limit_multiplier: f64) -> Result<Self> {
        if !buffer_fraction.is_finite() || buffer_fraction < 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "buffer fraction must be >= 0, got {}",
                buffer_fraction
            ))
            .into());
        }
        if !limit_multiplier.is_finite() || limit_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(format!(
                "limit multiplier must be >= 1, got {}",
                limit_multiplier
            ))
            .into());
        }
        Ok(Self {
            buffer_fraction,
            limit_multiplier,
        })
    }

    /// Buffer the p95, derive a limit and cap both at the currently declared limit.
    ///
    /// Without a declared limit there is no ceiling to cap against.
    pub fn size(&self, current: &CurrentSpec, p95: f64) -> Sizing {
        let buffered_request = p95.max(0.0) * (1.0 + self.buffer_fraction);
        let computed_limit = buffered_request * self.limit_multiplier;
        cap(buffered_request, computed_limit, current.limit)
    }
}

fn cap(buffered_request: f64, computed_limit: f64, ceiling: Option<f64>) -> Sizing {
    match ceiling {
        Some(ceiling) if computed_limit > ceiling => Sizing {
            buffered_request,
            computed_limit,
            final_request: buffered_request.min(ceiling),
            final_limit: ceiling,
            capped: true,
        },
        _ => Sizing {
            buffered_request,
            computed_limit,
            final_request: buffered_request,
            final_limit: computed_limit,
            capped: false,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RecommendationStatus {
    Ok,
    InsufficientData,
    Error(String),
}

impl RecommendationStatus {
    pub fn label(&self) -> &str {
        match self {
            RecommendationStatus::Ok => "ok",
            RecommendationStatus::InsufficientData => "insufficient data",
            RecommendationStatus::Error(_) => "error",
        }
    }
}

/// Identifies a recommendation within one fetch pass
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecommendationId {
    pub target: WorkloadTarget,
    pub resource: ResourceKind,
}

/// Sizing advice for one (target, resource kind)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub target: WorkloadTarget,
    pub workload_kind: WorkloadKind,
    pub resource: ResourceKind,
    pub current: CurrentSpec,
    pub observed_p95: Option<f64>,
    pub buffered_request: Option<f64>,
    pub computed_limit: Option<f64>,
    pub final_request: Option<f64>,
    pub final_limit: Option<f64>,
    pub capped: bool,
    /// Fewer samples than needed for a confident estimate
    pub caution: bool,
    pub usage: Option<UsageStats>,
    pub reason: String,
    pub status: RecommendationStatus,
}

impl Recommendation {
    pub fn id(&self) -> RecommendationId {
        RecommendationId {
            target: self.target.clone(),
            resource: self.resource,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RecommendationStatus::Ok
    }

    /// Re-cap against the values a manifest declares.
    ///
    /// The manifest becomes the reported current spec. The ceiling is the lower of its
    /// limit and the limit seen at discovery, so a drifted manifest never gets a limit
    /// above what it already declares.
    pub fn against_manifest(&self, declared: CurrentSpec) -> Self {
        let (Some(buffered), Some(computed)) = (self.buffered_request, self.computed_limit)
        else {
            return self.clone();
        };
        if declared == self.current {
            return self.clone();
        }

        let ceiling = match (declared.limit, self.current.limit) {
            (Some(manifest), Some(cluster)) => Some(manifest.min(cluster)),
            (manifest, cluster) => manifest.or(cluster),
        };
        let sizing = cap(buffered, computed, ceiling);

        let mut rec = self.clone();
        if sizing.capped && !self.capped {
            rec.reason.push_str(&format!(
                "; limit capped at manifest limit {}",
                display_quantity(self.resource, ceiling)
            ));
        }
        rec.current = declared;
        rec.final_request = Some(sizing.final_request);
        rec.final_limit = Some(sizing.final_limit);
        rec.capped = sizing.capped;
        rec
    }

    /// Recommendation for a target whose metrics could not be fetched
    pub fn failed(
        target: WorkloadTarget,
        workload_kind: WorkloadKind,
        resource: ResourceKind,
        current: CurrentSpec,
        reason: String,
    ) -> Self {
        Self {
            target,
            workload_kind,
            resource,
            current,
            observed_p95: None,
            buffered_request: None,
            computed_limit: None,
            final_request: None,
            final_limit: None,
            capped: false,
            caution: false,
            usage: None,
            reason: reason.clone(),
            status: RecommendationStatus::Error(reason),
        }
    }
}

/// Build the recommendation for one target from its usage summary
pub fn recommend(
    policy: &RecommendationPolicy,
    target: WorkloadTarget,
    workload_kind: WorkloadKind,
    resource: ResourceKind,
    current: CurrentSpec,
    usage: std::result::Result<UsageStats, InsufficientData>,
) -> Recommendation {
    let stats = match usage {
        Ok(stats) => stats,
        Err(InsufficientData) => {
            return Recommendation {
                target,
                workload_kind,
                resource,
                current,
                observed_p95: None,
                buffered_request: None,
                computed_limit: None,
                final_request: None,
                final_limit: None,
                capped: false,
                caution: false,
                usage: None,
                reason: format!("No {} samples in the window", resource),
                status: RecommendationStatus::InsufficientData,
            };
        }
    };

    let sizing = policy.size(&current, stats.p95);
    let reason = generate_reason(resource, &current, &stats, &sizing);

    Recommendation {
        target,
        workload_kind,
        resource,
        current,
        observed_p95: Some(stats.p95),
        buffered_request: Some(sizing.buffered_request),
        computed_limit: Some(sizing.computed_limit),
        final_request: Some(sizing.final_request),
        final_limit: Some(sizing.final_limit),
        capped: sizing.capped,
        caution: stats.is_low_confidence(),
        usage: Some(stats),
        reason,
        status: RecommendationStatus::Ok,
    }
}

/// Human-readable explanation for a recommendation
fn generate_reason(
    resource: ResourceKind,
    current: &CurrentSpec,
    stats: &UsageStats,
    sizing: &Sizing,
) -> String {
    let mut reasons = vec![format!(
        "{} p95 {} (avg {}) over {} samples",
        resource,
        format_quantity(resource, stats.p95),
        format_quantity(resource, stats.avg),
        stats.samples
    )];

    if current.request.is_none() {
        reasons.push(format!("no {} request set", resource));
    }

    if sizing.capped {
        reasons.push(format!(
            "computed limit {} capped at current limit {}",
            format_quantity(resource, sizing.computed_limit),
            display_quantity(resource, current.limit)
        ));
    }

    if stats.is_low_confidence() {
        reasons.push("too few samples for a confident estimate".to_string());
    }

    reasons.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::model::SampleSeries;
    use proptest::prelude::*;

    fn cpu_recommendation(values: &[f64], limit: Option<f64>) -> Recommendation {
        recommend(
            &RecommendationPolicy::default(),
            WorkloadTarget::new("default", "api", "app"),
            WorkloadKind::Deployment,
            ResourceKind::Cpu,
            CurrentSpec {
                request: Some(0.5),
                limit,
            },
            UsageStats::from_series(&SampleSeries::from_values(values)),
        )
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-9).unwrap_or(false)
    }

    #[test]
    fn uncapped_when_limit_has_headroom() {
        let rec = cpu_recommendation(&[0.1, 0.2, 0.3, 0.4, 0.5], Some(2.0));
        assert!(rec.is_ok());
        assert!(close(rec.observed_p95, 0.48));
        assert!(close(rec.buffered_request, 0.576));
        assert!(close(rec.computed_limit, 1.152));
        assert!(close(rec.final_request, 0.576));
        assert!(close(rec.final_limit, 1.152));
        assert!(!rec.capped);
    }

    #[test]
    fn capped_at_current_limit() {
        let rec = cpu_recommendation(&[0.1, 0.2, 0.3, 0.4, 0.5], Some(1.0));
        assert!(close(rec.computed_limit, 1.152));
        assert!(close(rec.final_limit, 1.0));
        assert!(close(rec.final_request, 0.576));
        assert!(rec.capped);
        assert!(rec.reason.contains("capped"));
    }

    #[test]
    fn request_is_capped_too_when_it_exceeds_the_limit() {
        let rec = cpu_recommendation(&[1.0, 1.0, 1.0], Some(1.0));
        assert!(close(rec.final_request, 1.0));
        assert!(close(rec.final_limit, 1.0));
        assert!(rec.capped);
    }

    #[test]
    fn no_declared_limit_means_no_cap() {
        let rec = cpu_recommendation(&[0.1, 0.2, 0.3, 0.4, 0.5], None);
        assert!(close(rec.final_limit, 1.152));
        assert!(!rec.capped);
    }

    #[test]
    fn empty_series_yields_insufficient_data() {
        let rec = cpu_recommendation(&[], Some(1.0));
        assert_eq!(rec.status, RecommendationStatus::InsufficientData);
        assert!(rec.final_request.is_none());
        assert!(rec.final_limit.is_none());
        assert!(!rec.is_ok());
    }

    #[test]
    fn single_sample_is_ok_with_caution() {
        let rec = cpu_recommendation(&[0.2], Some(1.0));
        assert!(rec.is_ok());
        assert!(rec.caution);
    }

    #[test]
    fn policy_rejects_nonsense() {
        assert!(RecommendationPolicy::new(-0.1, 2.0).is_err());
        assert!(RecommendationPolicy::new(0.2, 0.5).is_err());
        assert!(RecommendationPolicy::new(0.0, 1.0).is_ok());
    }

    proptest! {
        #[test]
        fn final_limit_never_exceeds_current_limit(
            p95 in 0.0f64..64.0,
            limit in 0.0f64..64.0,
            buffer in 0.0f64..1.0,
            multiplier in 1.0f64..4.0,
        ) {
            let policy = RecommendationPolicy::new(buffer, multiplier).unwrap();
            let current = CurrentSpec { request: None, limit: Some(limit) };
            let sizing = policy.size(&current, p95);

            prop_assert!(sizing.final_limit <= limit);
            prop_assert!(sizing.final_request <= sizing.final_limit);
            prop_assert!(sizing.final_request >= 0.0);
            prop_assert_eq!(sizing.capped, sizing.computed_limit > limit);
        }
    }

    #[test]
    fn manifest_limit_below_cluster_limit_recaps() {
        // Cluster says 2 cores, the manifest was lowered to 500m
        let rec = recommend(
            &RecommendationPolicy::default(),
            WorkloadTarget::new("shop", "api", "app"),
            WorkloadKind::Deployment,
            ResourceKind::Cpu,
            CurrentSpec {
                request: Some(0.25),
                limit: Some(2.0),
            },
            UsageStats::from_series(&SampleSeries::from_values(&[0.48])),
        );
        assert!(!rec.capped);

        let manifest = CurrentSpec {
            request: Some(0.25),
            limit: Some(0.5),
        };
        let recapped = rec.against_manifest(manifest);
        assert!(recapped.capped);
        assert_eq!(recapped.current, manifest);
        assert_eq!(recapped.final_limit, Some(0.5));
        assert!(recapped.final_request.unwrap() <= 0.5);
        assert!(recapped.reason.contains("manifest limit"));
    }

    #[test]
    fn manifest_without_limit_keeps_cluster_ceiling() {
        let rec = recommend(
            &RecommendationPolicy::default(),
            WorkloadTarget::new("shop", "api", "app"),
            WorkloadKind::Deployment,
            ResourceKind::Cpu,
            CurrentSpec {
                request: None,
                limit: Some(1.0),
            },
            UsageStats::from_series(&SampleSeries::from_values(&[0.8, 0.9])),
        );
        let recapped = rec.against_manifest(CurrentSpec::default());
        assert_eq!(recapped.final_limit, Some(1.0));
        assert!(recapped.capped);
        assert_eq!(rec.against_manifest(rec.current), rec);
    }
}
