use std::fmt;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::lib::error::{ConfigError, Result};

/// Workload controller kinds the rightsizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }

    pub fn from_manifest_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(WorkloadKind::Deployment),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            _ => None,
        }
    }
}

/// One (namespace, workload, container) unit under analysis
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkloadTarget {
    pub namespace: String,
    pub workload: String,
    pub container: String,
}

impl WorkloadTarget {
    pub fn new(
        namespace: impl Into<String>,
        workload: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            workload: workload.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for WorkloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.workload, self.container)
    }
}

/// CPU is measured in cores, memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];

    /// Key used under `resources.requests` / `resources.limits`
    pub fn manifest_key(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "CPU"),
            ResourceKind::Memory => write!(f, "Memory"),
        }
    }
}

/// Longest lookback accepted, one leap year
pub const MAX_WINDOW_HOURS: f64 = 366.0 * 24.0;

/// Lookback window ending at `end`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub end: SystemTime,
    pub hours: f64,
}

impl Window {
    /// Window ending now. `hours` must be positive and cover at least one scrape interval.
    pub fn ending_now(hours: f64, scrape_interval: Duration) -> Result<Self> {
        Self::new(SystemTime::now(), hours, scrape_interval)
    }

    pub fn new(end: SystemTime, hours: f64, scrape_interval: Duration) -> Result<Self> {
        if !hours.is_finite() || hours <= 0.0 {
            return Err(ConfigError::InvalidValue(format!(
                "window must be a positive number of hours, got {}",
                hours
            ))
            .into());
        }
        if hours > MAX_WINDOW_HOURS {
            return Err(ConfigError::InvalidValue(format!(
                "window of {} hours exceeds the maximum of {} hours",
                hours, MAX_WINDOW_HOURS
            ))
            .into());
        }
        if hours * 3600.0 < scrape_interval.as_secs_f64() {
            return Err(ConfigError::InvalidValue(format!(
                "window of {} hours is shorter than the scrape interval of {}s",
                hours,
                scrape_interval.as_secs()
            ))
            .into());
        }
        Ok(Self { end, hours })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.hours * 3600.0)
    }

    pub fn start(&self) -> SystemTime {
        self.end
            .checked_sub(self.duration())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// One observation: (unix seconds, value)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: f64,
    pub value: f64,
}

/// Observations for one (target, resource kind) over a window, ordered by timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSeries {
    samples: Vec<Sample>,
}

impl SampleSeries {
    pub fn new(mut samples: Vec<Sample>) -> Self {
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self { samples }
    }

    /// Series with synthetic, evenly spaced timestamps
    pub fn from_values(values: &[f64]) -> Self {
        Self::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| Sample {
                    timestamp: i as f64,
                    value: *v,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

/// Request/limit as currently declared for one target and resource kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CurrentSpec {
    pub request: Option<f64>,
    pub limit: Option<f64>,
}

/// Declared resources of a single container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub cpu: CurrentSpec,
    pub memory: CurrentSpec,
}

impl ContainerSpec {
    pub fn spec_for(&self, kind: ResourceKind) -> CurrentSpec {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Memory => self.memory,
        }
    }
}

/// A workload found in the cluster, with its containers
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredWorkload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub containers: Vec<ContainerSpec>,
}

impl DiscoveredWorkload {
    pub fn targets(&self) -> impl Iterator<Item = (WorkloadTarget, &ContainerSpec)> {
        self.containers.iter().map(|c| {
            (
                WorkloadTarget::new(&self.namespace, &self.name, &c.name),
                c,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rejects_non_positive_hours() {
        let scrape = Duration::from_secs(15);
        assert!(Window::ending_now(0.0, scrape).is_err());
        assert!(Window::ending_now(-1.0, scrape).is_err());
        assert!(Window::ending_now(f64::NAN, scrape).is_err());
    }

    #[test]
    fn window_rejects_hours_beyond_a_year() {
        let scrape = Duration::from_secs(15);
        assert!(Window::ending_now(1e300, scrape).is_err());
        assert!(Window::ending_now(MAX_WINDOW_HOURS + 1.0, scrape).is_err());

        let longest = Window::ending_now(MAX_WINDOW_HOURS, scrape).unwrap();
        assert_eq!(longest.duration(), Duration::from_secs(366 * 24 * 3600));
        assert!(longest.start() < longest.end);
    }

    #[test]
    fn window_accepts_fractional_hours_down_to_scrape_interval() {
        let scrape = Duration::from_secs(15);
        let w = Window::ending_now(0.25, scrape).unwrap();
        assert_eq!(w.duration(), Duration::from_secs(900));
        assert!(Window::ending_now(10.0 / 3600.0, scrape).is_err());
    }

    #[test]
    fn series_is_ordered_by_timestamp() {
        let series = SampleSeries::new(vec![
            Sample { timestamp: 20.0, value: 2.0 },
            Sample { timestamp: 10.0, value: 1.0 },
        ]);
        assert_eq!(series.values(), vec![1.0, 2.0]);
    }

    #[test]
    fn targets_order_by_identity() {
        let mut targets = vec![
            WorkloadTarget::new("b", "api", "app"),
            WorkloadTarget::new("a", "web", "nginx"),
            WorkloadTarget::new("a", "api", "sidecar"),
        ];
        targets.sort();
        assert_eq!(targets[0].to_string(), "a/api/sidecar");
        assert_eq!(targets[2].to_string(), "b/api/app");
    }
}
