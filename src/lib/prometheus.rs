use std::future::Future;
use std::time::{Duration, SystemTime};

use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use log::{debug, warn};
use reqwest::{Client, Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::lib::aws_region::AwsRegion;
use crate::lib::error::MetricsError;
use crate::lib::model::{ResourceKind, Sample, SampleSeries, Window, WorkloadKind, WorkloadTarget};

/// Rate window used for the CPU counter
const CPU_RATE_WINDOW: &str = "5m";

/// Upper bound on points requested per series; 7 days at 5m steps
const MAX_POINTS: f64 = 2016.0;

/// Alphabet of the random suffixes controllers append to pod names
const POD_SUFFIX_CHARS: &str = "[bcdfghjklmnpqrstvwxz2456789]";

type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// Anything that can produce a sample series for a target.
///
/// Implemented by [`PrometheusClient`]; tests substitute canned sources.
pub trait MetricsSource: Send + Sync {
    fn fetch(
        &self,
        target: &WorkloadTarget,
        workload_kind: WorkloadKind,
        kind: ResourceKind,
        window: &Window,
    ) -> impl Future<Output = MetricsResult<SampleSeries>> + Send;
}

/// How the client proves its identity to the backend
#[derive(Debug, Clone)]
pub enum MetricsAuth {
    None,
    Bearer(String),
    /// AWS SigV4 request signing (Amazon Managed Prometheus)
    SigV4 {
        region: AwsRegion,
        credentials: Credentials,
    },
}

impl MetricsAuth {
    /// Load AWS credentials from the default provider chain
    pub async fn sigv4(region: AwsRegion) -> MetricsResult<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let credentials = config
            .credentials_provider()
            .ok_or_else(|| MetricsError::Auth("no AWS credentials provider configured".into()))?
            .provide_credentials()
            .await
            .map_err(|e| MetricsError::Auth(format!("failed to load AWS credentials: {}", e)))?;

        Ok(MetricsAuth::SigV4 {
            region,
            credentials,
        })
    }
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Prometheus HTTP API client
pub struct PrometheusClient {
    client: Client,
    endpoint: Url,
    auth: MetricsAuth,
    retry: RetryPolicy,
    scrape_interval: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrometheusResponse {
    pub status: String,
    pub data: PrometheusData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrometheusData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    pub result: Vec<PrometheusResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrometheusResult {
    pub metric: std::collections::HashMap<String, String>,
    pub value: Option<(f64, String)>,
    pub values: Option<Vec<(f64, String)>>,
}

impl PrometheusClient {
    pub fn new(endpoint: Url, auth: MetricsAuth) -> MetricsResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MetricsError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            auth,
            retry: RetryPolicy::default(),
            scrape_interval: Duration::from_secs(15),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_scrape_interval(mut self, scrape_interval: Duration) -> Self {
        self.scrape_interval = scrape_interval;
        self
    }

    /// Execute an instant PromQL query
    pub async fn query(&self, query: &str) -> MetricsResult<PrometheusResponse> {
        let mut url = self.api_url("query");
        url.query_pairs_mut().append_pair("query", query);

        self.execute_with_retry(url).await
    }

    /// Execute a PromQL range query
    pub async fn query_range(
        &self,
        query: &str,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
    ) -> MetricsResult<PrometheusResponse> {
        let mut url = self.api_url("query_range");
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("start", &unix_seconds(start).to_string())
            .append_pair("end", &unix_seconds(end).to_string())
            .append_pair("step", &format!("{}s", step.as_secs().max(1)));

        self.execute_with_retry(url).await
    }

    /// Range query for one target and resource kind, flattened into a single series
    pub async fn query_series(
        &self,
        target: &WorkloadTarget,
        workload_kind: WorkloadKind,
        kind: ResourceKind,
        window: &Window,
    ) -> MetricsResult<SampleSeries> {
        let query = build_query(target, workload_kind, kind);
        let step = step_for(window, self.scrape_interval);
        let response = self
            .query_range(&query, window.start(), window.end, step)
            .await?;

        let series = series_from_response(response);
        debug!(
            "Collected {} data points for {} {}",
            series.len(),
            target,
            kind
        );
        Ok(series)
    }

    fn api_url(&self, endpoint: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_path(&format!(
            "{}/api/v1/{}",
            url.path().trim_end_matches('/'),
            endpoint
        ));
        url
    }

    async fn execute_with_retry(&self, url: Url) -> MetricsResult<PrometheusResponse> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.execute_request(url.clone()).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(
                        "Metrics query failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, self.retry.max_attempts, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Execute a single authenticated GET
    async fn execute_request(&self, url: Url) -> MetricsResult<PrometheusResponse> {
        let mut request = Request::new(Method::GET, url.clone());
        self.authenticate(&mut request, &url)?;

        let response = self.client.execute(request).await.map_err(|e| {
            if e.is_decode() {
                MetricsError::Backend(e.to_string())
            } else {
                MetricsError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let prom_response: PrometheusResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::Backend(format!("malformed response: {}", e)))?;

        if prom_response.status != "success" {
            return Err(MetricsError::Backend(format!(
                "Prometheus returned status: {}",
                prom_response.status
            )));
        }

        Ok(prom_response)
    }

    fn authenticate(&self, request: &mut Request, url: &Url) -> MetricsResult<()> {
        match &self.auth {
            MetricsAuth::None => Ok(()),
            MetricsAuth::Bearer(token) => {
                let value = format!("Bearer {}", token)
                    .parse()
                    .map_err(|_| MetricsError::Auth("bearer token is not a valid header".into()))?;
                request
                    .headers_mut()
                    .insert(reqwest::header::AUTHORIZATION, value);
                Ok(())
            }
            MetricsAuth::SigV4 {
                region,
                credentials,
            } => sign_request(request, url, *region, credentials),
        }
    }
}

impl MetricsSource for PrometheusClient {
    fn fetch(
        &self,
        target: &WorkloadTarget,
        workload_kind: WorkloadKind,
        kind: ResourceKind,
        window: &Window,
    ) -> impl Future<Output = MetricsResult<SampleSeries>> + Send {
        self.query_series(target, workload_kind, kind, window)
    }
}

/// Sign the request with AWS SigV4 for the `aps` service
fn sign_request(
    request: &mut Request,
    url: &Url,
    region: AwsRegion,
    credentials: &Credentials,
) -> MetricsResult<()> {
    let signable_request = SignableRequest::new(
        request.method().as_str(),
        url.as_str(),
        std::iter::empty(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|e| MetricsError::Auth(e.to_string()))?;

    let identity: Identity = credentials.clone().into();
    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region.as_str())
        .name("aps")
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| MetricsError::Auth(e.to_string()))?
        .into();

    let (signing_instructions, _) = aws_sigv4::http_request::sign(signable_request, &signing_params)
        .map_err(|e| MetricsError::Auth(e.to_string()))?
        .into_parts();

    for (name, value) in signing_instructions.headers() {
        let header_name: reqwest::header::HeaderName = name
            .parse()
            .map_err(|_| MetricsError::Auth(format!("invalid signed header name {}", name)))?;
        let header_value: reqwest::header::HeaderValue = value
            .parse()
            .map_err(|_| MetricsError::Auth(format!("invalid signed header value for {}", name)))?;
        request.headers_mut().insert(header_name, header_value);
    }

    Ok(())
}

fn classify_status(status: StatusCode, body: String) -> MetricsError {
    let detail = format!("HTTP {}: {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MetricsError::Auth(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            MetricsError::InvalidQuery(detail)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            MetricsError::Network(detail)
        }
        s if s.is_server_error() => MetricsError::Network(detail),
        _ => MetricsError::Backend(detail),
    }
}

/// Regex matching the names of pods the controller creates for `workload`.
///
/// Deployment pods are `<name>-<replicaset hash>-<suffix>`, DaemonSet pods
/// `<name>-<suffix>` and StatefulSet pods `<name>-<ordinal>`. Anchoring on the suffix
/// shape keeps `api` from matching pods of a sibling workload such as `api-gateway`.
pub fn pod_pattern(workload: &str, workload_kind: WorkloadKind) -> String {
    let name = workload.replace('.', r"\.");
    match workload_kind {
        WorkloadKind::Deployment => format!(
            "{}-{}{{1,10}}-{}{{5}}",
            name, POD_SUFFIX_CHARS, POD_SUFFIX_CHARS
        ),
        WorkloadKind::DaemonSet => format!("{}-{}{{5}}", name, POD_SUFFIX_CHARS),
        WorkloadKind::StatefulSet => format!("{}-[0-9]+", name),
    }
}

/// PromQL for a target: CPU as a rate over the counter, memory as working set
pub fn build_query(
    target: &WorkloadTarget,
    workload_kind: WorkloadKind,
    kind: ResourceKind,
) -> String {
    // Backslashes are escaped once more inside the PromQL string literal
    let pods = pod_pattern(&target.workload, workload_kind).replace('\\', r"\\");
    let selector = format!(
        r#"namespace="{}",pod=~"{}",container="{}""#,
        target.namespace, pods, target.container
    );
    match kind {
        ResourceKind::Cpu => format!(
            "rate(container_cpu_usage_seconds_total{{{}}}[{}])",
            selector, CPU_RATE_WINDOW
        ),
        ResourceKind::Memory => format!("container_memory_working_set_bytes{{{}}}", selector),
    }
}

/// Range step: never finer than the scrape interval, never more than MAX_POINTS per series
pub fn step_for(window: &Window, scrape_interval: Duration) -> Duration {
    let spread = (window.duration().as_secs_f64() / MAX_POINTS).ceil() as u64;
    Duration::from_secs(spread.max(scrape_interval.as_secs()).max(1))
}

/// Merge every returned series into one, dropping unusable values
fn series_from_response(response: PrometheusResponse) -> SampleSeries {
    let mut samples = Vec::new();
    for result in response.data.result {
        let points = result
            .values
            .unwrap_or_default()
            .into_iter()
            .chain(result.value);
        for (timestamp, value_str) in points {
            if let Ok(value) = value_str.parse::<f64>() {
                if value.is_finite() && value >= 0.0 {
                    samples.push(Sample { timestamp, value });
                }
            }
        }
    }
    SampleSeries::new(samples)
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
