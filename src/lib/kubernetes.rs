use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ListParams;
use kube::{Api, Client, Config, Resource, config::KubeConfigOptions};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;

use crate::lib::config::KubernetesConfig;
use crate::lib::error::{ConfigError, KubernetesError, Result};
use crate::lib::model::{ContainerSpec, CurrentSpec, DiscoveredWorkload, WorkloadKind};
use crate::lib::quantity::{parse_cpu, parse_memory};

/// Discovers workloads and their declared resources from the cluster
pub struct KubernetesLoader {
    client: Client,
    config: KubernetesConfig,
}

impl KubernetesLoader {
    pub async fn new(config: KubernetesConfig) -> Result<Self> {
        let client = if let Some(ref context) = config.context {
            debug!("Using kubeconfig context {}", context);
            let custom_config = Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

            Client::try_from(custom_config)
                .map_err(|e| KubernetesError::ConnectionFailed(e.to_string()))?
        } else {
            debug!("Creating a Kubernetes client using default kubeconfig");
            Client::try_default()
                .await
                .map_err(|e| KubernetesError::ConnectionFailed(e.to_string()))?
        };

        info!("Successfully created Kubernetes client");
        Ok(Self { client, config })
    }

    /// All Deployments, StatefulSets and DaemonSets in scope, sorted by namespace/name
    pub async fn discover(&self) -> Result<Vec<DiscoveredWorkload>> {
        let mut workloads = Vec::new();

        for deployment in self.list::<Deployment>().await? {
            let template = deployment.spec.as_ref().map(|s| &s.template);
            workloads.extend(to_workload(
                WorkloadKind::Deployment,
                &deployment.metadata,
                template,
            ));
        }
        for stateful_set in self.list::<StatefulSet>().await? {
            let template = stateful_set.spec.as_ref().map(|s| &s.template);
            workloads.extend(to_workload(
                WorkloadKind::StatefulSet,
                &stateful_set.metadata,
                template,
            ));
        }
        for daemon_set in self.list::<DaemonSet>().await? {
            let template = daemon_set.spec.as_ref().map(|s| &s.template);
            workloads.extend(to_workload(
                WorkloadKind::DaemonSet,
                &daemon_set.metadata,
                template,
            ));
        }

        workloads.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        info!("Discovered {} workloads", workloads.len());
        Ok(workloads)
    }

    async fn list<K>(&self) -> Result<Vec<K>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let mut lp = ListParams::default();
        if let Some(selector) = self.config.selector.as_deref() {
            lp = lp.labels(selector);
        }

        let api: Api<K> = match self.config.namespace.as_deref() {
            Some(namespace) => {
                debug!("Listing {} in {namespace} namespace", K::kind(&Default::default()));
                Api::namespaced(self.client.clone(), namespace)
            }
            None => {
                debug!("Listing {} in all namespaces", K::kind(&Default::default()));
                Api::all(self.client.clone())
            }
        };

        let list = api
            .list(&lp)
            .await
            .map_err(|e| KubernetesError::ApiError(e.to_string()))?;
        Ok(list.items)
    }
}

fn to_workload(
    kind: WorkloadKind,
    metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    template: Option<&PodTemplateSpec>,
) -> Option<DiscoveredWorkload> {
    let name = metadata.name.clone()?;
    let namespace = metadata.namespace.clone().unwrap_or_else(|| "default".into());
    let pod_spec = template?.spec.as_ref()?;

    let containers = pod_spec
        .containers
        .iter()
        .map(|c| container_spec(&c.name, c.resources.as_ref()))
        .collect();

    Some(DiscoveredWorkload {
        kind,
        namespace,
        name,
        containers,
    })
}

fn container_spec(name: &str, resources: Option<&ResourceRequirements>) -> ContainerSpec {
    let requests = resources.and_then(|r| r.requests.as_ref());
    let limits = resources.and_then(|r| r.limits.as_ref());

    ContainerSpec {
        name: name.to_string(),
        cpu: CurrentSpec {
            request: quantity(requests, "cpu", parse_cpu),
            limit: quantity(limits, "cpu", parse_cpu),
        },
        memory: CurrentSpec {
            request: quantity(requests, "memory", parse_memory),
            limit: quantity(limits, "memory", parse_memory),
        },
    }
}

fn quantity(
    map: Option<&BTreeMap<String, Quantity>>,
    key: &str,
    parse: fn(&str) -> Option<f64>,
) -> Option<f64> {
    let raw = map?.get(key)?;
    let parsed = parse(&raw.0);
    if parsed.is_none() {
        warn!("Ignoring unparseable {} quantity '{}'", key, raw.0);
    }
    parsed
}
