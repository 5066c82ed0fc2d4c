//! Ingress capacity controller.
//!
//! Sizes and shapes the cluster's ingress routing tier in response to the
//! observed Kafka workload: one zone-pinned ingress controller per worker
//! zone plus the default multi-zone `kas` controller. Excess replicas are
//! not reclaimed until demand drops by more than one replica, so churn in
//! the workload does not thrash the routers.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::{info, warn};

use crate::capacity;
use crate::config::ControllerConfig;
use crate::crd::{
    fetch_quota, produce_quota, EndpointPublishingStrategy, IngressController,
    IngressControllerSpec, Kafka, ManagedKafka, ManagedKafkaRoute, NodePlacement, Route,
};
use crate::error::{OperatorError, Result};
use crate::informers::ResourceCache;
use crate::labels::{
    default_labels, managed_kafka_key, HARD_STOP_AFTER_ANNOTATION, INGRESS_OPERATOR_NAMESPACE,
    KAS_MULTI_ZONE_LABEL, TOPOLOGY_KEY, WORKER_NODE_LABEL,
};

use super::router::RouterDeploymentController;
use super::routes;

/// Replica reductions of at most this size are held back (hysteresis).
const MIN_REPLICA_REDUCTION: i32 = 1;

/// Key managed inside the unsupported-override bag.
const RELOAD_INTERVAL_OVERRIDE: &str = "reloadInterval";

/// Name of the default multi-zone ingress controller.
const DEFAULT_CONTROLLER_NAME: &str = "kas";

/// Process-wide registry of the route labels zone controllers select on.
/// Writers are reconcile passes, readers are external collaborators asking
/// which labels to stamp on routes; entries are only ever added.
struct RouteMatchLabels {
    inner: RwLock<BTreeMap<String, String>>,
}

impl RouteMatchLabels {
    fn new() -> Self {
        RouteMatchLabels {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    fn insert(&self, key: String, value: String) {
        self.inner
            .write()
            .expect("route match labels lock poisoned")
            .insert(key, value);
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner
            .read()
            .expect("route match labels lock poisoned")
            .clone()
    }
}

/// Informer caches the reconciler reads.
pub struct Caches {
    pub nodes: ResourceCache<Node>,
    pub broker_pods: ResourceCache<Pod>,
    pub ingress_controllers: ResourceCache<IngressController>,
    pub kafkas: ResourceCache<Kafka>,
    pub routes: ResourceCache<Route>,
    pub services: ResourceCache<Service>,
}

/// Controls the resources and number of ingress replicas used by the managed
/// Kafka workload. Uses values from the actual Kafkas to determine ingress
/// demand.
pub struct IngressCapacityController {
    client: Client,
    config: ControllerConfig,
    caches: Caches,
    router: Option<Arc<RouterDeploymentController>>,
    route_match_labels: RouteMatchLabels,
}

impl IngressCapacityController {
    pub fn new(
        client: Client,
        config: ControllerConfig,
        caches: Caches,
        router: Option<Arc<RouterDeploymentController>>,
    ) -> Arc<Self> {
        Arc::new(IngressCapacityController {
            client,
            config,
            caches,
            router,
            route_match_labels: RouteMatchLabels::new(),
        })
    }

    /// Snapshot of the route labels collaborators should stamp on routes.
    /// The underlying map only ever grows.
    pub fn route_match_labels(&self) -> BTreeMap<String, String> {
        self.route_match_labels.snapshot()
    }

    pub fn add_to_route_match_labels(&self, key: String, value: String) {
        self.route_match_labels.insert(key, value);
    }

    /// Cluster app domain with the leading `apps.` stripped, read from the
    /// cluster-level default ingress controller.
    pub fn cluster_domain(&self) -> Result<String> {
        cluster_domain(
            &self.caches.ingress_controllers,
            self.config.cluster_domain_fallback.as_deref(),
        )
    }

    /// The externally resolvable route endpoints clients of the given
    /// managed Kafka should use, sorted by name.
    pub fn managed_kafka_routes_for(&self, managed_kafka: &ManagedKafka) -> Vec<ManagedKafkaRoute> {
        routes::managed_kafka_routes(
            managed_kafka,
            &self.caches.ingress_controllers,
            &self.caches.routes,
            &self.caches.services,
            &self.caches.broker_pods,
            &self.caches.nodes,
        )
    }

    /// One serialized reconcile pass: zone controllers, then the default
    /// controller, then the router deployment sweep.
    pub async fn reconcile(&self) -> Result<()> {
        let caches = &self.caches;
        if !(caches.nodes.is_ready()
            && caches.broker_pods.is_ready()
            && caches.ingress_controllers.is_ready()
            && caches.kafkas.is_ready())
        {
            warn!("one or more informer caches are not yet ready, skipping reconcile");
            return Ok(());
        }

        let default_domain = self.cluster_domain()?;

        let nodes = caches.nodes.list();
        let worker_node_count = nodes.len();
        let mut zones: Vec<String> = nodes
            .iter()
            .filter_map(|node| {
                node.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(TOPOLOGY_KEY))
                    .cloned()
            })
            .collect();
        zones.sort();
        zones.dedup();

        let kafkas = caches.kafkas.list();
        let connection_demand = capacity::connection_demand(&kafkas);

        if !zones.is_empty() {
            let egress = capacity::summarize(&kafkas, fetch_quota, None)?;
            let ingress = capacity::summarize(&kafkas, produce_quota, None)?;

            // there is an assumption that the nodes / brokers will be
            // balanced by zone
            let zone_fraction = 1.0 / zones.len() as f64;
            let replicas = capacity::replicas_for_zone(
                &ingress,
                &egress,
                connection_demand,
                zone_fraction,
                &self.config.capacity,
            )?;

            for zone in &zones {
                let kas_zone = format!("kas-{}", zone);
                let existing = caches
                    .ingress_controllers
                    .get(Some(INGRESS_OPERATOR_NAMESPACE), &kas_zone);
                let label_key = managed_kafka_key(&kas_zone);
                self.add_to_route_match_labels(label_key.clone(), "true".to_string());

                let domain = format!("{}.{}", kas_zone, default_domain);
                let candidate = build_ingress_controller(
                    DesiredIngress {
                        name: &kas_zone,
                        domain: &domain,
                        replicas,
                        route_match_labels: BTreeMap::from([(label_key, "true".to_string())]),
                        topology_value: Some(zone),
                        worker_node_count,
                    },
                    existing.as_deref(),
                    &self.config,
                );
                self.apply_ingress_controller(candidate, existing.as_deref())
                    .await;
            }
        }

        let existing = caches
            .ingress_controllers
            .get(Some(INGRESS_OPERATOR_NAMESPACE), DEFAULT_CONTROLLER_NAME);
        let replicas = capacity::replicas_for_default(connection_demand, &self.config.capacity);
        self.add_to_route_match_labels(KAS_MULTI_ZONE_LABEL.to_string(), "true".to_string());

        let domain = format!("{}.{}", DEFAULT_CONTROLLER_NAME, default_domain);
        let candidate = build_ingress_controller(
            DesiredIngress {
                name: DEFAULT_CONTROLLER_NAME,
                domain: &domain,
                replicas,
                route_match_labels: BTreeMap::from([(
                    KAS_MULTI_ZONE_LABEL.to_string(),
                    "true".to_string(),
                )]),
                topology_value: None,
                worker_node_count,
            },
            existing.as_deref(),
            &self.config,
        );
        self.apply_ingress_controller(candidate, existing.as_deref())
            .await;

        if let Some(router) = &self.router {
            router.patch_all().await;
        }

        Ok(())
    }

    /// Creates or edits one ingress controller. API failures are logged and
    /// left for the next pass; convergence is the retry mechanism.
    async fn apply_ingress_controller(
        &self,
        candidate: IngressController,
        existing: Option<&IngressController>,
    ) {
        let name = candidate.name_any();
        let api: Api<IngressController> =
            Api::namespaced(self.client.clone(), INGRESS_OPERATOR_NAMESPACE);

        let outcome = match existing {
            None => {
                info!(controller = %name, "creating ingress controller");
                api.create(&PostParams::default(), &candidate)
                    .await
                    .map(|_| ())
            }
            Some(existing) => match needs_update(&candidate, existing) {
                Ok(None) => return,
                Ok(Some(patch)) => {
                    info!(
                        controller = %name,
                        diff = %serde_json::to_string(&patch).unwrap_or_default(),
                        "updating the existing ingress controller",
                    );
                    self.edit_ingress_controller(&api, &name, &candidate).await
                }
                Err(err) => {
                    warn!(controller = %name, error = %err, "failed to diff ingress controller");
                    return;
                }
            },
        };

        if let Err(err) = outcome {
            warn!(
                controller = %name,
                error = %err,
                "ingress controller write failed, will retry on a later pass",
            );
        }
    }

    async fn edit_ingress_controller(
        &self,
        api: &Api<IngressController>,
        name: &str,
        candidate: &IngressController,
    ) -> kube::Result<()> {
        let mut live = api.get(name).await?;
        live.metadata.labels = candidate.metadata.labels.clone();
        live.metadata.annotations = candidate.metadata.annotations.clone();
        live.spec = candidate.spec.clone();
        api.replace(name, &PostParams::default(), &live)
            .await
            .map(|_| ())
    }
}

/// Reads the cluster app domain off the cluster-level `default` ingress
/// controller, stripping the leading `apps.`.
pub(crate) fn cluster_domain(
    ingress_controllers: &ResourceCache<IngressController>,
    fallback: Option<&str>,
) -> Result<String> {
    let reported = ingress_controllers
        .list()
        .iter()
        .find(|ic| ic.name_any() == "default")
        .and_then(|ic| ic.status.as_ref().and_then(|status| status.domain.clone()));

    let domain = match reported {
        Some(domain) => domain,
        None => fallback.map(str::to_owned).ok_or_else(|| {
            OperatorError::NotFound(
                "default ingresscontroller reports no domain and no cluster-domain-fallback is configured"
                    .to_string(),
            )
        })?,
    };

    Ok(domain
        .strip_prefix("apps.")
        .unwrap_or(domain.as_str())
        .to_string())
}

/// Inputs for one desired ingress controller.
pub(crate) struct DesiredIngress<'a> {
    pub name: &'a str,
    pub domain: &'a str,
    /// Replica count computed by the capacity model, before hysteresis
    pub replicas: i32,
    pub route_match_labels: BTreeMap<String, String>,
    /// Zone to pin router pods to; `None` for the multi-zone controller
    pub topology_value: Option<&'a str>,
    pub worker_node_count: usize,
}

/// Constructs the desired ingress controller, starting from the existing
/// object when present so fields this operator does not manage survive.
pub(crate) fn build_ingress_controller(
    desired: DesiredIngress<'_>,
    existing: Option<&IngressController>,
    config: &ControllerConfig,
) -> IngressController {
    let mut controller = existing.cloned().unwrap_or_else(|| {
        IngressController::new(desired.name, IngressControllerSpec::default())
    });

    let mut replicas = desired.replicas;
    // retain replicas as long as we're above the min reduction
    if let Some(existing_replicas) = existing.and_then(|e| e.spec.replicas) {
        if existing_replicas - replicas <= MIN_REPLICA_REDUCTION {
            replicas = existing_replicas.max(replicas);
        }
    }
    // enforce a minimum of two replicas on clusters that can accommodate it
    if replicas == 1 && desired.worker_node_count > 3 {
        replicas = 2;
    }

    controller.metadata.name = Some(desired.name.to_string());
    controller.metadata.namespace = Some(INGRESS_OPERATOR_NAMESPACE.to_string());
    controller.metadata.labels = Some(default_labels());

    controller.spec.domain = Some(desired.domain.to_string());
    controller.spec.route_selector = Some(LabelSelector {
        match_labels: Some(desired.route_match_labels),
        ..Default::default()
    });
    controller.spec.replicas = Some(replicas);
    controller.spec.endpoint_publishing_strategy = Some(EndpointPublishingStrategy::external_nlb());

    if let Some(zone) = desired.topology_value.filter(|zone| !zone.is_empty()) {
        let node_selector = BTreeMap::from([
            (TOPOLOGY_KEY.to_string(), zone.to_string()),
            (WORKER_NODE_LABEL.to_string(), String::new()),
        ]);
        controller.spec.node_placement = Some(NodePlacement {
            node_selector: Some(LabelSelector {
                match_labels: Some(node_selector),
                ..Default::default()
            }),
            other: BTreeMap::new(),
        });
    }

    if config.hard_stop_after.trim().is_empty() {
        if let Some(annotations) = controller.metadata.annotations.as_mut() {
            annotations.remove(HARD_STOP_AFTER_ANNOTATION);
        }
    } else {
        controller
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(
                HARD_STOP_AFTER_ANNOTATION.to_string(),
                config.hard_stop_after.clone(),
            );
    }

    // preserve any other unsupported overrides; only reloadInterval is ours
    let mut overrides = controller
        .spec
        .unsupported_config_overrides
        .take()
        .unwrap_or_default();
    if config.reload_interval_seconds > 0 {
        overrides.insert(
            RELOAD_INTERVAL_OVERRIDE.to_string(),
            Value::from(config.reload_interval_seconds),
        );
    } else {
        overrides.remove(RELOAD_INTERVAL_OVERRIDE);
    }
    controller.spec.unsupported_config_overrides = Some(overrides);

    controller
}

/// Decides whether the candidate warrants a write.
///
/// The candidate is diffed against the observed object as JSON; only diff
/// operations other than `add` count. Fields present on the observed object
/// but absent from the candidate (an `add` in the patch direction used here)
/// are foreign fields the partial model dropped, not drift.
pub(crate) fn needs_update(
    candidate: &IngressController,
    existing: &IngressController,
) -> Result<Option<json_patch::Patch>> {
    let expected = serde_json::to_value(candidate)?;
    let actual = serde_json::to_value(existing)?;
    let patch = json_patch::diff(&expected, &actual);
    let changed = patch
        .0
        .iter()
        .any(|op| !matches!(op, json_patch::PatchOperation::Add(_)));
    Ok(changed.then_some(patch))
}
