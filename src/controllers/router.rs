//! Router deployment patcher.
//!
//! The ingress operator does not expose resource requirements or the router
//! command on its API, so this controller enforces both directly on the
//! router deployments it labels with the owning ingress controller. Events
//! for eligible deployments land in a deduplicating set and are flushed in
//! one batch two seconds after the first event, since the ingress operator
//! emits clustered updates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::{error, info, warn};

use crate::informers::ResourceCache;
use crate::labels::INGRESSCONTROLLER_LABEL;

/// Delay between the first clustered event and the batched patch.
pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

/// Deduplicating debounce set. Offering a key reports whether the caller is
/// responsible for scheduling the flush (only the offer that transitions the
/// set from empty).
struct DebounceSet {
    inner: Mutex<HashSet<String>>,
}

impl DebounceSet {
    fn new() -> Self {
        DebounceSet {
            inner: Mutex::new(HashSet::new()),
        }
    }

    fn offer(&self, key: String) -> bool {
        let mut pending = self.inner.lock().expect("debounce set lock poisoned");
        let first = pending.is_empty();
        pending.insert(key);
        first
    }

    fn drain(&self) -> Vec<String> {
        let mut pending = self.inner.lock().expect("debounce set lock poisoned");
        pending.drain().collect()
    }
}

/// Enforces resource requirements and the container command on router
/// deployments owned by `kas*` ingress controllers.
pub struct RouterDeploymentController {
    client: Client,
    deployments: ResourceCache<Deployment>,
    resources: ResourceRequirements,
    command: Option<Vec<String>>,
    pending: DebounceSet,
}

impl RouterDeploymentController {
    pub fn new(
        client: Client,
        deployments: ResourceCache<Deployment>,
        resources: ResourceRequirements,
        command: Option<Vec<String>>,
    ) -> Arc<Self> {
        Arc::new(RouterDeploymentController {
            client,
            deployments,
            resources,
            command,
            pending: DebounceSet::new(),
        })
    }

    /// Informer callback for router deployment add/update events.
    pub fn observe(self: Arc<Self>, deployment: &Deployment) {
        if !self.should_patch(deployment) {
            return;
        }
        let key = cache_key(deployment);
        if self.pending.offer(key) {
            // delay the reconcile as we see clustered events
            tokio::spawn(async move {
                tokio::time::sleep(DEBOUNCE_DELAY).await;
                self.flush().await;
            });
        }
    }

    /// Drains the debounce set and patches every key that still needs it.
    async fn flush(&self) {
        for key in self.pending.drain() {
            let Some((namespace, name)) = key.split_once('/') else {
                continue;
            };
            if let Some(deployment) = self.deployments.get(Some(namespace), name) {
                if self.should_patch(&deployment) {
                    self.patch(&deployment).await;
                }
            }
        }
    }

    /// Sweeps every cached router deployment, patching immediately. Run at
    /// the tail of each reconcile pass.
    pub async fn patch_all(&self) {
        for deployment in self.deployments.list() {
            if self.should_patch(&deployment) {
                self.patch(&deployment).await;
            }
        }
    }

    fn should_patch(&self, deployment: &Deployment) -> bool {
        should_patch(
            deployment,
            &self.resources,
            self.command.as_deref(),
        )
    }

    async fn patch(&self, deployment: &Deployment) {
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        info!(
            deployment = %format!("{}/{}", namespace, name),
            "updating the resource limits and container command",
        );

        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let outcome: kube::Result<()> = async {
            let mut live = api.get(&name).await?;
            if let Some(spec) = live.spec.as_mut() {
                if let Some(pod_spec) = spec.template.spec.as_mut() {
                    if pod_spec.containers.len() == 1 {
                        let container = &mut pod_spec.containers[0];
                        container.resources = Some(self.resources.clone());
                        container.command = self.command.clone();
                    }
                }
            }
            api.replace(&name, &PostParams::default(), &live).await?;
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            warn!(
                deployment = %format!("{}/{}", namespace, name),
                error = %err,
                "router deployment patch failed, will retry on a later pass",
            );
        }
    }
}

/// Eligibility predicate: owned by a `kas*` ingress controller, exactly one
/// container, and drifted from the desired resources or command.
fn should_patch(
    deployment: &Deployment,
    resources: &ResourceRequirements,
    command: Option<&[String]>,
) -> bool {
    let owner = deployment
        .labels()
        .get(INGRESSCONTROLLER_LABEL)
        .map(String::as_str)
        .unwrap_or_default();
    if !owner.starts_with("kas") {
        return false;
    }

    let containers = match deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
    {
        Some(pod_spec) => &pod_spec.containers,
        None => return false,
    };
    if containers.len() != 1 {
        error!(
            deployment = %format!(
                "{}/{}",
                deployment.namespace().unwrap_or_default(),
                deployment.name_any(),
            ),
            "wrong number of containers for router deployment",
        );
        return false;
    }

    let container = &containers[0];
    container.resources.as_ref() != Some(resources)
        || container.command.as_deref() != command
}

fn cache_key(deployment: &Deployment) -> String {
    format!(
        "{}/{}",
        deployment.namespace().unwrap_or_default(),
        deployment.name_any(),
    )
}
