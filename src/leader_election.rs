//! Kubernetes Lease-based leader election.
//!
//! Fleet shards run with multiple operator replicas; ingress controllers are
//! cluster-wide singletons, so only the Lease holder may reconcile them.
//! [`LeaderLease::acquire`] blocks until this replica holds the lease and
//! [`LeaderLease::hold`] renews it until leadership is lost.

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

const LEASE_NAME: &str = "kas-ingress-operator-leader";
const LEASE_DURATION_SECS: i32 = 30;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Detects the namespace for the leader election Lease.
///
/// Priority: explicit argument, then the service account namespace file,
/// then `"default"`.
pub fn detect_namespace(explicit: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/namespace")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "default".to_string())
}

/// A claim on the operator leader Lease, renewed with optimistic concurrency
/// via `resourceVersion` replaces.
pub struct LeaderLease {
    api: Api<Lease>,
    identity: String,
}

impl LeaderLease {
    pub fn new(client: Client, namespace: &str) -> Self {
        let api = Api::<Lease>::namespaced(client, namespace);
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("operator-{:08x}", rand::random::<u32>()));
        info!(identity = %identity, namespace = %namespace, "initialized leader lease");
        LeaderLease { api, identity }
    }

    /// Blocks until this replica holds the lease.
    pub async fn acquire(&self) -> anyhow::Result<()> {
        info!(identity = %self.identity, "waiting to acquire leader lease '{}'", LEASE_NAME);
        loop {
            match self.try_claim().await {
                Ok(true) => {
                    info!(identity = %self.identity, "acquired leader lease");
                    return Ok(());
                }
                Ok(false) => {
                    debug!("lease held by another replica, retrying in {:?}", RETRY_INTERVAL);
                }
                Err(err) => {
                    warn!(error = %err, "lease claim failed, retrying in {:?}", RETRY_INTERVAL);
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Renews the lease until leadership is lost, then returns. The caller
    /// should treat a return as a shutdown signal.
    pub async fn hold(&self) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.try_claim().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("leader lease taken over by another replica");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "failed to renew leader lease");
                    return;
                }
            }
        }
    }

    /// Clears the holder so a standby replica can take over immediately.
    pub async fn release(&self) {
        let lease = match self.api.get(LEASE_NAME).await {
            Ok(lease) => lease,
            Err(err) => {
                warn!(error = %err, "failed to read lease for release");
                return;
            }
        };
        if holder_of(&lease) != Some(self.identity.as_str()) {
            debug!("lease not held by us, skipping release");
            return;
        }

        let mut updated = lease;
        if let Some(spec) = updated.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self
            .api
            .replace(LEASE_NAME, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => info!("released leader lease"),
            Err(err) => warn!(error = %err, "failed to release leader lease"),
        }
    }

    /// One claim attempt: creates the lease, renews our hold, or takes over
    /// an expired hold. `Ok(false)` means another replica holds it.
    async fn try_claim(&self) -> anyhow::Result<bool> {
        let now = MicroTime(Utc::now());

        let existing = match self.api.get(LEASE_NAME).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(err)) if err.code == 404 => {
                return self.create(&now).await;
            }
            Err(err) => return Err(err.into()),
        };

        let ours = holder_of(&existing) == Some(self.identity.as_str());
        if !ours && !is_expired(existing.spec.as_ref()) {
            return Ok(false);
        }

        let previous = existing.spec.as_ref();
        let transitions = previous.and_then(|s| s.lease_transitions).unwrap_or(0);
        let mut updated = existing.clone();
        updated.spec = Some(LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            acquire_time: if ours {
                previous.and_then(|s| s.acquire_time.clone())
            } else {
                Some(now.clone())
            },
            renew_time: Some(now),
            lease_transitions: Some(if ours { transitions } else { transitions + 1 }),
            ..Default::default()
        });

        match self
            .api
            .replace(LEASE_NAME, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn create(&self, now: &MicroTime) -> anyhow::Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                acquire_time: Some(now.clone()),
                renew_time: Some(now.clone()),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn holder_of(lease: &Lease) -> Option<&str> {
    lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
}

fn is_expired(spec: Option<&LeaseSpec>) -> bool {
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS) as i64;
    match spec.and_then(|s| s.renew_time.as_ref()) {
        Some(MicroTime(renewed)) => {
            Utc::now().signed_duration_since(*renewed).num_seconds() > duration
        }
        None => true,
    }
}
