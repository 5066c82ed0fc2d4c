//! Capacity model for the ingress routing tier.
//!
//! Pure functions that convert the observed Kafka workload demand (produce
//! and fetch quotas, connection limits, broker replica counts) into ingress
//! replica counts. Nothing in this module touches the Kubernetes API; the
//! reconciler feeds it snapshots and applies the results.

use std::sync::Arc;

use crate::crd::Kafka;
use crate::error::{OperatorError, Result};
use crate::quantity;

/// Capacity knobs resolved from process configuration.
#[derive(Debug, Clone, Default)]
pub struct CapacityConfig {
    /// Usable ingress bandwidth per router replica, in bytes/s
    pub max_ingress_throughput_bytes: i64,
    /// Connection limit per router replica
    pub max_ingress_connections: i32,
    /// Percentage of the theoretical peak demand to actually provision for
    pub peak_percentage: i32,
    /// Fixed replica count for zone controllers, bypassing the model
    pub az_replica_override: Option<i32>,
    /// Fixed replica count for the default controller, bypassing the model
    pub default_replica_override: Option<i32>,
}

/// Summary over per-broker-replica quota samples.
///
/// Each Kafka contributes `replicas` samples of its quota value, so `sum`
/// reflects cluster-wide demand while `max` reflects the hottest broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaSummary {
    pub count: u64,
    pub sum: i64,
    pub max: i64,
}

impl QuotaSummary {
    fn add_samples(&mut self, value: i64, samples: i32) {
        if samples <= 0 {
            return;
        }
        self.count += samples as u64;
        self.sum += value * samples as i64;
        self.max = self.max.max(value);
    }
}

/// Builds the quota summary for a workload snapshot.
///
/// `quota` extracts the quantity string from each Kafka; when it yields
/// nothing and no `default_value` is supplied the snapshot is malformed and
/// the current pass must be aborted.
pub fn summarize<F>(
    kafkas: &[Arc<Kafka>],
    quota: F,
    default_value: Option<&str>,
) -> Result<QuotaSummary>
where
    F: Fn(&Kafka) -> Option<String>,
{
    let mut summary = QuotaSummary::default();
    for kafka in kafkas {
        let value = match quota(kafka) {
            Some(v) => v,
            None => default_value
                .map(str::to_owned)
                .ok_or_else(|| {
                    OperatorError::InvalidState(
                        "a kafka lacks a produce or fetch quota".to_string(),
                    )
                })?,
        };
        let bytes = quantity::bytes(&value)?;
        summary.add_samples(bytes, kafka.broker_replicas());
    }
    Ok(summary)
}

/// Total connection demand across the workload: for each Kafka, the external
/// listener's per-broker connection limit times the broker replica count.
/// Kafkas missing either piece contribute 0.
pub fn connection_demand(kafkas: &[Arc<Kafka>]) -> i64 {
    kafkas
        .iter()
        .map(|k| {
            k.external_listener_max_connections()
                .map(|c| c * k.broker_replicas() as i64)
                .unwrap_or(0)
        })
        .sum()
}

/// Replica count for one zone-pinned ingress controller.
///
/// The per-replica budget assumes the worst case of sharing a node with a
/// broker: the broker's replication traffic and half of its client traffic
/// come out of the replica's bandwidth, plus 1Mi of padding for other
/// colocated pods.
pub fn replicas_for_zone(
    ingress: &QuotaSummary,
    egress: &QuotaSummary,
    connection_demand: i64,
    zone_fraction: f64,
    config: &CapacityConfig,
) -> Result<i32> {
    if let Some(replicas) = config.az_replica_override {
        return Ok(replicas);
    }

    let throughput = (egress.max + ingress.max) / 2;
    let replication_throughput = ingress.max * 2;

    let per_replica_bytes = config.max_ingress_throughput_bytes
        - replication_throughput
        - throughput / 2
        - quantity::MIB;

    if per_replica_bytes < 0 {
        return Err(OperatorError::Configuration(
            "cannot appropriately scale ingress as collocating with a broker takes more than the available node bandwidth"
                .to_string(),
        ));
    }

    // average of total ingress/egress in this zone, scaled back with the
    // assumption that we don't really need to meet the peak
    let mut demanded = (egress.sum + ingress.sum) as f64 * zone_fraction / 2.0;
    demanded *= config.peak_percentage as f64 / 100.0;

    let throughput_replicas = (demanded / per_replica_bytes as f64).ceil() as i32;
    let connection_replicas =
        replicas_for_connection_demand(connection_demand as f64 * zone_fraction, config);

    Ok(throughput_replicas.max(connection_replicas).max(1))
}

/// Replica count for the default multi-zone ingress controller. These
/// replicas serve bootstrap and admin traffic and are assumed never to be
/// bandwidth constrained.
pub fn replicas_for_default(connection_demand: i64, config: &CapacityConfig) -> i32 {
    if let Some(replicas) = config.default_replica_override {
        return replicas;
    }
    replicas_for_connection_demand(connection_demand as f64, config)
}

fn replicas_for_connection_demand(demand: f64, config: &CapacityConfig) -> i32 {
    (demand / config.max_ingress_connections as f64).ceil() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{fetch_quota, produce_quota, EXTERNAL_LISTENER_NAME};
    use serde_json::json;

    const MI: i64 = 1 << 20;

    fn kafka(replicas: i32, quota: &str, max_connections: i64) -> Arc<Kafka> {
        Arc::new(
            serde_json::from_value(json!({
                "apiVersion": "kafka.strimzi.io/v1beta2",
                "kind": "Kafka",
                "metadata": {"name": "demo", "namespace": "kafka-demo"},
                "spec": {
                    "kafka": {
                        "replicas": replicas,
                        "listeners": [
                            {"name": EXTERNAL_LISTENER_NAME,
                             "configuration": {"maxConnections": max_connections}},
                        ],
                        "config": {
                            "client.quota.callback.static.produce": quota,
                            "client.quota.callback.static.fetch": quota,
                        },
                    }
                }
            }))
            .unwrap(),
        )
    }

    fn config(max_throughput: i64, max_connections: i32, peak: i32) -> CapacityConfig {
        CapacityConfig {
            max_ingress_throughput_bytes: max_throughput,
            max_ingress_connections: max_connections,
            peak_percentage: peak,
            ..Default::default()
        }
    }

    #[test]
    fn test_summarize_counts_broker_replicas() {
        let kafkas = vec![kafka(3, "30Mi", 1000)];
        let summary = summarize(&kafkas, produce_quota, None).unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 90 * MI);
        assert_eq!(summary.max, 30 * MI);
    }

    #[test]
    fn test_summarize_missing_quota_fails() {
        let kafkas = vec![Arc::new(
            serde_json::from_value(json!({
                "apiVersion": "kafka.strimzi.io/v1beta2",
                "kind": "Kafka",
                "metadata": {"name": "demo", "namespace": "kafka-demo"},
                "spec": {"kafka": {"replicas": 3}}
            }))
            .unwrap(),
        )];
        assert!(summarize(&kafkas, fetch_quota, None).is_err());
        // a default keeps the pass alive
        let summary = summarize(&kafkas, fetch_quota, Some("10Mi")).unwrap();
        assert_eq!(summary.max, 10 * MI);
    }

    #[test]
    fn test_connection_demand() {
        let kafkas = vec![kafka(3, "30Mi", 1000), kafka(6, "30Mi", 50000)];
        assert_eq!(connection_demand(&kafkas), 3 * 1000 + 6 * 50000);

        // missing max connections contributes zero
        let bare: Arc<Kafka> = Arc::new(
            serde_json::from_value(json!({
                "apiVersion": "kafka.strimzi.io/v1beta2",
                "kind": "Kafka",
                "metadata": {"name": "demo", "namespace": "kafka-demo"},
                "spec": {"kafka": {"replicas": 3}}
            }))
            .unwrap(),
        );
        assert_eq!(connection_demand(&[bare]), 0);
    }

    #[test]
    fn test_single_zone_single_kafka() {
        // one worker zone, one kafka with 3 brokers at 30Mi quotas
        let kafkas = vec![kafka(3, "30Mi", 1000)];
        let cfg = config(300 * MI, 10000, 50);
        let ingress = summarize(&kafkas, produce_quota, None).unwrap();
        let egress = summarize(&kafkas, fetch_quota, None).unwrap();
        let demand = connection_demand(&kafkas);

        let zone = replicas_for_zone(&ingress, &egress, demand, 1.0, &cfg).unwrap();
        assert_eq!(zone, 1);
        assert_eq!(replicas_for_default(demand, &cfg), 1);
    }

    #[test]
    fn test_three_zones_connection_bound() {
        let kafkas = vec![kafka(6, "1Mi", 50000)];
        let cfg = config(300 * MI, 10000, 50);
        let ingress = summarize(&kafkas, produce_quota, None).unwrap();
        let egress = summarize(&kafkas, fetch_quota, None).unwrap();
        let demand = connection_demand(&kafkas);
        assert_eq!(demand, 300000);

        let zone = replicas_for_zone(&ingress, &egress, demand, 1.0 / 3.0, &cfg).unwrap();
        assert_eq!(zone, 10);
    }

    #[test]
    fn test_throughput_bound_zone() {
        // per-replica budget: 300Mi - 2*30Mi - 15Mi - 1Mi = 224Mi;
        // demand: 50 brokers * 60Mi / 2 * 0.5 = 750Mi -> 4 replicas
        let kafkas = vec![kafka(50, "30Mi", 10)];
        let cfg = config(300 * MI, 1_000_000, 50);
        let ingress = summarize(&kafkas, produce_quota, None).unwrap();
        let egress = summarize(&kafkas, fetch_quota, None).unwrap();

        let zone = replicas_for_zone(&ingress, &egress, 0, 1.0, &cfg).unwrap();
        assert_eq!(zone, 4);
    }

    #[test]
    fn test_unsatisfiable_configuration() {
        let kafkas = vec![kafka(3, "200Mi", 1000)];
        let cfg = config(300 * MI, 10000, 50);
        let ingress = summarize(&kafkas, produce_quota, None).unwrap();
        let egress = summarize(&kafkas, fetch_quota, None).unwrap();

        // replication alone (400Mi) exceeds the node budget
        let err = replicas_for_zone(&ingress, &egress, 0, 1.0, &cfg).unwrap_err();
        assert!(matches!(err, OperatorError::Configuration(_)));
    }

    #[test]
    fn test_overrides_bypass_the_model() {
        let cfg = CapacityConfig {
            max_ingress_throughput_bytes: 300 * MI,
            max_ingress_connections: 10000,
            peak_percentage: 50,
            az_replica_override: Some(7),
            default_replica_override: Some(4),
        };
        let empty = QuotaSummary::default();
        assert_eq!(
            replicas_for_zone(&empty, &empty, 999_999, 1.0, &cfg).unwrap(),
            7
        );
        assert_eq!(replicas_for_default(999_999, &cfg), 4);
    }

    #[test]
    fn test_empty_workload_yields_one_replica() {
        let cfg = config(300 * MI, 10000, 50);
        let empty = summarize(&[], produce_quota, None).unwrap();
        assert_eq!(empty, QuotaSummary::default());
        assert_eq!(replicas_for_zone(&empty, &empty, 0, 1.0, &cfg).unwrap(), 1);
        assert_eq!(replicas_for_default(0, &cfg), 0);
    }
}
