//! Read-only snapshots of the managed Kafka workload resources.
//!
//! The strimzi `Kafka` resource supplies the demand inputs for the capacity
//! model: broker replica counts, the external listener's connection limit,
//! and the static produce/fetch quota callbacks configured on the brokers.
//! The fleet control plane's `ManagedKafka` resource supplies the bootstrap
//! host used when projecting route endpoints.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the listener terminating external client traffic.
pub const EXTERNAL_LISTENER_NAME: &str = "external";

/// Broker config key carrying the per-broker produce quota (bytes/s).
pub const PRODUCE_QUOTA_CONFIG: &str = "client.quota.callback.static.produce";

/// Broker config key carrying the per-broker fetch quota (bytes/s).
pub const FETCH_QUOTA_CONFIG: &str = "client.quota.callback.static.fetch";

/// Strimzi Kafka cluster resource, reduced to the fields this operator reads.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "Kafka",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka: Option<KafkaClusterSpec>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<GenericKafkaListener>,

    /// Broker configuration, including the static quota callback entries
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Value>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenericKafkaListener {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<KafkaListenerConfiguration>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaListenerConfiguration {
    /// Connection limit per broker on this listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i64>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// ManagedKafka custom resource, reduced to the endpoint fields needed for
/// route projection.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "managedkafka.bf2.org",
    version = "v1alpha1",
    kind = "ManagedKafka",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedKafkaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<ManagedKafkaEndpoint>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedKafkaEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_server_host: Option<String>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// An externally resolvable route endpoint projected for a managed Kafka.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedKafkaRoute {
    pub name: String,
    pub prefix: String,
    pub router: String,
}

impl ManagedKafkaRoute {
    pub fn new(name: &str, prefix: &str, router: String) -> Self {
        ManagedKafkaRoute {
            name: name.to_string(),
            prefix: prefix.to_string(),
            router,
        }
    }
}

impl Kafka {
    /// The per-broker connection limit declared on the external listener.
    pub fn external_listener_max_connections(&self) -> Option<i64> {
        self.spec
            .kafka
            .as_ref()?
            .listeners
            .iter()
            .filter(|l| l.name.as_deref() == Some(EXTERNAL_LISTENER_NAME))
            .find_map(|l| l.configuration.as_ref()?.max_connections)
    }

    /// Broker replica count, 0 when unset.
    pub fn broker_replicas(&self) -> i32 {
        self.spec
            .kafka
            .as_ref()
            .and_then(|k| k.replicas)
            .unwrap_or(0)
    }
}

/// Reads the per-broker produce quota quantity from the broker config.
pub fn produce_quota(kafka: &Kafka) -> Option<String> {
    broker_config_value(kafka, PRODUCE_QUOTA_CONFIG)
}

/// Reads the per-broker fetch quota quantity from the broker config.
pub fn fetch_quota(kafka: &Kafka) -> Option<String> {
    broker_config_value(kafka, FETCH_QUOTA_CONFIG)
}

fn broker_config_value(kafka: &Kafka, key: &str) -> Option<String> {
    match kafka.spec.kafka.as_ref()?.config.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kafka(value: Value) -> Kafka {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_quota_accessors() {
        let k = kafka(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "Kafka",
            "metadata": {"name": "demo", "namespace": "kafka-demo"},
            "spec": {
                "kafka": {
                    "replicas": 3,
                    "config": {
                        "client.quota.callback.static.produce": "30Mi",
                        "client.quota.callback.static.fetch": 31457280,
                    },
                }
            }
        }));

        assert_eq!(produce_quota(&k).as_deref(), Some("30Mi"));
        assert_eq!(fetch_quota(&k).as_deref(), Some("31457280"));
        assert_eq!(k.broker_replicas(), 3);
    }

    #[test]
    fn test_external_listener_max_connections() {
        let k = kafka(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "Kafka",
            "metadata": {"name": "demo", "namespace": "kafka-demo"},
            "spec": {
                "kafka": {
                    "replicas": 3,
                    "listeners": [
                        {"name": "plain"},
                        {"name": "external", "configuration": {"maxConnections": 1000}},
                    ],
                }
            }
        }));

        assert_eq!(k.external_listener_max_connections(), Some(1000));
    }

    #[test]
    fn test_missing_pieces_yield_none() {
        let k = kafka(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "Kafka",
            "metadata": {"name": "demo", "namespace": "kafka-demo"},
            "spec": {"kafka": {"replicas": 1}}
        }));

        assert_eq!(produce_quota(&k), None);
        assert_eq!(k.external_listener_max_connections(), None);
    }
}
