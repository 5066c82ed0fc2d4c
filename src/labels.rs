//! Label, annotation, and namespace constants shared across the operator.
//!
//! These mirror the well-known keys used by OpenShift's ingress operator and
//! by the strimzi cluster operator; the `managedkafka.bf2.org` keys are the
//! ones this operator stamps onto routes and route selectors.

use std::collections::BTreeMap;

/// Name this operator reports in `app.kubernetes.io/managed-by` labels.
pub const OPERATOR_NAME: &str = "kas-ingress-operator";

/// The node label identifying the availability zone in which a node resides.
pub const TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";

/// Label present on schedulable worker nodes.
pub const WORKER_NODE_LABEL: &str = "node-role.kubernetes.io/worker";

/// Label present on infra nodes, which are excluded from capacity math.
pub const INFRA_NODE_LABEL: &str = "node-role.kubernetes.io/infra";

/// Label the ingress operator stamps on router deployments to record the
/// owning ingress controller.
pub const INGRESSCONTROLLER_LABEL: &str =
    "ingresscontroller.operator.openshift.io/owning-ingresscontroller";

/// Annotation controlling haproxy's hard-stop-after behaviour.
pub const HARD_STOP_AFTER_ANNOTATION: &str = "ingress.operator.openshift.io/hard-stop-after";

/// Namespace in which IngressController resources live.
pub const INGRESS_OPERATOR_NAMESPACE: &str = "openshift-ingress-operator";

/// Namespace in which the ingress operator creates router deployments.
pub const INGRESS_ROUTER_NAMESPACE: &str = "openshift-ingress";

/// Domain part prefixed to the domain reported on IngressController status.
/// CNAME records need to point at a sub-domain of the IngressController
/// domain, so we just add this.
pub const ROUTER_SUBDOMAIN: &str = "ingresscontroller.";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const K8S_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const STRIMZI_OPERATOR_NAME: &str = "strimzi-cluster-operator";

/// Label group owned by the managed Kafka fleet.
pub const MANAGED_KAFKA_GROUP: &str = "managedkafka.bf2.org";

/// Route label selecting the default multi-zone ingress controller.
pub const KAS_MULTI_ZONE_LABEL: &str = "managedkafka.bf2.org/kas-multi-zone";

/// Qualifies a bare key with the managed Kafka label group,
/// e.g. `kas-us-east-1a` -> `managedkafka.bf2.org/kas-us-east-1a`.
pub fn managed_kafka_key(key: &str) -> String {
    format!("{}/{}", MANAGED_KAFKA_GROUP, key)
}

/// Labels stamped on every resource this operator creates or edits.
pub fn default_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
    labels
}

/// Watch selector for worker nodes: labelled as workers, not infra.
pub fn worker_node_selector() -> String {
    format!("{},!{}", WORKER_NODE_LABEL, INFRA_NODE_LABEL)
}

/// Watch selector for Kafka broker pods managed by the strimzi operator.
pub fn broker_pod_selector() -> String {
    format!(
        "{}={},{}=kafka",
        MANAGED_BY_LABEL, STRIMZI_OPERATOR_NAME, K8S_NAME_LABEL
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_kafka_key() {
        assert_eq!(
            managed_kafka_key("kas-us-east-1a"),
            "managedkafka.bf2.org/kas-us-east-1a"
        );
    }

    #[test]
    fn test_selectors() {
        assert_eq!(
            worker_node_selector(),
            "node-role.kubernetes.io/worker,!node-role.kubernetes.io/infra"
        );
        assert_eq!(
            broker_pod_selector(),
            "app.kubernetes.io/managed-by=strimzi-cluster-operator,app.kubernetes.io/name=kafka"
        );
    }

    #[test]
    fn test_default_labels() {
        let labels = default_labels();
        assert_eq!(
            labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some(OPERATOR_NAME)
        );
    }
}
