//! Route endpoint projection.
//!
//! Answers "what are the public route endpoints for this managed Kafka?":
//! the bootstrap and admin-server endpoints ride the default multi-zone
//! controller, while each broker route is pinned to the zone controller of
//! the zone its backing broker pod runs in. Resolving a broker's zone walks
//! route -> backend service -> selected broker pod -> node -> zone label;
//! any missing link yields an empty router domain but the entry is still
//! emitted.

use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::ResourceExt;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::crd::{IngressController, ManagedKafka, ManagedKafkaRoute, Route};
use crate::informers::ResourceCache;
use crate::labels::{ROUTER_SUBDOMAIN, TOPOLOGY_KEY};

/// Matches broker resource names such as `demo-kafka-0`.
static BROKER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".+-kafka-\d+$").expect("broker name pattern"));

pub(crate) fn is_broker_name(name: &str) -> bool {
    BROKER_NAME.is_match(name)
}

/// Projects the sorted route endpoints for one managed Kafka instance.
pub fn managed_kafka_routes(
    managed_kafka: &ManagedKafka,
    ingress_controllers: &ResourceCache<IngressController>,
    routes: &ResourceCache<Route>,
    services: &ResourceCache<Service>,
    broker_pods: &ResourceCache<Pod>,
    nodes: &ResourceCache<Node>,
) -> Vec<ManagedKafkaRoute> {
    let multi_zone = ingress_controller_domain(ingress_controllers, "kas");

    let mut projected = vec![
        ManagedKafkaRoute::new("bootstrap", "", multi_zone.clone()),
        ManagedKafkaRoute::new("admin-server", "admin-server", multi_zone),
    ];

    let namespace = managed_kafka.namespace().unwrap_or_default();
    let name = managed_kafka.name_any();
    let bootstrap_host = managed_kafka
        .spec
        .endpoint
        .as_ref()
        .and_then(|endpoint| endpoint.bootstrap_server_host.clone())
        .unwrap_or_default();

    for route in routes.list() {
        if route.metadata.namespace.as_deref() != Some(namespace.as_str()) {
            continue;
        }
        // the kafka cluster carries the managed kafka's name, so both owner
        // shapes match on the same name
        let owned = is_owned_by(&route, "Kafka", &name) || is_owned_by(&route, "ManagedKafka", &name);
        if !owned || !is_broker_name(&route.name_any()) {
            continue;
        }

        let zone = zone_for_broker_route(&route, services, broker_pods, nodes);
        let router = ingress_controller_domain(ingress_controllers, &format!("kas-{}", zone));

        let host = route.spec.host.clone().unwrap_or_default();
        let prefix = if bootstrap_host.is_empty() {
            host.clone()
        } else {
            host.strip_suffix(&format!("-{}", bootstrap_host))
                .unwrap_or(host.as_str())
                .to_string()
        };

        projected.push(ManagedKafkaRoute::new(&prefix, &prefix, router));
    }

    projected.sort_by(|a, b| a.name.cmp(&b.name));
    projected
}

/// Router domain of the named ingress controller, preferring the domain the
/// ingress operator reports on status over the spec. Empty when the
/// controller does not exist.
fn ingress_controller_domain(
    ingress_controllers: &ResourceCache<IngressController>,
    name: &str,
) -> String {
    ingress_controllers
        .list()
        .iter()
        .find(|ic| ic.name_any() == name)
        .map(|ic| {
            let domain = ic
                .status
                .as_ref()
                .and_then(|status| status.domain.clone())
                .or_else(|| ic.spec.domain.clone())
                .unwrap_or_default();
            format!("{}{}", ROUTER_SUBDOMAIN, domain)
        })
        .unwrap_or_default()
}

/// Availability zone of the broker pod backing a route, or empty when any
/// link in the chain is missing.
fn zone_for_broker_route(
    route: &Route,
    services: &ResourceCache<Service>,
    broker_pods: &ResourceCache<Pod>,
    nodes: &ResourceCache<Node>,
) -> String {
    let namespace = match route.metadata.namespace.as_deref() {
        Some(ns) => ns,
        None => return String::new(),
    };
    let service_name = match route.spec.to.as_ref().and_then(|to| to.name.as_deref()) {
        Some(name) => name,
        None => return String::new(),
    };
    let service = match services.get(Some(namespace), service_name) {
        Some(service) => service,
        None => return String::new(),
    };
    let selector = match service.spec.as_ref().and_then(|spec| spec.selector.clone()) {
        Some(selector) if !selector.is_empty() => selector,
        _ => return String::new(),
    };

    let pod = broker_pods.list().into_iter().find(|pod| {
        pod.metadata.namespace.as_deref() == Some(namespace)
            && selector.iter().all(|(key, value)| {
                pod.metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.get(key) == Some(value))
            })
    });

    pod.and_then(|pod| pod.spec.as_ref().and_then(|spec| spec.node_name.clone()))
        .and_then(|node_name| nodes.get(None, &node_name))
        .and_then(|node| {
            node.metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(TOPOLOGY_KEY).cloned())
        })
        .unwrap_or_default()
}

fn is_owned_by(route: &Route, owner_kind: &str, owner_name: &str) -> bool {
    route
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|reference| reference.kind == owner_kind && reference.name == owner_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::informers::seeded_cache;
    use serde_json::json;

    fn managed_kafka() -> ManagedKafka {
        serde_json::from_value(json!({
            "apiVersion": "managedkafka.bf2.org/v1alpha1",
            "kind": "ManagedKafka",
            "metadata": {"name": "demo", "namespace": "kafka-demo"},
            "spec": {"endpoint": {"bootstrapServerHost": "demo.bootstrap.example.com"}},
        }))
        .unwrap()
    }

    fn kas_controllers() -> ResourceCache<IngressController> {
        seeded_cache(vec![
            serde_json::from_value(json!({
                "apiVersion": "operator.openshift.io/v1",
                "kind": "IngressController",
                "metadata": {"name": "kas", "namespace": "openshift-ingress-operator"},
                "spec": {"domain": "stale.example.com"},
                "status": {"domain": "kas.example.com"},
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "apiVersion": "operator.openshift.io/v1",
                "kind": "IngressController",
                "metadata": {"name": "kas-us-east-1a", "namespace": "openshift-ingress-operator"},
                "spec": {"domain": "kas-us-east-1a.example.com"},
            }))
            .unwrap(),
        ])
    }

    fn broker_route(name: &str, host: &str, service: &str) -> Route {
        serde_json::from_value(json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": {
                "name": name,
                "namespace": "kafka-demo",
                "ownerReferences": [{
                    "apiVersion": "kafka.strimzi.io/v1beta2",
                    "kind": "Kafka",
                    "name": "demo",
                    "uid": "1",
                }],
            },
            "spec": {"host": host, "to": {"kind": "Service", "name": service}},
        }))
        .unwrap()
    }

    fn backing_topology() -> (
        ResourceCache<Service>,
        ResourceCache<Pod>,
        ResourceCache<Node>,
    ) {
        let services = seeded_cache(vec![serde_json::from_value(json!({
            "metadata": {"name": "demo-kafka-0", "namespace": "kafka-demo"},
            "spec": {"selector": {"statefulset.kubernetes.io/pod-name": "demo-kafka-0"}},
        }))
        .unwrap()]);
        let pods = seeded_cache(vec![serde_json::from_value(json!({
            "metadata": {
                "name": "demo-kafka-0",
                "namespace": "kafka-demo",
                "labels": {
                    "statefulset.kubernetes.io/pod-name": "demo-kafka-0",
                    "app.kubernetes.io/name": "kafka",
                },
            },
            "spec": {"nodeName": "node-a"},
        }))
        .unwrap()]);
        let nodes = seeded_cache(vec![serde_json::from_value(json!({
            "metadata": {
                "name": "node-a",
                "labels": {"topology.kubernetes.io/zone": "us-east-1a"},
            },
        }))
        .unwrap()]);
        (services, pods, nodes)
    }

    #[test]
    fn test_broker_name_pattern() {
        assert!(is_broker_name("demo-kafka-0"));
        assert!(is_broker_name("some-long-name-kafka-12"));
        assert!(!is_broker_name("demo-kafka-bootstrap"));
        assert!(!is_broker_name("kafka-0"));
        assert!(!is_broker_name("demo-zookeeper-0"));
    }

    #[test]
    fn test_projection_with_resolved_zone() {
        let (services, pods, nodes) = backing_topology();
        let routes = seeded_cache(vec![broker_route(
            "demo-kafka-0",
            "broker-0-demo.bootstrap.example.com",
            "demo-kafka-0",
        )]);

        let projected = managed_kafka_routes(
            &managed_kafka(),
            &kas_controllers(),
            &routes,
            &services,
            &pods,
            &nodes,
        );

        assert_eq!(
            projected,
            vec![
                ManagedKafkaRoute::new(
                    "admin-server",
                    "admin-server",
                    "ingresscontroller.kas.example.com".to_string(),
                ),
                ManagedKafkaRoute::new(
                    "bootstrap",
                    "",
                    "ingresscontroller.kas.example.com".to_string(),
                ),
                ManagedKafkaRoute::new(
                    "broker-0",
                    "broker-0",
                    "ingresscontroller.kas-us-east-1a.example.com".to_string(),
                ),
            ]
        );
    }

    #[test]
    fn test_unresolvable_zone_yields_empty_domain() {
        let (_, pods, nodes) = backing_topology();
        // no service backs this route
        let services = seeded_cache(Vec::<Service>::new());
        let routes = seeded_cache(vec![broker_route(
            "demo-kafka-1",
            "broker-1-demo.bootstrap.example.com",
            "demo-kafka-1",
        )]);

        let projected = managed_kafka_routes(
            &managed_kafka(),
            &kas_controllers(),
            &routes,
            &services,
            &pods,
            &nodes,
        );

        let broker = projected.iter().find(|r| r.name == "broker-1").unwrap();
        assert_eq!(broker.router, "");
    }

    #[test]
    fn test_unowned_and_foreign_routes_are_ignored() {
        let (services, pods, nodes) = backing_topology();
        let mut unowned = broker_route(
            "demo-kafka-0",
            "broker-0-demo.bootstrap.example.com",
            "demo-kafka-0",
        );
        unowned.metadata.owner_references = None;

        let other_namespace: Route = serde_json::from_value(json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": {
                "name": "other-kafka-0",
                "namespace": "elsewhere",
                "ownerReferences": [{
                    "apiVersion": "kafka.strimzi.io/v1beta2",
                    "kind": "Kafka",
                    "name": "demo",
                    "uid": "2",
                }],
            },
            "spec": {"host": "h", "to": {"kind": "Service", "name": "s"}},
        }))
        .unwrap();

        let routes = seeded_cache(vec![unowned, other_namespace]);
        let projected = managed_kafka_routes(
            &managed_kafka(),
            &kas_controllers(),
            &routes,
            &services,
            &pods,
            &nodes,
        );

        // only the two fixed entries survive
        assert_eq!(projected.len(), 2);
        assert_eq!(projected[0].name, "admin-server");
        assert_eq!(projected[1].name, "bootstrap");
    }

    #[test]
    fn test_missing_kas_controller_yields_empty_multi_zone_domain() {
        let (services, pods, nodes) = backing_topology();
        let ingress_controllers = seeded_cache(Vec::<IngressController>::new());
        let routes = seeded_cache(Vec::<Route>::new());

        let projected = managed_kafka_routes(
            &managed_kafka(),
            &ingress_controllers,
            &routes,
            &services,
            &pods,
            &nodes,
        );

        assert_eq!(projected[0].router, "");
        assert_eq!(projected[1].router, "");
    }
}
