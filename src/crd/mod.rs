//! Foreign resource models consumed and written by the operator.
//!
//! None of these types are owned by this operator: IngressController and
//! Route belong to OpenShift, Kafka to the strimzi cluster operator, and
//! ManagedKafka to the fleet control plane. Each model carries
//! `#[serde(flatten)]` bags on the structs we reshape so that fields the
//! operator does not manage survive a deserialize/serialize round trip.

mod ingress_controller;
mod kafka;
mod route;

pub use ingress_controller::{
    AwsLoadBalancerParameters, EndpointPublishingStrategy, IngressController,
    IngressControllerSpec, IngressControllerStatus, LoadBalancerStrategy, NodePlacement,
    ProviderLoadBalancerParameters,
};
pub use kafka::{
    fetch_quota, produce_quota, GenericKafkaListener, Kafka, KafkaClusterSpec,
    KafkaListenerConfiguration, KafkaSpec, ManagedKafka, ManagedKafkaEndpoint, ManagedKafkaRoute,
    ManagedKafkaSpec, EXTERNAL_LISTENER_NAME, FETCH_QUOTA_CONFIG, PRODUCE_QUOTA_CONFIG,
};
pub use route::{Route, RouteSpec, RouteTargetReference};
