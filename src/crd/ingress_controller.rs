//! OpenShift IngressController resource model (`operator.openshift.io/v1`).
//!
//! Only the fields the operator manages are typed; everything else is kept
//! in flattened passthrough maps so a round trip through this model does not
//! drop fields owned by other actors.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// IngressController drives a set of router pods terminating external
/// traffic for routes matched by its route selector.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "IngressController",
    namespaced,
    status = "IngressControllerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerSpec {
    /// Externally resolvable base domain served by this controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Desired number of router replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Selects the routes this controller exposes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_selector: Option<LabelSelector>,

    /// How router endpoints are published (load balancer type and scope)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_publishing_strategy: Option<EndpointPublishingStrategy>,

    /// Pins router pods to a set of nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_placement: Option<NodePlacement>,

    /// Schemaless bag of options the IngressController schema does not model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_config_overrides: Option<BTreeMap<String, Value>>,

    /// Spec fields this operator does not manage
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerStatus {
    /// Domain actually in use, as reported by the ingress operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPublishingStrategy {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerStrategy>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_parameters: Option<ProviderLoadBalancerParameters>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLoadBalancerParameters {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsLoadBalancerParameters>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsLoadBalancerParameters {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl EndpointPublishingStrategy {
    /// The endpoint publishing strategy used for every controller this
    /// operator manages: an external AWS network load balancer.
    pub fn external_nlb() -> Self {
        EndpointPublishingStrategy {
            type_: Some("LoadBalancerService".to_string()),
            load_balancer: Some(LoadBalancerStrategy {
                scope: Some("External".to_string()),
                provider_parameters: Some(ProviderLoadBalancerParameters {
                    type_: Some("AWS".to_string()),
                    aws: Some(AwsLoadBalancerParameters {
                        type_: Some("NLB".to_string()),
                        other: BTreeMap::new(),
                    }),
                    other: BTreeMap::new(),
                }),
                other: BTreeMap::new(),
            }),
            other: BTreeMap::new(),
        }
    }
}
