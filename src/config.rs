//! Process configuration for the ingress capacity controller.
//!
//! Every knob is a CLI flag with an environment fallback; validation happens
//! once at startup and produces the typed [`ControllerConfig`] the reconciler
//! carries around.

use std::collections::BTreeMap;

use clap::Args;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::capacity::CapacityConfig;
use crate::error::{OperatorError, Result};
use crate::quantity;

/// Raw ingress controller knobs as bound from flags / environment.
#[derive(Args, Debug, Clone)]
pub struct IngressControllerArgs {
    /// CPU limit applied to router containers (activates the deployment patcher)
    #[arg(long = "ingresscontroller-limit-cpu", env = "INGRESSCONTROLLER_LIMIT_CPU")]
    pub limit_cpu: Option<String>,

    /// Memory limit applied to router containers
    #[arg(
        long = "ingresscontroller-limit-memory",
        env = "INGRESSCONTROLLER_LIMIT_MEMORY"
    )]
    pub limit_memory: Option<String>,

    /// CPU request applied to router containers
    #[arg(
        long = "ingresscontroller-request-cpu",
        env = "INGRESSCONTROLLER_REQUEST_CPU"
    )]
    pub request_cpu: Option<String>,

    /// Memory request applied to router containers
    #[arg(
        long = "ingresscontroller-request-memory",
        env = "INGRESSCONTROLLER_REQUEST_MEMORY"
    )]
    pub request_memory: Option<String>,

    /// Fixed replica count for the default controller, bypassing the model
    #[arg(
        long = "ingresscontroller-default-replica-count",
        env = "INGRESSCONTROLLER_DEFAULT_REPLICA_COUNT"
    )]
    pub default_replica_count: Option<i32>,

    /// Fixed replica count for zone controllers, bypassing the model
    #[arg(
        long = "ingresscontroller-az-replica-count",
        env = "INGRESSCONTROLLER_AZ_REPLICA_COUNT"
    )]
    pub az_replica_count: Option<i32>,

    /// Usable ingress bandwidth per router replica (quantity, bytes/s)
    #[arg(
        long = "ingresscontroller-max-ingress-throughput",
        env = "INGRESSCONTROLLER_MAX_INGRESS_THROUGHPUT"
    )]
    pub max_ingress_throughput: String,

    /// Connection limit per router replica
    #[arg(
        long = "ingresscontroller-max-ingress-connections",
        env = "INGRESSCONTROLLER_MAX_INGRESS_CONNECTIONS"
    )]
    pub max_ingress_connections: i32,

    /// haproxy hard-stop-after annotation value; blank disables it
    #[arg(
        long = "ingresscontroller-hard-stop-after",
        env = "INGRESSCONTROLLER_HARD_STOP_AFTER",
        default_value = ""
    )]
    pub hard_stop_after: String,

    /// Command enforced on router containers (comma separated)
    #[arg(
        long = "ingresscontroller-ingress-container-command",
        env = "INGRESSCONTROLLER_INGRESS_CONTAINER_COMMAND",
        value_delimiter = ','
    )]
    pub ingress_container_command: Vec<String>,

    /// haproxy reload interval in seconds; values > 0 enable the override
    #[arg(
        long = "ingresscontroller-reload-interval-seconds",
        env = "INGRESSCONTROLLER_RELOAD_INTERVAL_SECONDS",
        default_value_t = 0
    )]
    pub reload_interval_seconds: i32,

    /// Percentage of the theoretical peak demand to provision for (0-100)
    #[arg(
        long = "ingresscontroller-peak-throughput-percentage",
        env = "INGRESSCONTROLLER_PEAK_THROUGHPUT_PERCENTAGE",
        default_value_t = 90
    )]
    pub peak_throughput_percentage: i32,

    /// Cluster app domain assumed when the default ingress controller is
    /// absent. Without it that situation aborts the reconcile pass.
    #[arg(long = "cluster-domain-fallback", env = "CLUSTER_DOMAIN_FALLBACK")]
    pub cluster_domain_fallback: Option<String>,
}

/// Validated configuration carried by the reconciler.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub capacity: CapacityConfig,
    /// Blank disables the annotation
    pub hard_stop_after: String,
    /// Values > 0 enable the unsupported-override
    pub reload_interval_seconds: i32,
    pub cluster_domain_fallback: Option<String>,
}

impl IngressControllerArgs {
    /// Validates the capacity knobs into a [`ControllerConfig`].
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        if !(0..=100).contains(&self.peak_throughput_percentage) {
            return Err(OperatorError::Configuration(format!(
                "peak-throughput-percentage must be within 0-100, got {}",
                self.peak_throughput_percentage
            )));
        }
        if self.max_ingress_connections <= 0 {
            return Err(OperatorError::Configuration(format!(
                "max-ingress-connections must be positive, got {}",
                self.max_ingress_connections
            )));
        }
        let max_ingress_throughput_bytes =
            quantity::bytes(&self.max_ingress_throughput).map_err(|_| {
                OperatorError::Configuration(format!(
                    "max-ingress-throughput is not a valid quantity: '{}'",
                    self.max_ingress_throughput
                ))
            })?;

        Ok(ControllerConfig {
            capacity: CapacityConfig {
                max_ingress_throughput_bytes,
                max_ingress_connections: self.max_ingress_connections,
                peak_percentage: self.peak_throughput_percentage,
                az_replica_override: self.az_replica_count,
                default_replica_override: self.default_replica_count,
            },
            hard_stop_after: self.hard_stop_after.clone(),
            reload_interval_seconds: self.reload_interval_seconds,
            cluster_domain_fallback: self.cluster_domain_fallback.clone(),
        })
    }

    /// Resource requirements enforced on router deployments. `None` when no
    /// knob is set, which deactivates the deployment patcher entirely.
    pub fn router_resources(&self) -> Result<Option<ResourceRequirements>> {
        let mut limits = BTreeMap::new();
        let mut requests = BTreeMap::new();

        if let Some(cpu) = &self.limit_cpu {
            limits.insert("cpu".to_string(), valid_quantity(cpu, "limit-cpu")?);
        }
        if let Some(memory) = &self.limit_memory {
            limits.insert("memory".to_string(), valid_quantity(memory, "limit-memory")?);
        }
        if let Some(cpu) = &self.request_cpu {
            requests.insert("cpu".to_string(), valid_quantity(cpu, "request-cpu")?);
        }
        if let Some(memory) = &self.request_memory {
            requests.insert(
                "memory".to_string(),
                valid_quantity(memory, "request-memory")?,
            );
        }

        if limits.is_empty() && requests.is_empty() {
            return Ok(None);
        }

        Ok(Some(ResourceRequirements {
            limits: if limits.is_empty() {
                None
            } else {
                Some(limits)
            },
            requests: if requests.is_empty() {
                None
            } else {
                Some(requests)
            },
            ..Default::default()
        }))
    }

    /// Command enforced on router containers, `None` when not configured.
    pub fn router_command(&self) -> Option<Vec<String>> {
        if self.ingress_container_command.is_empty() {
            None
        } else {
            Some(self.ingress_container_command.clone())
        }
    }
}

fn valid_quantity(value: &str, knob: &str) -> Result<Quantity> {
    quantity::bytes(value).map_err(|_| {
        OperatorError::Configuration(format!("{} is not a valid quantity: '{}'", knob, value))
    })?;
    Ok(Quantity(value.to_string()))
}
