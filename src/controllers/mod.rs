//! Controllers driving the ingress routing tier.
//!
//! The ingress capacity controller sizes the zone-pinned and default ingress
//! controllers from observed workload demand; the router deployment patcher
//! enforces resources and command on the router deployments those
//! controllers own; route projection derives the endpoints clients use.

mod ingress;
mod router;
mod routes;

pub use ingress::{Caches, IngressCapacityController};
pub use router::{RouterDeploymentController, DEBOUNCE_DELAY};
pub use routes::managed_kafka_routes;
