//! Ingress Capacity Operator
//!
//! Watches cluster topology and the managed Kafka workload, then sizes the
//! zone-pinned and default ingress controllers to match demand.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! kas-ingress-operator \
//!     --ingresscontroller-max-ingress-throughput 450Mi \
//!     --ingresscontroller-max-ingress-connections 60000
//!
//! # Run with custom log level
//! RUST_LOG=debug kas-ingress-operator ...
//! ```

use clap::Parser;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::api::Api;
use kube::runtime::watcher;
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kas_ingress_operator::config::IngressControllerArgs;
use kas_ingress_operator::controllers::{
    Caches, IngressCapacityController, RouterDeploymentController,
};
use kas_ingress_operator::crd::{IngressController, Kafka, Route};
use kas_ingress_operator::informers::{self, EventHandlers};
use kas_ingress_operator::leader_election::{self, LeaderLease};
use kas_ingress_operator::{labels, trigger};

/// Ingress capacity controller for managed Kafka fleets
#[derive(Parser, Debug)]
#[command(name = "kas-ingress-operator")]
#[command(version, about = "Ingress capacity controller for managed Kafka fleets")]
struct Args {
    /// Enable leader election for HA deployments
    #[arg(long, default_value = "false")]
    leader_election: bool,

    /// Namespace for the leader election Lease (auto-detected if empty)
    #[arg(long, default_value = "")]
    leader_election_namespace: String,

    #[command(flatten)]
    ingress: IngressControllerArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = args.ingress.controller_config()?;
    let router_resources = args.ingress.router_resources()?;

    info!("Starting ingress capacity operator");
    info!("Leader election: {}", args.leader_election);

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Leader election — acquire the lease before starting any watches
    let lease = if args.leader_election {
        let namespace = leader_election::detect_namespace(&args.leader_election_namespace);
        info!("Leader election namespace: {}", namespace);
        let lease = Arc::new(LeaderLease::new(client.clone(), &namespace));
        lease.acquire().await?;
        Some(lease)
    } else {
        None
    };

    // Informer caches
    let (nodes, nodes_watch) = informers::cache(
        Api::<Node>::all(client.clone()),
        watcher::Config::default().labels(&labels::worker_node_selector()),
    );
    let (broker_pods, broker_pods_watch) = informers::cache(
        Api::<Pod>::all(client.clone()),
        watcher::Config::default().labels(&labels::broker_pod_selector()),
    );
    let (ingress_controllers, ingress_controllers_watch) = informers::cache(
        Api::<IngressController>::namespaced(client.clone(), labels::INGRESS_OPERATOR_NAMESPACE),
        watcher::Config::default(),
    );
    let (kafkas, kafkas_watch) = informers::cache(
        Api::<Kafka>::all(client.clone()),
        watcher::Config::default(),
    );
    let (routes, routes_watch) = informers::cache(
        Api::<Route>::all(client.clone()),
        watcher::Config::default(),
    );
    let (services, services_watch) = informers::cache(
        Api::<Service>::all(client.clone()),
        watcher::Config::default().labels(&format!(
            "{}={}",
            labels::MANAGED_BY_LABEL,
            labels::STRIMZI_OPERATOR_NAME
        )),
    );

    // The router deployment patcher only runs when resource knobs are set
    let router = match router_resources {
        Some(resources) => {
            let (deployments, deployments_watch) = informers::cache(
                Api::<Deployment>::namespaced(client.clone(), labels::INGRESS_ROUTER_NAMESPACE),
                watcher::Config::default().labels(labels::INGRESSCONTROLLER_LABEL),
            );
            let patcher = RouterDeploymentController::new(
                client.clone(),
                deployments,
                resources,
                args.ingress.router_command(),
            );
            deployments_watch.spawn(EventHandlers {
                on_add: Some(Box::new({
                    let patcher = Arc::clone(&patcher);
                    move |deployment: &Deployment| Arc::clone(&patcher).observe(deployment)
                })),
                on_update: Some(Box::new({
                    let patcher = Arc::clone(&patcher);
                    move |deployment: &Deployment| Arc::clone(&patcher).observe(deployment)
                })),
                on_delete: None,
            });
            Some(patcher)
        }
        None => None,
    };

    let controller = IngressCapacityController::new(
        client,
        config,
        Caches {
            nodes,
            broker_pods,
            ingress_controllers,
            kafkas,
            routes,
            services,
        },
        router,
    );

    let (queue, triggers) = trigger::queue();

    // Node arrivals and departures change the zone set; updates do not
    nodes_watch.spawn(EventHandlers {
        on_add: Some(Box::new({
            let queue = queue.clone();
            move |_: &Node| queue.trigger()
        })),
        on_update: None,
        on_delete: Some(Box::new({
            let queue = queue.clone();
            move |_: &Node| queue.trigger()
        })),
    });
    // Broker placement only matters when a pod appears
    broker_pods_watch.spawn(EventHandlers {
        on_add: Some(Box::new({
            let queue = queue.clone();
            move |_: &Pod| queue.trigger()
        })),
        on_update: None,
        on_delete: None,
    });
    ingress_controllers_watch.spawn(EventHandlers {
        on_add: Some(Box::new({
            let queue = queue.clone();
            move |_: &IngressController| queue.trigger()
        })),
        on_update: Some(Box::new({
            let queue = queue.clone();
            move |_: &IngressController| queue.trigger()
        })),
        on_delete: Some(Box::new({
            let queue = queue.clone();
            move |_: &IngressController| queue.trigger()
        })),
    });
    kafkas_watch.spawn(EventHandlers::none());
    routes_watch.spawn(EventHandlers::none());
    services_watch.spawn(EventHandlers::none());

    let worker = trigger::spawn_worker(triggers, {
        let controller = Arc::clone(&controller);
        move || {
            let controller = Arc::clone(&controller);
            async move { controller.reconcile().await }
        }
    });
    let _periodic = trigger::spawn_periodic(queue.clone(), trigger::RECONCILE_INTERVAL);

    // First pass as soon as the caches prime
    queue.trigger();

    // Hold leadership (a no-op future when leader election is disabled)
    let lease_for_hold = lease.clone();
    let hold = async move {
        match lease_for_hold {
            Some(lease) => lease.hold().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = hold => {
            error!("Leader lease lost, initiating shutdown");
        }
        result = worker => {
            if let Err(err) = result {
                error!("Reconcile worker task failed: {}", err);
            }
        }
    }

    // Release the lease so a standby replica can take over immediately
    if let Some(lease) = &lease {
        lease.release().await;
    }

    info!("Ingress capacity operator shutting down");
    Ok(())
}
