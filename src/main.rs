//! # Object Storage Provisioner
//!
//! Controller binary. Runs the `Bucket`, `StorageUser` and `ProviderConfig` watch
//! loops, the metrics and probe server and, when certificates are configured,
//! the `Bucket` admission webhook.
//!
//! ## Usage
//!
//! ```bash
//! # Run every controller
//! objectstore-provisioner
//!
//! # Run only the bucket controller with the webhook
//! WEBHOOK_CERT_DIR=/tmp/k8s-webhook-server/serving-certs objectstore-provisioner --controllers bucket
//! ```
//!
//! Settings are read from the environment, see [`ControllerConfig`].

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::api::Api;
use kube::Client;
use objectstore_provisioner::config::ControllerConfig;
use objectstore_provisioner::constants::PROVIDER_CONFIG_IN_USE_REQUEUE_SECS;
use objectstore_provisioner::controller::bucket::BucketConnector;
use objectstore_provisioner::controller::events::{EventSink, KubeEventSink};
use objectstore_provisioner::controller::managed::{ManagedReconciler, ReconcileSettings};
use objectstore_provisioner::controller::provider_config::ProviderConfigReconciler;
use objectstore_provisioner::controller::store::{
    KubeProviderConfigStore, KubeRecordStore, KubeSecretStore, ProviderConfigStore, RecordStore,
    SecretStore,
};
use objectstore_provisioner::controller::user::UserConnector;
use objectstore_provisioner::crd::{Bucket, ProviderConfig, StorageUser};
use objectstore_provisioner::observability::metrics;
use objectstore_provisioner::provider::cloudscale::CloudscaleConnector;
use objectstore_provisioner::provider::s3::S3Connector;
use objectstore_provisioner::runtime::error_policy::RecordBackoff;
use objectstore_provisioner::runtime::watch_loop::{
    run_managed_controller, run_provider_config_controller, Context,
};
use objectstore_provisioner::server::{run_webhook_server, start_server, ServerState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Controllers that can be enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ControllerKind {
    Bucket,
    User,
    ProviderConfig,
}

/// Provisions S3 buckets and object-storage users from Kubernetes records
#[derive(Debug, Parser)]
#[command(
    name = "objectstore-provisioner",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ", built ", env!("BUILD_DATETIME"), ")")
)]
struct Args {
    /// Controllers to run
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [ControllerKind::Bucket, ControllerKind::User, ControllerKind::ProviderConfig]
    )]
    controllers: Vec<ControllerKind>,

    /// Port of the metrics and probe server, overrides `METRICS_PORT`
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "objectstore_provisioner=info".into()),
        )
        .init();

    // Kubernetes, S3, account API and webhook TLS all use rustls.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        "Starting object storage provisioner"
    );

    let mut config = ControllerConfig::from_env();
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }

    metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    if let Some(cert_dir) = config.webhook_cert_dir.clone() {
        let port = config.webhook_port;
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(&cert_dir, port).await {
                error!("Webhook server error: {}", e);
            }
        });
    } else {
        info!("WEBHOOK_CERT_DIR not set, admission webhook disabled");
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let secrets: Arc<dyn SecretStore> = Arc::new(KubeSecretStore::new(client.clone()));
    let configs: Arc<dyn ProviderConfigStore> =
        Arc::new(KubeProviderConfigStore::new(client.clone()));

    let mut loops: Vec<BoxFuture<'static, ()>> = Vec::new();
    for kind in dedup(&args.controllers) {
        let backoff = RecordBackoff::new(config.backoff_min_secs, config.backoff_max_secs);
        match kind {
            ControllerKind::Bucket => {
                let records: Arc<dyn RecordStore<Bucket>> =
                    Arc::new(KubeRecordStore::new(client.clone()));
                let events: Arc<dyn EventSink> =
                    Arc::new(KubeEventSink::new(client.clone(), "bucket"));
                let connector = BucketConnector::new(
                    Arc::clone(&secrets),
                    Arc::new(S3Connector),
                    Arc::clone(&records),
                    Arc::clone(&events),
                );
                let reconciler = ManagedReconciler::new(
                    connector,
                    records,
                    events,
                    ReconcileSettings {
                        poll_interval: config.bucket_poll_interval(),
                        create_requeue: config.create_requeue(),
                        timeout: config.reconcile_timeout(),
                    },
                );
                let context = Arc::new(Context::new(reconciler, backoff));
                loops.push(run_managed_controller(Api::all(client.clone()), context).boxed());
            }
            ControllerKind::User => {
                let records: Arc<dyn RecordStore<StorageUser>> =
                    Arc::new(KubeRecordStore::new(client.clone()));
                let events: Arc<dyn EventSink> =
                    Arc::new(KubeEventSink::new(client.clone(), "user"));
                let connector = UserConnector::new(
                    Arc::clone(&configs),
                    Arc::clone(&secrets),
                    Arc::new(CloudscaleConnector::new(config.account_api_url.clone())),
                    Arc::clone(&records),
                    Arc::clone(&events),
                );
                let reconciler = ManagedReconciler::new(
                    connector,
                    records,
                    events,
                    ReconcileSettings {
                        poll_interval: config.user_poll_interval(),
                        create_requeue: config.create_requeue(),
                        timeout: config.reconcile_timeout(),
                    },
                );
                let context = Arc::new(Context::new(reconciler, backoff));
                loops.push(run_managed_controller(Api::all(client.clone()), context).boxed());
            }
            ControllerKind::ProviderConfig => {
                let reconciler = ProviderConfigReconciler::new(
                    Arc::clone(&configs),
                    Arc::new(KubeRecordStore::<ProviderConfig>::new(client.clone())),
                    Arc::new(KubeEventSink::new(client.clone(), "providerconfig")),
                    Duration::from_secs(PROVIDER_CONFIG_IN_USE_REQUEUE_SECS),
                );
                let context = Arc::new(Context::new(reconciler, backoff));
                loops.push(
                    run_provider_config_controller(
                        Api::all(client.clone()),
                        Api::all(client.clone()),
                        context,
                    )
                    .boxed(),
                );
            }
        }
        info!(controller = ?kind, "controller enabled");
    }

    server_state.mark_ready();

    // Each loop ends on SIGTERM/SIGINT.
    futures::future::join_all(loops).await;

    server_state.mark_not_ready();
    info!("Controller stopped");

    Ok(())
}

/// Keep the first occurrence of every controller
fn dedup(kinds: &[ControllerKind]) -> Vec<ControllerKind> {
    let mut seen = Vec::with_capacity(kinds.len());
    for kind in kinds {
        if !seen.contains(kind) {
            seen.push(*kind);
        }
    }
    seen
}
