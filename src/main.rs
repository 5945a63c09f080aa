use anyhow::Context;
use kms_encryption_provider::config::Config;
use kms_encryption_provider::health::HealthAggregator;
use kms_encryption_provider::kms::{AwsKms, KmsClient};
use kms_encryption_provider::plugin::{v1, v2, Plugin, V1Service, V2Service};
use kms_encryption_provider::shutdown::{self, ShutdownCoordinator};
use kms_encryption_provider::{probes, server, telemetry};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    telemetry::init_tracing(&config.log)?;

    info!(
        key_id = %config.key_id,
        customer_managed = config.is_customer_managed_key,
        socket = %config.listen_socket.display(),
        "Starting KMS encryption provider"
    );

    let kms: Arc<dyn KmsClient> = Arc::new(AwsKms::new(&config.kms).await);
    let health = Arc::new(HealthAggregator::new(
        config.health_check_period,
        config.health_queue_capacity,
    ));
    let health_task = health.start();

    let new_plugin = |api_version| {
        Arc::new(
            Plugin::new(
                config.key_id.clone(),
                Arc::clone(&kms),
                config.encryption_context.clone(),
                Arc::clone(&health),
                config.is_customer_managed_key,
            )
            .with_api_version(api_version),
        )
    };
    let v1_plugin = new_plugin(v1::API_VERSION);
    let v2_plugin = new_plugin(v2::API_VERSION);

    let listener = server::bind(&config.listen_socket)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_socket.display()))?;
    info!(socket = %config.listen_socket.display(), "Bound gRPC socket");

    let mut coordinator = ShutdownCoordinator::new();
    let grpc_shutdown = coordinator.subscribe();
    let probes_shutdown = coordinator.subscribe();
    coordinator.spawn(
        "grpc",
        server::serve(
            listener,
            V1Service::new(Arc::clone(&v1_plugin)),
            V2Service::new(Arc::clone(&v2_plugin)),
            grpc_shutdown.recv(),
        ),
    );
    coordinator.spawn(
        "probes",
        probes::serve(
            config.health_addr,
            probes::router(vec![v1_plugin, v2_plugin]),
            probes_shutdown.recv(),
        ),
    );

    tokio::select! {
        () = shutdown::wait_for_signal() => {}
        () = coordinator.wait_for_task_exit() => warn!("Server task exited, shutting down"),
    }

    health.stop();
    coordinator.shutdown(config.shutdown_timeout).await;
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health check loop did not exit cleanly");
    }

    info!("Shutdown complete");
    Ok(())
}
