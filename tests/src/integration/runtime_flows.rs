//! # Runtime Flows
//!
//! Several `MeshRuntime` processes sharing one transport, each playing a
//! subset of the roles.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::wait_for;
    use mesh_bus::{BrokerConfig, InMemoryTransport, RetryPolicy, Transport};
    use mesh_contracts::{channels, ConfigurationChange, ConfigurationFileChanged};
    use mesh_runtime::{MeshRuntime, Roles, RuntimeConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn config(service: &str, roles: &str) -> RuntimeConfig {
        RuntimeConfig {
            broker: BrokerConfig {
                retry: RetryPolicy::immediate(2),
                shutdown_timeout: Duration::from_secs(2),
                ..BrokerConfig::for_service(service)
            },
            roles: Roles::parse(roles),
            generation_interval: Duration::from_millis(10),
            metrics: vec!["NavAltitude".into(), "ThermalHeatPipeStatus".into()],
            history_retention: 50,
            reload_targets: vec!["historian".into(), "generator".into()],
            ..RuntimeConfig::default()
        }
    }

    fn change(is_active: bool, kind: ConfigurationChange) -> ConfigurationFileChanged {
        ConfigurationFileChanged {
            configuration_file_id: Uuid::new_v4(),
            name: "thermal-limits".into(),
            path: "/etc/vehicle/thermal-limits.json".into(),
            version: 3,
            is_active,
            change: kind,
        }
    }

    // =============================================================================
    // TELEMETRY PIPELINE
    // =============================================================================

    #[tokio::test]
    async fn test_generator_process_feeds_historian_process() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let historian =
            MeshRuntime::with_transport(config("historian", "historian"), transport.clone())
                .unwrap();
        let generator =
            MeshRuntime::with_transport(config("generator", "generator"), transport.clone())
                .unwrap();

        historian.start().await.unwrap();
        generator.start().await.unwrap();

        let history = historian.history();
        wait_for(|| {
            history.history("NavAltitude").len() >= 5 && history.history("ThermalHeatPipeStatus").len() >= 5
        })
        .await;
        generator.shutdown().await.unwrap();
        historian.shutdown().await.unwrap();

        // Only the historian process records
        assert_eq!(generator.history().sample_count(), 0);
        assert_eq!(history.metric_count(), 2);

        let samples = history.history("NavAltitude");
        assert!(samples.iter().all(|s| !s.message_id.is_empty()));
        let range = mesh_runtime::value_range("NavAltitude").unwrap();
        assert!(samples.iter().all(|s| range.contains(s.value)));
    }

    #[tokio::test]
    async fn test_no_samples_after_generator_shutdown() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let historian =
            MeshRuntime::with_transport(config("historian", "historian"), transport.clone())
                .unwrap();
        let generator =
            MeshRuntime::with_transport(config("generator", "generator"), transport.clone())
                .unwrap();
        historian.start().await.unwrap();
        generator.start().await.unwrap();

        let history = historian.history();
        wait_for(|| history.sample_count() > 0).await;
        generator.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = history.sample_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(history.sample_count(), settled);

        historian.shutdown().await.unwrap();
    }

    // =============================================================================
    // CONFIGURATION RELOAD
    // =============================================================================

    #[tokio::test]
    async fn test_configuration_change_reloads_dependents() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let configuration = MeshRuntime::with_transport(
            config("configuration-service", "configuration"),
            transport.clone(),
        )
        .unwrap();
        let historian =
            MeshRuntime::with_transport(config("historian", "historian"), transport.clone())
                .unwrap();
        let bystander =
            MeshRuntime::with_transport(config("bystander", "historian"), transport.clone())
                .unwrap();

        for runtime in [&configuration, &historian, &bystander] {
            runtime.start().await.unwrap();
        }

        configuration
            .publisher()
            .publish(
                channels::CONFIGURATION,
                &change(true, ConfigurationChange::Updated),
            )
            .await
            .unwrap();
        // Inactive files do not trigger reloads
        configuration
            .publisher()
            .publish(
                channels::CONFIGURATION,
                &change(false, ConfigurationChange::Created),
            )
            .await
            .unwrap();

        wait_for(|| historian.reload_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(historian.reload_count(), 1);
        assert_eq!(bystander.reload_count(), 0);

        for runtime in [&configuration, &historian, &bystander] {
            runtime.shutdown().await.unwrap();
        }
    }
}
