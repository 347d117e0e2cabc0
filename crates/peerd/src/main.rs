use anyhow::Result;
use discovery::{
    merge_sightings, permission_report, run_multicast_self_test, BluetoothDiscovery, BtleplugLink,
    DiscoveryConfig, MulticastDiscovery, PermissionProvider, PlatformPermissions,
};
use presence::{AppStateStore, PresenceConfig, PresenceReconciler};
use std::sync::Arc;
use storage::{LogCategory, LogStore, Storage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,peerd=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting peerd");

    // Persistent storage shared by logs, settings and contacts
    let data_dir =
        std::env::var("PEERD_DATA_DIR").unwrap_or_else(|_| "./peerd-data".to_string());
    let storage = Arc::new(Storage::open(&data_dir).await?);
    tracing::info!("Storage ready at {}", data_dir);

    let logs = Arc::new(LogStore::new(Arc::clone(&storage)));
    logs.load().await;
    logs.log(LogCategory::Info, "peerd starting").await;

    let app_state = Arc::new(AppStateStore::load(Arc::clone(&storage)).await);
    tracing::info!("App state loaded, username {}", app_state.username().await);

    let discovery_config = DiscoveryConfig::from_env()?;
    let presence_config = PresenceConfig::from_env()?;

    let permissions: Arc<dyn PermissionProvider> = Arc::new(PlatformPermissions::new());
    tracing::info!("\n{}", permission_report(permissions.as_ref()).await);

    // WiFi multicast transport
    let multicast = Arc::new(MulticastDiscovery::new(
        Arc::clone(&logs),
        discovery_config.clone(),
    ));
    multicast
        .set_display_name(app_state.username().await)
        .await;
    tracing::info!("Multicast discovery initialized");

    // BLE transport, skipped when no adapter is present
    let bluetooth = match BtleplugLink::new().await {
        Ok(link) => Some(Arc::new(BluetoothDiscovery::new(
            Arc::new(link),
            Arc::clone(&permissions),
            Arc::clone(&logs),
            discovery_config.clone(),
        ))),
        Err(e) => {
            tracing::warn!("Bluetooth unavailable: {}", e);
            logs.log(LogCategory::Bluetooth, format!("Bluetooth unavailable: {}", e))
                .await;
            None
        }
    };

    if app_state.mock_mode().await {
        tracing::info!("Mock mode enabled, transports stay offline");
        logs.log(LogCategory::Info, "Mock mode enabled, transports stay offline")
            .await;
    } else {
        if app_state.wifi_enabled().await {
            if let Err(e) = multicast.start().await {
                tracing::warn!("WiFi discovery failed to start: {}", e.user_message());
            }
        } else {
            tracing::info!("WiFi discovery disabled in settings");
        }

        let ble_enabled = app_state.ble_enabled().await;
        match &bluetooth {
            Some(bluetooth) if ble_enabled => {
                if let Err(e) = bluetooth.start_scanning().await {
                    tracing::warn!("Bluetooth discovery failed to start: {}", e.user_message());
                }
            }
            Some(_) => tracing::info!("Bluetooth discovery disabled in settings"),
            None => {}
        }
    }

    // Reconcile sightings from both transports into the contact list
    let mut registries = vec![multicast.registry()];
    if let Some(bluetooth) = &bluetooth {
        registries.push(bluetooth.registry());
    }
    let reconciler = Arc::new(PresenceReconciler::new(
        Arc::clone(&app_state),
        presence_config,
    ));
    reconciler.start(&registries).await;
    tracing::info!("Presence reconciler started");

    if std::env::var("PEERD_SELF_TEST").unwrap_or_default() == "true" {
        let report = run_multicast_self_test(&multicast, discovery_config.self_test_wait).await;
        tracing::info!("\n{}", report.render());
        logs.log(LogCategory::Wifi, report.verdict.summary()).await;
    }

    // Periodic visibility snapshot across both transports
    let snapshot_multicast = Arc::clone(&multicast);
    let snapshot_bluetooth = bluetooth.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tick.tick().await;
            let ble_sightings = match &snapshot_bluetooth {
                Some(bluetooth) => bluetooth.registry().sightings().await,
                None => Vec::new(),
            };
            let wifi_sightings = snapshot_multicast.registry().sightings().await;
            let merged = merge_sightings(&ble_sightings, &wifi_sightings);
            tracing::info!("{} peer(s) visible", merged.len());
            for sighting in &merged {
                tracing::debug!(
                    "  {} [{}] last seen {}{}",
                    sighting.display_name,
                    sighting.transport,
                    sighting.last_seen,
                    if sighting.degraded { " (degraded)" } else { "" }
                );
            }
        }
    });

    tracing::info!("peerd running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    reconciler.stop().await;
    if let Some(bluetooth) = &bluetooth {
        if let Err(e) = bluetooth.stop_scanning().await {
            tracing::warn!("Bluetooth stop failed: {}", e.user_message());
        }
    }
    multicast.stop().await;
    logs.log(LogCategory::Info, "peerd stopped").await;
    if let Err(e) = logs.flush().await {
        tracing::warn!("Failed to flush logs: {}", e);
    }

    Ok(())
}
