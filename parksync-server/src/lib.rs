use std::sync::Arc;

use crate::app::DeliveryApp;
use crate::configs::{SchemaManager, Storage};
use crate::configs::settings::Settings;
use crate::services::{MqttDownlink, UplinkService};

pub mod app;
pub mod configs;
pub mod errors;
pub mod models;
pub mod repositories;
pub mod services;

pub async fn run(settings: &Arc<Settings>) {
    let storage = Arc::new(
        Storage::new(settings.database.clone(), SchemaManager::default())
            .await
            .expect("Failed to open delivery storage."),
    );

    let (transport, event_loop) = MqttDownlink::connect(&settings.broker);
    let client = transport.client();

    let mut app = DeliveryApp::new(storage, Arc::new(transport), settings.delivery.clone());
    app.start();

    let uplink_service = Arc::new(UplinkService::new(
        client,
        settings.broker.topic_prefix.clone(),
        app.state(),
        app.health(),
        app.uplink_sender(),
    ));
    uplink_service
        .subscribe_feeds()
        .await
        .expect("Failed to subscribe to broker feeds.");
    uplink_service.start(event_loop, app.stop_subscriber());

    tracing::info!("parksync delivery server running");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal.");

    tracing::info!("shutdown requested, stopping delivery pipeline");
    app.stop();
}
