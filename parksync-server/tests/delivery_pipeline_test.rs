use time::{Duration, OffsetDateTime};

use parksync_api::{DeviceUplink, DisplayColor, DisplayPayload, Occupancy, Priority, SensorEvent};
use parksync_server::models::{DisplayCommand, QueueState};
use parksync_server::repositories::EnqueueOutcome;

mod common;
use common::mock_app::MockApp;

fn sensor(space_id: &str, occupancy: Occupancy, at: OffsetDateTime) -> SensorEvent {
    SensorEvent {
        device_id: "sensor-1".to_string(),
        space_id: space_id.to_string(),
        tenant_id: "tenant-1".to_string(),
        occupancy,
        timestamp: at,
    }
}

fn command(device_id: &str, color: DisplayColor, blink: bool) -> DisplayCommand {
    DisplayCommand::new(
        device_id.to_string(),
        "tenant-1".to_string(),
        "space-1".to_string(),
        DisplayPayload::new(color, blink),
        Priority::Regular,
        None,
        OffsetDateTime::now_utc(),
    )
}

#[tokio::test]
async fn sensor_change_flows_to_verified_delivery() {
    let app = MockApp::new().await;
    app.bind_space("space-1", "tenant-1", "disp-1").await;
    app.pin_device("disp-1", "gw-1", 10).await;

    // Two agreeing readings flip the space to occupied.
    let start = OffsetDateTime::now_utc();
    app.state.observe_sensor(&sensor("space-1", Occupancy::Occupied, start)).await;
    app.state
        .observe_sensor(&sensor("space-1", Occupancy::Occupied, start + Duration::seconds(2)))
        .await;

    app.dispatcher.run_pass().await;

    let sent = app.transport.sent().await;
    assert_eq!(sent.len(), 1);
    let (gateway, frame) = &sent[0];
    assert_eq!(gateway, "gw-1");
    assert_eq!(frame.device_id, "disp-1");
    assert_eq!(frame.payload.color, DisplayColor::Red);

    let entry = app.queue.find("disp-1").await.unwrap().unwrap();
    assert_eq!(entry.state, QueueState::AwaitingVerification);
    assert_eq!(entry.attempts, 1);

    // The device echoes the applied state with an advanced counter.
    app.verification_engine
        .handle_uplink(&DeviceUplink {
            device_id: "disp-1".to_string(),
            applied: frame.payload,
            applied_counter: 11,
            gateway_id: "gw-1".to_string(),
            timestamp: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

    assert!(app.queue.find("disp-1").await.unwrap().is_none());
    assert!(app.verifications.find("disp-1").await.unwrap().is_none());

    // Re-enqueuing the now-verified state transmits nothing new.
    let outcome = app
        .queue
        .enqueue(
            &command("disp-1", DisplayColor::Red, false),
            Duration::hours(1),
            OffsetDateTime::now_utc(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Deduplicated);

    app.dispatcher.run_pass().await;
    assert_eq!(app.transport.sent_count().await, 1);
}

#[tokio::test]
async fn rapid_state_churn_transmits_only_the_latest_state() {
    let app = MockApp::new().await;
    app.pin_device("disp-1", "gw-1", 0).await;

    let now = OffsetDateTime::now_utc();
    for (color, blink) in [
        (DisplayColor::Red, false),
        (DisplayColor::Amber, true),
        (DisplayColor::Green, false),
    ] {
        app.queue
            .enqueue(&command("disp-1", color, blink), Duration::hours(1), now)
            .await
            .unwrap();
    }

    assert_eq!(app.queue.depth().await.unwrap(), 1);

    app.dispatcher.run_pass().await;

    let sent = app.transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.payload.color, DisplayColor::Green);
    assert!(!sent[0].1.payload.blink);
}

#[tokio::test]
async fn reserved_soon_space_delivers_blinking_reserved_color() {
    let app = MockApp::new().await;
    app.bind_space("space-1", "tenant-1", "disp-1").await;
    app.pin_device("disp-1", "gw-1", 0).await;

    let start = OffsetDateTime::now_utc();
    app.state.observe_sensor(&sensor("space-1", Occupancy::Vacant, start)).await;
    app.state
        .observe_sensor(&sensor("space-1", Occupancy::Vacant, start + Duration::seconds(1)))
        .await;
    app.state
        .update_reservation(
            "space-1",
            parksync_api::ReservationStatus::ReservedSoon { starts_in_secs: 90 },
            start + Duration::seconds(2),
        )
        .await;

    app.dispatcher.run_pass().await;

    let sent = app.transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.payload.color, DisplayColor::Amber);
    assert!(sent[0].1.payload.blink);
}

#[tokio::test]
async fn no_device_ever_holds_two_queue_entries() {
    let app = MockApp::new().await;
    app.pin_device("disp-1", "gw-1", 0).await;
    let now = OffsetDateTime::now_utc();

    // Churn through every lifecycle stage while enqueuing replacements.
    app.queue
        .enqueue(&command("disp-1", DisplayColor::Red, false), Duration::hours(1), now)
        .await
        .unwrap();
    app.dispatcher.run_pass().await;
    app.queue
        .enqueue(&command("disp-1", DisplayColor::Amber, false), Duration::hours(1), now)
        .await
        .unwrap();
    app.queue
        .enqueue(&command("disp-1", DisplayColor::Green, true), Duration::hours(1), now)
        .await
        .unwrap();

    assert_eq!(app.queue.depth().await.unwrap(), 1);
}
