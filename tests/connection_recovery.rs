//! Connection Recovery Tests
//!
//! Tests for:
//! - Reconnection converges once the store answers again
//! - Exhausting the attempt budget stretches the retry period and resets
//!   the counter instead of giving up
//! - Status queries are bounded by the status timeout
//! - Only one reconnect loop is ever armed
//!
//! All timing runs on Tokio's paused clock.

use std::time::Duration;

use pixelvault::connection::{ConnectionManager, ConnectionSettings, ConnectionState, Signal};
use pixelvault::store::{MemoryConnector, TableLayout};

// =============================================================================
// Test Utilities
// =============================================================================

const BASE_DELAY: Duration = Duration::from_secs(10);

fn settings(max_attempts: u32) -> ConnectionSettings {
    ConnectionSettings {
        reconnect_delay: BASE_DELAY,
        max_reconnect_attempts: max_attempts,
        backoff_multiplier: 3,
        health_interval: Duration::from_secs(30),
        status_timeout: Duration::from_secs(3),
    }
}

fn connector() -> MemoryConnector {
    MemoryConnector::new(TableLayout::default(), &["id", "path"])
}

async fn wait_for_state(manager: &ConnectionManager<MemoryConnector>, target: ConnectionState) {
    manager
        .subscribe()
        .wait_for(|state| *state == target)
        .await
        .unwrap();
}

// =============================================================================
// Convergence
// =============================================================================

/// Failing k times then succeeding reaches Connected on attempt k + 1.
#[tokio::test(start_paused = true)]
async fn test_reconnect_converges_after_transient_failures() {
    let connector = connector();
    let manager = ConnectionManager::new(connector.clone(), settings(10));
    manager.connect().await.unwrap();

    let k = 3;
    connector.fail_next_opens(k);
    manager.signal(Signal::Fault("connection reset by peer".into()));
    wait_for_state(&manager, ConnectionState::Reconnecting).await;

    tokio::time::sleep(BASE_DELAY * k + Duration::from_secs(1)).await;
    assert_eq!(manager.state(), ConnectionState::Reconnecting);
    assert_eq!(manager.reconnect_attempts(), k);

    tokio::time::sleep(BASE_DELAY).await;
    assert_eq!(
        manager.state(),
        ConnectionState::Connected,
        "attempt {} should have succeeded",
        k + 1
    );
    assert_eq!(manager.reconnect_attempts(), 0, "counter must reset on success");
    assert_eq!(manager.retry_delay(), BASE_DELAY);
    assert!(manager.last_error().is_none());
    assert!(!manager.is_reconnect_armed());
}

/// A reconnect replaces the pool; the new handle serves queries.
#[tokio::test(start_paused = true)]
async fn test_reconnect_swaps_in_a_fresh_pool() {
    let connector = connector();
    let manager = ConnectionManager::new(connector.clone(), settings(10));
    manager.connect().await.unwrap();
    let opens = connector.open_count();

    connector.set_online(false);
    manager.signal(Signal::Fault("down".into()));
    wait_for_state(&manager, ConnectionState::Reconnecting).await;
    tokio::time::sleep(BASE_DELAY + Duration::from_secs(1)).await;

    connector.set_online(true);
    tokio::time::sleep(BASE_DELAY).await;
    wait_for_state(&manager, ConnectionState::Connected).await;

    assert_eq!(connector.open_count(), opens + 2);
    let status = manager.status().await;
    assert!(status.is_connected);
}

// =============================================================================
// Backoff Escalation
// =============================================================================

/// Continuous failure past the budget triples the delay and resets the count.
#[tokio::test(start_paused = true)]
async fn test_backoff_escalates_and_never_gives_up() {
    let connector = connector();
    let manager = ConnectionManager::new(connector.clone(), settings(3));
    manager.connect().await.unwrap();

    connector.set_online(false);
    manager.signal(Signal::Fault("down".into()));
    wait_for_state(&manager, ConnectionState::Reconnecting).await;

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(manager.reconnect_attempts(), 2);
    assert_eq!(manager.retry_delay(), BASE_DELAY);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.reconnect_attempts(), 0, "counter resets after the budget");
    assert_eq!(manager.retry_delay(), BASE_DELAY * 3);
    assert_eq!(manager.state(), ConnectionState::Reconnecting);
    assert!(manager.is_reconnect_armed(), "the loop keeps running");

    // Next attempt comes 30s after the third, not 10s.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(manager.reconnect_attempts(), 0);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.reconnect_attempts(), 1);

    // The retry period stays at 3x the base; it does not compound.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(manager.retry_delay(), BASE_DELAY * 3);

    connector.set_online(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    assert_eq!(manager.retry_delay(), BASE_DELAY);
}

// =============================================================================
// Single Reconnect Loop
// =============================================================================

/// A burst of faults arms one loop, which makes one attempt per period.
#[tokio::test(start_paused = true)]
async fn test_fault_burst_arms_one_loop() {
    let connector = connector();
    let manager = ConnectionManager::new(connector.clone(), settings(10));
    manager.connect().await.unwrap();
    connector.set_online(false);

    for i in 0..20 {
        manager.signal(Signal::Fault(format!("error {}", i)));
    }
    wait_for_state(&manager, ConnectionState::Reconnecting).await;
    let opens = connector.open_count();

    tokio::time::sleep(BASE_DELAY + Duration::from_secs(1)).await;
    assert_eq!(connector.open_count(), opens + 1);
    assert_eq!(manager.reconnect_attempts(), 1);
}

// =============================================================================
// Status Timeout
// =============================================================================

/// A hung store degrades to a reported disconnection within the timeout.
#[tokio::test(start_paused = true)]
async fn test_status_times_out_and_triggers_reconnect() {
    let connector = connector();
    let manager = ConnectionManager::new(connector.clone(), settings(10));
    manager.connect().await.unwrap();

    connector.set_hanging(true);
    let started = tokio::time::Instant::now();
    let status = manager.status().await;

    assert!(started.elapsed() <= Duration::from_secs(3) + Duration::from_millis(10));
    assert!(!status.is_connected);
    assert_eq!(status.record_count, 0);
    assert!(status.connection_error.unwrap().contains("Timed out"));
    assert!(status.reconnecting);

    wait_for_state(&manager, ConnectionState::Reconnecting).await;
}

/// A health probe failure while connected arms the reconnect loop.
#[tokio::test(start_paused = true)]
async fn test_health_monitor_detects_silent_outage() {
    let connector = connector();
    let manager = ConnectionManager::new(connector.clone(), settings(10));
    manager.connect().await.unwrap();
    manager.start_health_monitor();

    connector.set_online(false);
    tokio::time::sleep(Duration::from_secs(31)).await;
    wait_for_state(&manager, ConnectionState::Reconnecting).await;
    assert!(manager.is_reconnect_armed());

    connector.set_online(true);
    tokio::time::sleep(Duration::from_secs(11)).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    manager.shutdown().await;
}
