use std::time::Duration;

use chrono::Utc;
use meshcert::{Announcement, CertManagerConfig};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::support::{busy_config, manager_with, quiet_config, quiet_manager, HOUR};

#[tokio::test]
async fn rotate_issues_new_serial_and_announces_once() {
    let (manager, _backend) = quiet_manager().await;
    let mut announcements = manager.subscribe_announcements();

    let before = manager.issue_certificate("svc-a", HOUR).await.unwrap();
    let after = manager.rotate_certificate("svc-a").await.unwrap();

    assert_ne!(before.serial_number(), after.serial_number());
    assert_eq!(manager.get_certificate("svc-a").unwrap().serial_number(), after.serial_number());
    assert_eq!(after.expiration() - after.issued_at(), chrono::Duration::hours(1));

    assert_eq!(
        announcements.try_recv().unwrap(),
        Announcement::CertificateRotated {
            common_name: "svc-a".into(),
            previous_serial: Some(before.serial_number().to_string()),
            serial_number: after.serial_number().to_string(),
        }
    );
    assert!(matches!(announcements.try_recv(), Err(TryRecvError::Empty)));

    manager.shutdown().await;
}

#[tokio::test]
async fn rotate_uncached_name_caches_it() {
    let (manager, _backend) = quiet_manager().await;
    let mut announcements = manager.subscribe_announcements();

    let cert = manager.rotate_certificate("svc-new").await.unwrap();

    assert_eq!(manager.get_certificate("svc-new").unwrap().serial_number(), cert.serial_number());
    match announcements.try_recv().unwrap() {
        Announcement::CertificateRotated { previous_serial, .. } => assert!(previous_serial.is_none()),
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn failed_rotation_keeps_previous_certificate() {
    let (manager, backend) = quiet_manager().await;
    let mut announcements = manager.subscribe_announcements();
    let before = manager.issue_certificate("svc-a", HOUR).await.unwrap();

    backend.fail_for("svc-a");
    let err = manager.rotate_certificate("svc-a").await.unwrap_err();

    assert!(err.is_issuance_failure());
    assert_eq!(manager.get_certificate("svc-a").unwrap().serial_number(), before.serial_number());
    assert!(matches!(announcements.try_recv(), Err(TryRecvError::Empty)));

    manager.shutdown().await;
}

#[tokio::test]
async fn check_rotates_certificate_inside_margin() {
    let (manager, _backend) = quiet_manager().await;
    let mut announcements = manager.subscribe_announcements();
    let original = manager.issue_certificate("svc-a", HOUR).await.unwrap();

    let early = manager.run_rotation_check(original.issued_at()).await;
    assert_eq!(early.checked, 1);
    assert_eq!(early.rotated, 0);

    // One second before expiry, well inside the 30s margin.
    let late = original.issued_at() + chrono::Duration::seconds(3599);
    let summary = manager.run_rotation_check(late).await;

    assert_eq!(summary.due, 1);
    assert_eq!(summary.rotated, 1);
    assert_eq!(summary.failed, 0);

    let rotated = manager.get_certificate("svc-a").unwrap();
    assert_ne!(rotated.serial_number(), original.serial_number());
    assert!(rotated.expiration() > original.expiration());

    let announcement = announcements.recv().await.unwrap();
    assert_eq!(announcement.common_name().as_str(), "svc-a");

    manager.shutdown().await;
}

#[tokio::test]
async fn check_isolates_failures_and_retries_next_time() {
    let (manager, backend) = quiet_manager().await;
    let bad = manager.issue_certificate("svc-bad", HOUR).await.unwrap();
    let good = manager.issue_certificate("svc-good", HOUR).await.unwrap();
    backend.fail_for("svc-bad");

    let later = Utc::now() + chrono::Duration::hours(2);
    let summary = manager.run_rotation_check(later).await;

    assert_eq!(summary.checked, 2);
    assert_eq!(summary.rotated, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(manager.list_certificates().len(), 2);
    assert_eq!(manager.get_certificate("svc-bad").unwrap().serial_number(), bad.serial_number());
    assert_ne!(manager.get_certificate("svc-good").unwrap().serial_number(), good.serial_number());

    backend.clear_failures();
    // Both are due again at `later`; this time nothing fails.
    let retry = manager.run_rotation_check(later).await;
    assert_eq!(retry.failed, 0);
    assert_eq!(retry.rotated, 2);
    assert_ne!(manager.get_certificate("svc-bad").unwrap().serial_number(), bad.serial_number());

    manager.shutdown().await;
}

#[tokio::test]
async fn background_rotor_rotates_short_lived_certificate() {
    let (manager, _backend) = manager_with(busy_config()).await;
    let mut announcements = manager.subscribe_announcements();

    // Ten seconds of validity is already inside the 30s margin.
    let short = manager.issue_certificate("svc-a", Duration::from_secs(10)).await.unwrap();

    let announcement = tokio::time::timeout(Duration::from_secs(5), announcements.recv())
        .await
        .expect("rotor should rotate within a few ticks")
        .unwrap();

    match announcement {
        Announcement::CertificateRotated { common_name, previous_serial, .. } => {
            assert_eq!(common_name.as_str(), "svc-a");
            assert_eq!(previous_serial.as_deref(), Some(short.serial_number()));
        }
    }

    manager.shutdown().await;
}

#[tokio::test]
async fn released_certificate_is_not_rotated() {
    let (manager, backend) = quiet_manager().await;
    manager.issue_certificate("svc-a", HOUR).await.unwrap();
    manager.release_certificate("svc-a");
    let calls = backend.issue_calls();

    let summary = manager.run_rotation_check(Utc::now() + chrono::Duration::hours(2)).await;

    assert_eq!(summary.checked, 0);
    assert_eq!(backend.issue_calls(), calls);
    assert!(manager.get_certificate("svc-a").is_err());

    manager.shutdown().await;
}

#[tokio::test]
async fn release_during_inflight_rotation_wins() {
    let (manager, backend) = quiet_manager().await;
    let mut announcements = manager.subscribe_announcements();
    manager.issue_certificate("svc-a", HOUR).await.unwrap();
    backend.set_latency(Some(Duration::from_millis(300)));

    let scan = tokio::spawn({
        let manager = manager.clone();
        async move { manager.run_rotation_check(Utc::now() + chrono::Duration::hours(2)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.release_certificate("svc-a");

    let summary = scan.await.unwrap();

    assert_eq!(summary.due, 1);
    assert_eq!(summary.rotated, 0);
    assert_eq!(summary.skipped, 1);
    assert!(manager.get_certificate("svc-a").is_err());
    assert!(manager.list_certificates().is_empty());
    assert!(matches!(announcements.try_recv(), Err(TryRecvError::Empty)));

    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_rotation_but_not_lookups() {
    let (manager, backend) = manager_with(busy_config()).await;
    let mut announcements = manager.subscribe_announcements();

    manager.shutdown().await;
    manager.shutdown().await;
    assert!(manager.is_shut_down());

    manager.issue_certificate("svc-a", Duration::from_secs(10)).await.unwrap();
    let calls = backend.issue_calls();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(backend.issue_calls(), calls);
    assert!(matches!(announcements.try_recv(), Err(TryRecvError::Empty)));

    let summary = manager.run_rotation_check(Utc::now() + chrono::Duration::hours(2)).await;
    assert_eq!(summary.rotated, 0);
    assert!(manager.get_certificate("svc-a").is_ok());
}

#[tokio::test]
async fn slow_subscriber_loses_oldest_announcements() {
    let config = CertManagerConfig { announcement_capacity: 2, ..quiet_config() };
    let (manager, _backend) = manager_with(config).await;
    let mut slow = manager.subscribe_announcements();

    for _ in 0..3 {
        manager.rotate_certificate("svc-a").await.unwrap();
    }

    assert!(matches!(slow.recv().await, Err(RecvError::Lagged(1))));
    assert!(slow.recv().await.is_ok());
    assert!(slow.recv().await.is_ok());
    assert!(matches!(slow.try_recv(), Err(TryRecvError::Empty)));

    manager.shutdown().await;
}
