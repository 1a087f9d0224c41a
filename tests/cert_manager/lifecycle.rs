use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meshcert::{
    CertManager, CertManagerConfig, CertificateError, MockCertificateBackend, MOCK_ISSUING_CA,
};
use proptest::prelude::*;
use tracing_test::traced_test;

use super::support::{quiet_config, quiet_manager, HOUR};

#[tokio::test]
async fn issue_then_get_returns_same_certificate() {
    let (manager, _backend) = quiet_manager().await;

    let issued = manager.issue_certificate("svc-a", HOUR).await.unwrap();
    let fetched = manager.get_certificate("svc-a").unwrap();

    assert_eq!(issued.serial_number(), fetched.serial_number());
    assert_eq!(issued.common_name().as_str(), "svc-a");
    assert_eq!(issued.expiration() - issued.issued_at(), chrono::Duration::hours(1));
    assert_eq!(issued.issuing_ca(), MOCK_ISSUING_CA.as_bytes());
    assert!(!issued.private_key().is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn second_issue_is_served_from_cache() {
    let (manager, backend) = quiet_manager().await;
    let after_bootstrap = backend.issue_calls();

    let first = manager.issue_certificate("svc-a", HOUR).await.unwrap();
    let second = manager.issue_certificate("svc-a", Duration::from_secs(60)).await.unwrap();

    assert_eq!(first.serial_number(), second.serial_number());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(backend.issue_calls(), after_bootstrap + 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn expired_entry_is_reissued() {
    let (manager, backend) = quiet_manager().await;

    let short = manager.issue_certificate("svc-a", Duration::from_millis(200)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(
        manager.get_certificate("svc-a"),
        Err(CertificateError::NotFound { .. })
    ));

    let calls = backend.issue_calls();
    let fresh = manager.issue_certificate("svc-a", HOUR).await.unwrap();
    assert_ne!(short.serial_number(), fresh.serial_number());
    assert_eq!(backend.issue_calls(), calls + 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn get_never_issues() {
    let (manager, backend) = quiet_manager().await;
    let calls = backend.issue_calls();

    let err = manager.get_certificate("svc-unknown").unwrap_err();

    assert!(matches!(err, CertificateError::NotFound { ref common_name } if common_name == "svc-unknown"));
    assert_eq!(backend.issue_calls(), calls);

    manager.shutdown().await;
}

#[tokio::test]
async fn release_removes_entry_and_tolerates_unknown_names() {
    let (manager, _backend) = quiet_manager().await;
    manager.issue_certificate("svc-a", HOUR).await.unwrap();
    manager.issue_certificate("svc-b", HOUR).await.unwrap();

    manager.release_certificate("svc-a");
    manager.release_certificate("svc-a");
    manager.release_certificate("never-issued");

    assert!(manager.get_certificate("svc-a").is_err());
    assert!(manager.get_certificate("svc-b").is_ok());
    assert_eq!(manager.list_certificates().len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn list_contains_every_cached_certificate() {
    let (manager, _backend) = quiet_manager().await;
    for name in ["svc-a", "svc-b", "svc-c"] {
        manager.issue_certificate(name, HOUR).await.unwrap();
    }

    let mut names: Vec<String> = manager
        .list_certificates()
        .iter()
        .map(|c| c.common_name().to_string())
        .collect();
    names.sort();

    assert_eq!(names, vec!["svc-a", "svc-b", "svc-c"]);

    manager.shutdown().await;
}

#[tokio::test]
async fn issuance_failure_caches_nothing() {
    let (manager, backend) = quiet_manager().await;
    backend.fail_for("svc-a");

    let err = manager.issue_certificate("svc-a", HOUR).await.unwrap_err();

    assert!(err.is_issuance_failure());
    assert!(matches!(err, CertificateError::Issuance { ref common_name, .. } if common_name == "svc-a"));
    assert!(manager.list_certificates().is_empty());

    backend.clear_failures();
    assert!(manager.issue_certificate("svc-a", HOUR).await.is_ok());

    manager.shutdown().await;
}

#[tokio::test]
async fn malformed_backend_response_is_an_issuance_error() {
    let (manager, backend) = quiet_manager().await;
    backend.set_malformed_next(true);

    let err = manager.issue_certificate("svc-a", HOUR).await.unwrap_err();

    assert!(matches!(err, CertificateError::Issuance { .. }));
    assert!(manager.get_certificate("svc-a").is_err());

    manager.shutdown().await;
}

#[tokio::test]
async fn root_is_stable_and_long_lived() {
    let (manager, backend) = quiet_manager().await;
    let calls = backend.issue_calls();

    let first = manager.get_root_certificate();
    let second = manager.get_root_certificate();

    assert_eq!(first.serial_number(), second.serial_number());
    assert_eq!(first.common_name().as_str(), meshcert::certificate::ROOT_CA_COMMON_NAME);
    assert_eq!(first.cert_chain(), MOCK_ISSUING_CA.as_bytes());
    assert!(first.private_key().is_empty());
    assert!(first.expiration() > Utc::now() + chrono::Duration::days(364));
    assert_eq!(backend.issue_calls(), calls);

    manager.shutdown().await;
}

#[tokio::test]
async fn bootstrap_fails_when_probe_fails() {
    let backend = Arc::new(MockCertificateBackend::new());
    backend.set_fail_next(true);

    let err = CertManager::new(backend, quiet_config()).await.unwrap_err();

    assert!(err.is_issuance_failure());
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let backend = Arc::new(MockCertificateBackend::new());
    let config = CertManagerConfig { announcement_capacity: 0, ..quiet_config() };

    let err = CertManager::new(backend.clone(), config).await.unwrap_err();

    assert!(matches!(err, CertificateError::Config { .. }));
    assert_eq!(backend.issue_calls(), 0);
}

#[traced_test]
#[tokio::test]
async fn logs_issuance_without_key_material() {
    let (manager, _backend) = quiet_manager().await;

    let cert = manager.issue_certificate("svc-logged", HOUR).await.unwrap();
    tracing::info!(certificate = ?cert, "issued");

    assert!(logs_contain("Issued new certificate"));
    assert!(logs_contain("svc-logged"));
    assert!(logs_contain("cert_manager"));
    assert!(!logs_contain("MOCK-KEY"));

    manager.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn repeated_issue_returns_cached_serial(
        names in proptest::collection::hash_set("[a-z][a-z0-9-]{0,11}", 1..6),
        validity_secs in 60u64..86_400,
        repeats in 2usize..5,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let (manager, backend) = quiet_manager().await;
            let validity = Duration::from_secs(validity_secs);
            let calls = backend.issue_calls();

            for name in &names {
                let first = manager.issue_certificate(name.as_str(), validity).await.unwrap();
                for _ in 1..repeats {
                    let again = manager.issue_certificate(name.as_str(), validity).await.unwrap();
                    prop_assert_eq!(again.serial_number(), first.serial_number());
                }
            }

            prop_assert_eq!(backend.issue_calls(), calls + names.len() as u64);
            manager.shutdown().await;
            Ok(())
        })?;
    }
}
