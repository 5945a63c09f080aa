//! Plugin behavior against an in-process KMS double.

use kms_encryption_provider::classify::ErrorCategory;
use kms_encryption_provider::health::HealthAggregator;
use kms_encryption_provider::kms::{KmsError, MockKms};
use kms_encryption_provider::plugin::{Plugin, PluginError, STORAGE_VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const PERIOD: Duration = Duration::from_secs(10);

fn setup(is_cmk: bool) -> (Arc<MockKms>, Plugin) {
    let kms = Arc::new(MockKms::new());
    let health = Arc::new(HealthAggregator::new(PERIOD, 16));
    let plugin = Plugin::new("test-key", kms.clone(), None, health, is_cmk);
    (kms, plugin)
}

fn with_version(blob: &[u8]) -> Vec<u8> {
    let mut out = STORAGE_VERSION.as_bytes().to_vec();
    out.extend_from_slice(blob);
    out
}

#[tokio::test]
async fn test_encrypt_decrypt_scenario() {
    let (kms, plugin) = setup(false);
    kms.set_encrypt_resp("blob1", None);
    kms.set_decrypt_resp("hello", None);

    let ciphertext = plugin.encrypt(b"hello").await.unwrap();
    assert_eq!(ciphertext, with_version(b"blob1"));

    let plaintext = plugin.decrypt(&ciphertext).await.unwrap();
    assert_eq!(plaintext, b"hello");

    assert_ok!(plugin.health());
    assert_ok!(plugin.live());
}

#[tokio::test]
async fn test_pass_through_roundtrip() {
    let (_kms, plugin) = setup(false);
    let ciphertext = plugin.encrypt(b"secret data").await.unwrap();
    assert!(ciphertext.starts_with(STORAGE_VERSION.as_bytes()));
    assert_eq!(plugin.decrypt(&ciphertext).await.unwrap(), b"secret data");
}

#[tokio::test]
async fn test_error_returned_unchanged() {
    let (kms, plugin) = setup(false);
    let remote = KmsError::api("KMSInternalException", "internal failure");
    kms.set_decrypt_resp("", Some(remote.clone()));

    let err = plugin.decrypt(&with_version(b"blob")).await.unwrap_err();
    match err {
        PluginError::Kms(e) => assert_eq!(e, remote),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Health and liveness outcome for one remote failure per category.
#[tokio::test]
async fn test_probe_outcomes_by_category() {
    use ErrorCategory::{Corruption, Other, Throttled, UserInduced};

    let disabled = KmsError::api("DisabledException", "disabled");
    let quota = KmsError::api("LimitExceededException", "quota");
    let bad_ciphertext = KmsError::api("InvalidCiphertextException", "bad");
    let reset = KmsError::other("connection reset");

    // (error, customer managed, category, liveness fails)
    let cases = [
        (disabled, false, UserInduced, false),
        (quota.clone(), true, UserInduced, false),
        (quota, false, Throttled, true),
        (bad_ciphertext, false, Corruption, true),
        (reset, false, Other, true),
    ];

    for (err, is_cmk, category, live_fails) in cases {
        let (kms, plugin) = setup(is_cmk);
        kms.set_encrypt_resp("", Some(err.clone()));

        assert_err!(plugin.encrypt(b"x").await);
        assert_eq!(plugin.last_category(), category, "{err}");

        let health = plugin.health().unwrap_err();
        assert_eq!(health.category, category);
        assert_eq!(health.message, err.to_string());
        assert_eq!(plugin.live().is_err(), live_fails, "{err}");
    }
}

#[tokio::test]
async fn test_rules_route_by_input() {
    let (kms, plugin) = setup(false);
    kms.add_decrypt_rule(
        |blob| blob == b"tampered",
        "",
        Some(KmsError::api("InvalidCiphertextException", "bad")),
    );

    assert_ok!(plugin.decrypt(&with_version(b"fine")).await);
    assert_ok!(plugin.live());

    assert_err!(plugin.decrypt(&with_version(b"tampered")).await);
    assert_eq!(plugin.last_category(), ErrorCategory::Corruption);
    assert_eq!(kms.decrypt_calls(), 2);
}

#[tokio::test]
async fn test_missing_storage_version_is_local() {
    let (kms, plugin) = setup(false);
    kms.set_decrypt_resp("", Some(KmsError::other("should not be called")));

    let err = plugin.decrypt(b"").await.unwrap_err();
    assert!(matches!(err, PluginError::InvalidStorageVersion { .. }));
    assert_eq!(kms.decrypt_calls(), 0);
    assert_ok!(plugin.health());
    assert_eq!(plugin.last_category(), ErrorCategory::Nil);
}

#[tokio::test]
async fn test_shared_aggregator_across_instances() {
    let health = Arc::new(HealthAggregator::new(PERIOD, 16));
    let failing = Arc::new(MockKms::new());
    failing.set_encrypt_resp("", Some(KmsError::other("down")));

    let a = Plugin::new("key-a", failing, None, health.clone(), false);
    let b = Plugin::new("key-b", Arc::new(MockKms::new()), None, health.clone(), false);

    assert_err!(a.encrypt(b"x").await);
    assert_ok!(b.encrypt(b"x").await);

    // Aggregate health is shared, liveness is per instance
    assert_err!(b.health());
    assert_err!(a.live());
    assert_ok!(b.live());
}

#[tokio::test]
async fn test_independent_aggregators() {
    let failing = Arc::new(MockKms::new());
    failing.set_encrypt_resp("", Some(KmsError::other("down")));

    let a = Plugin::new(
        "key-a",
        failing,
        None,
        Arc::new(HealthAggregator::new(PERIOD, 4)),
        false,
    );
    let b = Plugin::new(
        "key-b",
        Arc::new(MockKms::new()),
        None,
        Arc::new(HealthAggregator::new(PERIOD, 4)),
        false,
    );

    assert_err!(a.encrypt(b"x").await);
    assert_err!(a.health());
    assert_ok!(b.health());
}

#[tokio::test(start_paused = true)]
async fn test_health_recovers_after_quiet_window() {
    let health = Arc::new(HealthAggregator::new(PERIOD, 16));
    let handle = health.start();
    let kms = Arc::new(MockKms::new());
    let plugin = Plugin::new("test-key", kms.clone(), None, health.clone(), false);

    kms.set_encrypt_resp("", Some(KmsError::api("LimitExceededException", "slow down")));
    assert_err!(plugin.encrypt(b"x").await);
    assert_err!(plugin.health());

    kms.set_encrypt_resp("blob", None);
    tokio::time::sleep(PERIOD + Duration::from_millis(10)).await;
    assert_err!(plugin.health());

    assert_ok!(plugin.encrypt(b"x").await);
    tokio::time::sleep(PERIOD).await;
    assert_ok!(plugin.health());
    assert_ok!(plugin.live());

    health.stop();
    handle.await.unwrap();
}
