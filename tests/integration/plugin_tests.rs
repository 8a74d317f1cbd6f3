//! Integration tests for executable plugins
//!
//! These tests wire real shell scripts into the service through
//! `ScepServiceBuilder::from_config`, the way a deployment configures them.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use const_oid::db::rfc4519::{DOMAIN_COMPONENT, ORGANIZATION_NAME};
use tempfile::TempDir;
use x509_cert::der::Encode;

use crate::common::*;
use scep_server::config::ScepConfig;
use scep_server::models::PkiOperationOutcome;
use scep_server::utils::name::common_name;
use scep_server::{ScepError, ScepServiceBuilder};

fn config() -> ScepConfig {
    let mut config = ScepConfig::default();
    config.service.ca_key_password = CA_KEY_PASSWORD.to_string();
    config
}

fn builder(env: &TestService, config: &ScepConfig) -> ScepServiceBuilder {
    ScepServiceBuilder::from_config(env.depot.clone(), env.codec.clone(), config)
        .map(|builder| builder.cert_failer(env.failer.clone()))
        .unwrap()
}

/// Chooser output: the encrypted sub CA key, then the sub CA and the root
fn write_chooser_output(dir: &TempDir) -> PathBuf {
    let sub_key = sub_ca_key();
    let output = format!(
        "{}{}{}",
        encrypted_key_pem(&sub_key, CA_KEY_PASSWORD),
        trusted_certificate_pem(&ca_certificate("Sub CA", &sub_key)),
        trusted_certificate_pem(&ca_certificate("Default CA", &ca_key())),
    );
    write_file(dir, "chooser.pem", &output)
}

fn chooser_script(dir: &TempDir) -> PathBuf {
    let output = write_chooser_output(dir);
    write_script(
        dir,
        "choose-ca",
        &format!(
            "cat > /dev/null\n[ \"$CAKEYPASS\" = \"{}\" ] || exit 3\ncat '{}'",
            CA_KEY_PASSWORD,
            output.display()
        ),
    )
}

#[tokio::test]
async fn test_verifier_exit_status_decides() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.csr_verifier = Some(write_script(
        &dir,
        "verify",
        "cat > /dev/null\n[ \"$TRANSACTIONID\" = \"tx-good\" ]",
    ));
    let service = builder(&env, &config).build().await.unwrap();

    let good = env.enrollment("tx-good", "CN=device-01", &client_key(), "");
    let bad = env.enrollment("tx-bad", "CN=device-02", &client_key(), "");

    assert!(!service.pki_operation(&good).await.unwrap().is_rejected());
    assert!(service.pki_operation(&bad).await.unwrap().is_rejected());
    assert_eq!(env.depot.stored_count(), 1);
    assert_eq!(env.failer.calls()[0].transaction_id, "tx-bad");
}

#[tokio::test]
async fn test_verifier_receives_raw_request() {
    let dir = TempDir::new().unwrap();
    let captured = dir.path().join("stdin.der");
    let env = TestService::new();
    let mut config = config();
    config.plugins.csr_verifier = Some(write_script(
        &dir,
        "verify",
        &format!("cat > '{}'", captured.display()),
    ));
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=device-01", &client_key(), "");

    service.pki_operation(&envelope).await.unwrap();

    let received = std::fs::read(&captured).unwrap();
    let expected = fixtures::csr("CN=device-01", &client_key()).to_der().unwrap();
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_chooser_script_selects_issuer() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.ca_chooser = Some(chooser_script(&dir));
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=device-01", &client_key(), "");

    // Act
    let outcome = service.pki_operation(&envelope).await.unwrap();

    // Assert
    assert_eq!(outcome, PkiOperationOutcome::Issued(b"CertRep SUCCESS tx-1".to_vec()));
    let calls = env.codec.sign_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].issuer_subject, fixtures::name("CN=Sub CA,O=Test PKI"));
    assert_eq!(calls[0].issuer_key, sub_ca_key());
    assert_eq!(calls[0].signer_subject, fixtures::name("CN=Default CA,O=Test PKI"));
}

#[tokio::test]
async fn test_chooser_failure_aborts_transaction() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.ca_chooser = Some(write_script(&dir, "choose-ca", "cat > /dev/null\nexit 4"));
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=device-01", &client_key(), "");

    let err = service.pki_operation(&envelope).await.unwrap_err();

    assert!(matches!(err, ScepError::PluginProcess(_)));
    assert!(env.codec.sign_calls().is_empty());
    let failures = env.failer.calls();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].csr.is_empty());
}

#[tokio::test]
async fn test_chooser_garbage_is_protocol_error() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.ca_chooser = Some(write_script(
        &dir,
        "choose-ca",
        "cat > /dev/null\necho 'no pem here'",
    ));
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=device-01", &client_key(), "");

    let err = service.pki_operation(&envelope).await.unwrap_err();

    assert!(matches!(err, ScepError::PluginProtocol(_)));
}

#[tokio::test]
async fn test_subject_filter_script_rewrites_subject() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.subject_filter = Some(write_script(
        &dir,
        "filter",
        "cat > /dev/null\necho '2.5.4.3=Alice%20Smith'",
    ));
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=ignored,O=Client", &client_key(), "");

    service.pki_operation(&envelope).await.unwrap();

    let call = &env.codec.sign_calls()[0];
    assert_eq!(call.template.subject.0.len(), 1);
    assert_eq!(common_name(&call.template.subject).as_deref(), Some("Alice Smith"));
    assert_eq!(env.depot.stored("Alice Smith").len(), 1);
}

#[tokio::test]
async fn test_subject_filter_records_starting_with_arc_zero() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.subject_filter = Some(write_script(
        &dir,
        "filter",
        "cat > /dev/null\nprintf '0.9.2342.19200300.100.1.25=example\\n2.5.4.3=device-01\\n'",
    ));
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=ignored", &client_key(), "");

    let outcome = service.pki_operation(&envelope).await.unwrap();

    assert!(!outcome.is_rejected());
    let rdns = &env.codec.sign_calls()[0].template.subject.0;
    assert_eq!(rdns.len(), 2);
    assert_eq!(rdns[0].0.get(0).unwrap().oid, DOMAIN_COMPONENT);
    assert_eq!(env.depot.stored("device-01").len(), 1);
}

#[tokio::test]
async fn test_non_executable_plugin_fails_construction() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let path = write_file(
        &dir,
        "verify",
        &format!("#!/bin/sh\ntouch '{}'\n", marker.display()),
    );
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.csr_verifier = Some(path);

    let result = ScepServiceBuilder::from_config(env.depot.clone(), env.codec.clone(), &config);

    match result {
        Err(ScepError::Config(message)) => assert!(message.contains("not executable")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("non-executable plugin was accepted"),
    }
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_missing_plugin_fails_construction() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.subject_filter = Some(dir.path().join("absent"));

    let result = ScepServiceBuilder::from_config(env.depot.clone(), env.codec.clone(), &config);

    assert!(matches!(result, Err(ScepError::Config(_))));
}

#[tokio::test]
async fn test_all_plugins_from_config() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.service.challenge_password = Some("secret".to_string());
    config.plugins.csr_verifier = Some(write_script(&dir, "verify", "cat > /dev/null"));
    config.plugins.ca_chooser = Some(chooser_script(&dir));
    config.plugins.subject_filter = Some(write_script(
        &dir,
        "filter",
        "cat > /dev/null\nprintf '2.5.4.10=Example%%20Corp\\n2.5.4.3=device-01\\n'",
    ));
    config.plugins.timeout_secs = Some(10);
    let service = builder(&env, &config).build().await.unwrap();

    // Wrong password, but the verifier has the final word
    let envelope = env.enrollment("tx-1", "CN=client", &client_key(), "wrong");

    // Act
    let outcome = service.pki_operation(&envelope).await.unwrap();

    // Assert
    assert!(!outcome.is_rejected());
    let call = &env.codec.sign_calls()[0];
    let rdns = &call.template.subject.0;
    assert_eq!(rdns.len(), 2);
    assert_eq!(rdns[0].0.get(0).unwrap().oid, ORGANIZATION_NAME);
    assert_eq!(common_name(&call.template.subject).as_deref(), Some("device-01"));
    assert_eq!(call.issuer_subject, fixtures::name("CN=Sub CA,O=Test PKI"));
    assert_eq!(env.depot.stored("device-01").len(), 1);
}

#[tokio::test]
async fn test_hung_plugin_times_out() {
    let dir = TempDir::new().unwrap();
    let env = TestService::new();
    let mut config = config();
    config.plugins.subject_filter = Some(write_script(&dir, "filter", "exec sleep 30"));
    config.plugins.timeout_secs = Some(1);
    let service = builder(&env, &config).build().await.unwrap();
    let envelope = env.enrollment("tx-1", "CN=device-01", &client_key(), "");

    let started = std::time::Instant::now();
    let err = service.pki_operation(&envelope).await.unwrap_err();

    assert!(matches!(err, ScepError::PluginProcess(ref m) if m.contains("timed out")));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(env.failer.calls().len(), 1);
}
