//! Integration tests for the non-issuing operations
//!
//! GetCACaps, GetCACert, GetNextCACert and challenge hand-out.

use std::sync::Arc;

use x509_cert::der::Encode;

use crate::common::*;
use scep_server::models::AuthorityMaterial;
use scep_server::services::CA_CAPS;
use scep_server::{ScepError, ScepService};

#[tokio::test]
async fn test_get_ca_caps() {
    let env = TestService::new();
    let service = env.open_service().await;

    let caps = service.get_ca_caps();

    assert_eq!(caps, CA_CAPS);
    assert!(caps.lines().any(|cap| cap == "SHA-256"));
    assert!(caps.lines().any(|cap| cap == "SCEPStandard"));
}

#[tokio::test]
async fn test_get_ca_cert_single_certificate_is_der() {
    let env = TestService::new();
    let service = env.open_service().await;

    let (body, count) = service.get_ca_cert().unwrap();

    assert_eq!(count, 1);
    assert_eq!(body, service.authority().certificate().to_der().unwrap());
}

#[tokio::test]
async fn test_get_ca_cert_chain_is_degenerate_bundle() {
    // Arrange
    let sub_key = sub_ca_key();
    let chain = vec![
        ca_certificate("Sub CA", &sub_key),
        ca_certificate("Root CA", &ca_key()),
    ];
    let material = AuthorityMaterial::new(sub_key, chain.clone()).unwrap();
    let codec = Arc::new(MockCodec::new());
    let depot = Arc::new(MockDepot::new(material, CA_KEY_PASSWORD));
    let service = ScepService::builder(depot, codec)
        .ca_key_password(CA_KEY_PASSWORD)
        .build()
        .await
        .unwrap();

    // Act
    let (body, count) = service.get_ca_cert().unwrap();

    // Assert
    assert_eq!(count, 2);
    let mut expected = b"degenerate-p7".to_vec();
    for cert in &chain {
        expected.extend(cert.to_der().unwrap());
    }
    assert_eq!(body, expected);
}

#[tokio::test]
async fn test_get_next_ca_cert_is_unsupported() {
    let env = TestService::new();
    let service = env.open_service().await;

    let err = service.get_next_ca_cert().unwrap_err();

    assert!(matches!(err, ScepError::UnsupportedOperation("GetNextCACert")));
}

#[tokio::test]
async fn test_scep_challenge_returns_static_password() {
    let env = TestService::new();
    let service = env.builder().challenge_password("secret").build().await.unwrap();

    assert_eq!(service.scep_challenge().await.unwrap(), "secret");
}

#[tokio::test]
async fn test_scep_challenge_without_password_is_empty() {
    let env = TestService::new();
    let service = env.open_service().await;

    assert_eq!(service.scep_challenge().await.unwrap(), "");
}

#[tokio::test]
async fn test_scep_challenge_uses_dynamic_store() {
    let env = TestService::new();
    let service = env
        .builder()
        .challenge_password("secret")
        .challenge_store(Arc::new(MockChallengeStore::new()))
        .build()
        .await
        .unwrap();

    assert_eq!(service.scep_challenge().await.unwrap(), "dyn-0");
    assert_eq!(service.scep_challenge().await.unwrap(), "dyn-1");
}

#[tokio::test]
async fn test_scep_challenge_store_error() {
    let env = TestService::new();
    let store = Arc::new(MockChallengeStore::new());
    store.set_error_mode(MockError::Challenge);
    let service = env.builder().challenge_store(store).build().await.unwrap();

    let err = service.scep_challenge().await.unwrap_err();

    assert!(matches!(err, ScepError::Store(_)));
}

#[tokio::test]
async fn test_service_exposes_settings() {
    let env = TestService::new();
    let service = env
        .builder()
        .allow_renewal_days(7)
        .client_validity_days(90)
        .build()
        .await
        .unwrap();

    assert_eq!(service.allow_renewal_days(), 7);
    assert_eq!(service.client_validity_days(), 90);
    assert_eq!(
        service.authority().certificate().tbs_certificate.subject,
        fixtures::name("CN=Default CA,O=Test PKI")
    );
}
