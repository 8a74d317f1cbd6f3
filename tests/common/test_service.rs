//! Test service setup utilities
//!
//! Wires a [`ScepService`] to in-memory collaborators so tests can submit
//! requests and inspect every side effect.

use std::sync::Arc;

use rsa::RsaPrivateKey;

use scep_server::models::MessageType;
use scep_server::{ScepService, ScepServiceBuilder};

use super::fixtures::{self, CA_KEY_PASSWORD};
use super::mocks::{MockCodec, MockDepot, RecordingFailer};

/// Collaborators shared by a service under test
pub struct TestService {
    pub codec: Arc<MockCodec>,
    pub depot: Arc<MockDepot>,
    pub failer: Arc<RecordingFailer>,
}

impl Default for TestService {
    fn default() -> Self {
        Self::new()
    }
}

impl TestService {
    pub fn new() -> Self {
        Self::with_failer(RecordingFailer::new())
    }

    pub fn with_failer(failer: RecordingFailer) -> Self {
        Self {
            codec: Arc::new(MockCodec::new()),
            depot: Arc::new(MockDepot::new(fixtures::default_authority(), CA_KEY_PASSWORD)),
            failer: Arc::new(failer),
        }
    }

    /// A builder using the mocks, the CA key password and the recording failer
    pub fn builder(&self) -> ScepServiceBuilder {
        ScepService::builder(self.depot.clone(), self.codec.clone())
            .ca_key_password(CA_KEY_PASSWORD)
            .cert_failer(self.failer.clone())
    }

    /// Build a service with no optional collaborators besides the failer
    pub async fn open_service(&self) -> ScepService {
        self.builder().build().await.unwrap()
    }

    /// Envelope for a new enrollment of `subject` with `key`
    pub fn enrollment(
        &self,
        transaction_id: &str,
        subject: &str,
        key: &RsaPrivateKey,
        challenge: &str,
    ) -> Vec<u8> {
        self.codec.envelope(
            transaction_id,
            MessageType::PkcsReq,
            fixtures::csr(subject, key),
            challenge,
        )
    }

    /// Envelope for a request of any message type
    pub fn request(
        &self,
        transaction_id: &str,
        message_type: MessageType,
        subject: &str,
        key: &RsaPrivateKey,
        challenge: &str,
    ) -> Vec<u8> {
        self.codec
            .envelope(transaction_id, message_type, fixtures::csr(subject, key), challenge)
    }
}
