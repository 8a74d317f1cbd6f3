//! SCEP issuance service
//!
//! [`ScepService`] drives one PKIOperation from the encrypted envelope to the
//! signed reply:
//!
//! 1. decrypt the request with the default CA
//! 2. let the subject filter rewrite the subject
//! 3. let the CA chooser select the issuing authority
//! 4. validate new enrollments (verifier, dynamic challenge or static secret)
//! 5. sign, check for duplicates or renewals, persist
//! 6. notify success
//!
//! A failed validation produces a signed `BadRequest` reply. Every rejected
//! or failed transaction is reported to the failure notifier exactly once.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use x509_cert::der::Encode;

use crate::config::{ScepConfig, DEFAULT_ALLOW_RENEWAL_DAYS, DEFAULT_CLIENT_VALIDITY_DAYS};
use crate::models::{
    AuthorityMaterial, CertificateTemplate, Decision, DecryptedRequest, FailInfo, PkiMessage,
    PkiOperationOutcome,
};
use crate::services::ca_chooser::{CaChooser, ExecutableCaChooser};
use crate::services::challenge::ChallengeStore;
use crate::services::codec::PkiCodec;
use crate::services::csr_verifier::{CsrVerifier, ExecutableCsrVerifier};
use crate::services::depot::Depot;
use crate::services::key_id::generate_subject_key_id;
use crate::services::notifier::{CertFailer, CertSuccesser};
use crate::services::subject_filter::{ExecutableSubjectFilter, SubjectFilter};
use crate::utils::name::cert_name;
use crate::utils::{ScepError, ScepResult};

/// Capabilities advertised by GetCACaps
pub const CA_CAPS: &str = "SHA-1\nSHA-256\nAES\nDES3\nSCEPStandard\nPOSTPKIOperation";

/// Progress of one PKIOperation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Received,
    Decrypted,
    SubjectResolved,
    AuthoritySelected,
    Validated,
    Signed,
    Persisted,
    Notified,
    Done,
    Rejected,
    Failed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Received => "received",
            TransactionState::Decrypted => "decrypted",
            TransactionState::SubjectResolved => "subject_resolved",
            TransactionState::AuthoritySelected => "authority_selected",
            TransactionState::Validated => "validated",
            TransactionState::Signed => "signed",
            TransactionState::Persisted => "persisted",
            TransactionState::Notified => "notified",
            TransactionState::Done => "done",
            TransactionState::Rejected => "rejected",
            TransactionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Transaction {
    id: String,
    /// Raw decrypted CSR, empty until decryption succeeds
    raw_request: Vec<u8>,
    state: TransactionState,
}

impl Transaction {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            raw_request: Vec::new(),
            state: TransactionState::Received,
        }
    }

    fn advance(&mut self, state: TransactionState) {
        debug!(from = %self.state, to = %state, "Transaction state changed");
        self.state = state;
    }
}

enum Completion {
    Issued(Vec<u8>),
    Rejected { reply: Vec<u8>, reason: String },
}

/// How new enrollments are authorized, fixed at build time
enum Validation {
    /// The verifier's decision is final
    Verifier(Arc<dyn CsrVerifier>),
    /// The claimed password must be a live dynamic challenge
    Dynamic(Arc<dyn ChallengeStore>),
    /// The claimed password must equal the shared secret
    Static(String),
    /// Every request is accepted
    Open,
}

impl Validation {
    fn resolve(
        verifier: Option<Arc<dyn CsrVerifier>>,
        store: Option<Arc<dyn ChallengeStore>>,
        static_password: Option<&str>,
    ) -> Self {
        match (verifier, store, static_password) {
            (Some(verifier), _, _) => Validation::Verifier(verifier),
            (None, Some(store), _) => Validation::Dynamic(store),
            (None, None, Some(password)) if !password.is_empty() => {
                Validation::Static(password.to_string())
            }
            _ => Validation::Open,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Validation::Verifier(_) => "csr verifier",
            Validation::Dynamic(_) => "dynamic challenge",
            Validation::Static(_) => "static challenge",
            Validation::Open => "none",
        }
    }
}

/// The issuance engine of a SCEP server
pub struct ScepService {
    codec: Arc<dyn PkiCodec>,
    depot: Arc<dyn Depot>,
    authority: AuthorityMaterial,
    ca_key_password: Vec<u8>,
    challenge_password: String,
    challenge_store: Option<Arc<dyn ChallengeStore>>,
    allow_renewal_days: u32,
    client_validity_days: u32,
    validation: Validation,
    subject_filter: Option<Arc<dyn SubjectFilter>>,
    ca_chooser: Option<Arc<dyn CaChooser>>,
    successer: Option<Arc<dyn CertSuccesser>>,
    failer: Option<Arc<dyn CertFailer>>,
}

impl ScepService {
    pub fn builder(depot: Arc<dyn Depot>, codec: Arc<dyn PkiCodec>) -> ScepServiceBuilder {
        ScepServiceBuilder::new(depot, codec)
    }

    /// The default CA loaded at build time
    pub fn authority(&self) -> &AuthorityMaterial {
        &self.authority
    }

    pub fn allow_renewal_days(&self) -> u32 {
        self.allow_renewal_days
    }

    pub fn client_validity_days(&self) -> u32 {
        self.client_validity_days
    }

    /// GetCACaps
    pub fn get_ca_caps(&self) -> &'static str {
        CA_CAPS
    }

    /// GetCACert: the encoded certificates and how many there are.
    ///
    /// A single CA certificate is returned as plain DER, a chain as a
    /// degenerate PKCS#7 bundle.
    pub fn get_ca_cert(&self) -> ScepResult<(Vec<u8>, usize)> {
        match self.authority.chain() {
            [] => Err(ScepError::MissingCaCertificate),
            [cert] => {
                let der = cert
                    .to_der()
                    .map_err(|e| ScepError::Codec(format!("failed to encode CA certificate: {}", e)))?;
                Ok((der, 1))
            }
            chain => {
                let bundle = self
                    .codec
                    .degenerate_certificates(chain)
                    .map_err(|e| ScepError::Codec(format!("{:#}", e)))?;
                Ok((bundle, chain.len()))
            }
        }
    }

    /// GetNextCACert
    pub fn get_next_ca_cert(&self) -> ScepResult<Vec<u8>> {
        Err(ScepError::UnsupportedOperation("GetNextCACert"))
    }

    /// Hand out a challenge password for a client to enroll with
    pub async fn scep_challenge(&self) -> ScepResult<String> {
        match &self.challenge_store {
            Some(store) => store
                .scep_challenge()
                .await
                .map_err(|e| ScepError::Store(format!("failed to create challenge: {:#}", e))),
            None => Ok(self.challenge_password.clone()),
        }
    }

    /// PKIOperation
    pub async fn pki_operation(&self, envelope: &[u8]) -> ScepResult<PkiOperationOutcome> {
        let message = self
            .codec
            .parse(envelope)
            .map_err(|e| ScepError::Codec(format!("failed to parse PKI message: {:#}", e)))?;

        let span = info_span!(
            "pki_operation",
            transaction_id = %message.transaction_id,
            message_type = %message.message_type
        );
        self.handle(&message).instrument(span).await
    }

    async fn handle(&self, message: &PkiMessage) -> ScepResult<PkiOperationOutcome> {
        let mut tx = Transaction::new(&message.transaction_id);
        info!("Processing PKI operation");

        match self.run(message, &mut tx).await {
            Ok(Completion::Issued(reply)) => {
                tx.advance(TransactionState::Done);
                info!("Certificate issued");
                Ok(PkiOperationOutcome::Issued(reply))
            }
            Ok(Completion::Rejected { reply, reason }) => {
                tx.advance(TransactionState::Rejected);
                warn!(reason = %reason, "Request rejected");
                self.notify_failure(&tx, &reason).await;
                Ok(PkiOperationOutcome::Rejected(reply))
            }
            Err(e) => {
                error!(state = %tx.state, "PKI operation failed: {}", e);
                tx.advance(TransactionState::Failed);
                self.notify_failure(&tx, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run(&self, message: &PkiMessage, tx: &mut Transaction) -> ScepResult<Completion> {
        if !message.message_type.carries_csr() {
            return Err(ScepError::UnsupportedMessageType(
                message.message_type.to_string(),
            ));
        }

        let mut request = self
            .codec
            .decrypt(message, self.authority.certificate(), self.authority.key())
            .map_err(|e| ScepError::Decryption(format!("{:#}", e)))?;
        tx.raw_request = request.raw_decrypted.clone();
        tx.advance(TransactionState::Decrypted);

        if let Some(filter) = &self.subject_filter {
            request.csr.info.subject = filter.filter(&request.raw_decrypted).await?;
            debug!(subject = %request.csr.info.subject, "Subject replaced by filter");
        }
        tx.advance(TransactionState::SubjectResolved);

        let chosen = match &self.ca_chooser {
            Some(chooser) => Some(
                chooser
                    .choose(&request.raw_decrypted, &self.ca_key_password)
                    .await?,
            ),
            None => None,
        };
        let issuer = chosen.as_ref().unwrap_or(&self.authority);
        tx.advance(TransactionState::AuthoritySelected);

        if message.message_type.is_enrollment() {
            if let Decision::Reject(reason) = self.validate(&request).await? {
                let reply = self
                    .codec
                    .build_rejection(
                        message,
                        self.authority.certificate(),
                        self.authority.key(),
                        FailInfo::BadRequest,
                    )
                    .map_err(|e| ScepError::Codec(format!("failed to build rejection: {:#}", e)))?;
                return Ok(Completion::Rejected { reply, reason });
            }
        }
        tx.advance(TransactionState::Validated);

        let subject_key_id = generate_subject_key_id(&request.csr.info.public_key)?;
        let serial = self
            .depot
            .serial()
            .await
            .map_err(|e| ScepError::Store(format!("failed to allocate serial: {:#}", e)))?;
        let template = CertificateTemplate::for_client(
            serial,
            &request.csr,
            subject_key_id,
            self.client_validity_days,
            Utc::now(),
        );

        let signed = self
            .codec
            .sign(
                &request,
                self.authority.certificate(),
                self.authority.key(),
                issuer.certificate(),
                issuer.key(),
                &template,
            )
            .map_err(|e| ScepError::Signing(format!("{:#}", e)))?;
        tx.advance(TransactionState::Signed);

        let name = cert_name(&signed.certificate);
        self.depot
            .has_cn(&name, self.allow_renewal_days, &signed.certificate, false)
            .await
            .map_err(|e| ScepError::Store(format!("{:#}", e)))?;
        self.depot
            .put(&name, &signed.certificate)
            .await
            .map_err(|e| ScepError::Store(format!("failed to store certificate: {:#}", e)))?;
        info!(name = %name, "Certificate persisted");
        tx.advance(TransactionState::Persisted);

        if let Some(successer) = &self.successer {
            let locator = self
                .depot
                .cert_locator(&name, &signed.certificate)
                .await
                .map_err(|e| ScepError::Store(format!("failed to locate certificate: {:#}", e)))?;
            // The stored certificate is kept even when the notifier objects
            match successer.success(&tx.id, &tx.raw_request, &locator).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(ScepError::Notification(format!(
                        "success notifier refused certificate {}",
                        name
                    )))
                }
                Err(e) => return Err(ScepError::Notification(format!("{:#}", e))),
            }
            tx.advance(TransactionState::Notified);
        }

        Ok(Completion::Issued(signed.raw))
    }

    async fn validate(&self, request: &DecryptedRequest) -> ScepResult<Decision> {
        match &self.validation {
            Validation::Verifier(verifier) => {
                let valid = verifier
                    .verify(&request.transaction_id, &request.raw_decrypted)
                    .await?;
                Ok(Decision::from_bool(valid, "CSR verifier rejected the request"))
            }
            Validation::Dynamic(store) => {
                let live = store
                    .has_challenge(&request.challenge_password)
                    .await
                    .map_err(|e| ScepError::Validation(format!("challenge store: {:#}", e)))?;
                Ok(Decision::from_bool(live, "challenge password is not a valid dynamic challenge"))
            }
            Validation::Static(password) => Ok(Decision::from_bool(
                request.challenge_password == *password,
                "challenge password does not match",
            )),
            Validation::Open => Ok(Decision::Accept),
        }
    }

    async fn notify_failure(&self, tx: &Transaction, reason: &str) {
        let Some(failer) = &self.failer else { return };
        if let Err(e) = failer.fail(&tx.id, &tx.raw_request, reason).await {
            error!("Failure notifier error: {:#}", e);
        }
    }
}

/// Builder for [`ScepService`]
pub struct ScepServiceBuilder {
    codec: Arc<dyn PkiCodec>,
    depot: Arc<dyn Depot>,
    ca_key_password: Vec<u8>,
    challenge_password: Option<String>,
    allow_renewal_days: u32,
    client_validity_days: u32,
    csr_verifier: Option<Arc<dyn CsrVerifier>>,
    challenge_store: Option<Arc<dyn ChallengeStore>>,
    subject_filter: Option<Arc<dyn SubjectFilter>>,
    ca_chooser: Option<Arc<dyn CaChooser>>,
    successer: Option<Arc<dyn CertSuccesser>>,
    failer: Option<Arc<dyn CertFailer>>,
}

impl ScepServiceBuilder {
    pub fn new(depot: Arc<dyn Depot>, codec: Arc<dyn PkiCodec>) -> Self {
        Self {
            codec,
            depot,
            ca_key_password: Vec::new(),
            challenge_password: None,
            allow_renewal_days: DEFAULT_ALLOW_RENEWAL_DAYS,
            client_validity_days: DEFAULT_CLIENT_VALIDITY_DAYS,
            csr_verifier: None,
            challenge_store: None,
            subject_filter: None,
            ca_chooser: None,
            successer: None,
            failer: None,
        }
    }

    /// Apply service settings and create the configured executable plugins
    pub fn from_config(
        depot: Arc<dyn Depot>,
        codec: Arc<dyn PkiCodec>,
        config: &ScepConfig,
    ) -> ScepResult<Self> {
        let service = &config.service;
        let plugins = &config.plugins;
        let timeout = plugins.timeout();

        let mut builder = Self::new(depot, codec)
            .ca_key_password(service.ca_key_password.as_bytes())
            .allow_renewal_days(service.allow_renewal_days)
            .client_validity_days(service.client_validity_days);

        if let Some(password) = &service.challenge_password {
            builder = builder.challenge_password(password.clone());
        }
        if let Some(path) = &plugins.csr_verifier {
            let verifier = ExecutableCsrVerifier::new(path)?.with_timeout(timeout);
            builder = builder.csr_verifier(Arc::new(verifier));
        }
        if let Some(path) = &plugins.ca_chooser {
            let chooser = ExecutableCaChooser::new(path)?.with_timeout(timeout);
            builder = builder.ca_chooser(Arc::new(chooser));
        }
        if let Some(path) = &plugins.subject_filter {
            let filter = ExecutableSubjectFilter::new(path)?.with_timeout(timeout);
            builder = builder.subject_filter(Arc::new(filter));
        }

        Ok(builder)
    }

    pub fn ca_key_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.ca_key_password = password.into();
        self
    }

    /// Static shared secret; ignored when a challenge store is configured
    pub fn challenge_password(mut self, password: impl Into<String>) -> Self {
        self.challenge_password = Some(password.into());
        self
    }

    pub fn allow_renewal_days(mut self, days: u32) -> Self {
        self.allow_renewal_days = days;
        self
    }

    pub fn client_validity_days(mut self, days: u32) -> Self {
        self.client_validity_days = days;
        self
    }

    pub fn csr_verifier(mut self, verifier: Arc<dyn CsrVerifier>) -> Self {
        self.csr_verifier = Some(verifier);
        self
    }

    pub fn challenge_store(mut self, store: Arc<dyn ChallengeStore>) -> Self {
        self.challenge_store = Some(store);
        self
    }

    pub fn subject_filter(mut self, filter: Arc<dyn SubjectFilter>) -> Self {
        self.subject_filter = Some(filter);
        self
    }

    pub fn ca_chooser(mut self, chooser: Arc<dyn CaChooser>) -> Self {
        self.ca_chooser = Some(chooser);
        self
    }

    pub fn cert_successer(mut self, successer: Arc<dyn CertSuccesser>) -> Self {
        self.successer = Some(successer);
        self
    }

    pub fn cert_failer(mut self, failer: Arc<dyn CertFailer>) -> Self {
        self.failer = Some(failer);
        self
    }

    /// Load the default CA from the depot and create the service
    pub async fn build(self) -> ScepResult<ScepService> {
        if self.client_validity_days == 0 {
            return Err(ScepError::Config(
                "client certificate validity must be at least one day".to_string(),
            ));
        }

        let authority = self
            .depot
            .ca(&self.ca_key_password)
            .await
            .map_err(|e| ScepError::Store(format!("failed to load CA: {:#}", e)))?;

        let validation = Validation::resolve(
            self.csr_verifier,
            self.challenge_store.clone(),
            self.challenge_password.as_deref(),
        );
        if matches!(validation, Validation::Open) {
            warn!("No challenge password, challenge store or CSR verifier configured: every enrollment will be accepted");
        }

        info!(
            validation = validation.describe(),
            allow_renewal_days = self.allow_renewal_days,
            client_validity_days = self.client_validity_days,
            subject_filter = self.subject_filter.is_some(),
            ca_chooser = self.ca_chooser.is_some(),
            "SCEP service ready"
        );

        Ok(ScepService {
            codec: self.codec,
            depot: self.depot,
            authority,
            ca_key_password: self.ca_key_password,
            challenge_password: self.challenge_password.unwrap_or_default(),
            challenge_store: self.challenge_store,
            allow_renewal_days: self.allow_renewal_days,
            client_validity_days: self.client_validity_days,
            validation,
            subject_filter: self.subject_filter,
            ca_chooser: self.ca_chooser,
            successer: self.successer,
            failer: self.failer,
        })
    }
}
