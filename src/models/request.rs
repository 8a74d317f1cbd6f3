//! SCEP message models exchanged with the codec

use std::fmt;

use x509_cert::request::CertReq;
use x509_cert::Certificate;

/// SCEP messageType attribute values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initial enrollment (19)
    PkcsReq,
    /// Renewal with an existing certificate (17)
    RenewalReq,
    /// Update of an existing certificate (18)
    UpdateReq,
    /// Polling for a pending request (20)
    GetCertInitial,
    /// Certificate retrieval by issuer and serial (21)
    GetCert,
    /// CRL retrieval (22)
    GetCrl,
}

impl MessageType {
    /// Numeric value carried in the messageType attribute
    pub fn code(self) -> u8 {
        match self {
            MessageType::RenewalReq => 17,
            MessageType::UpdateReq => 18,
            MessageType::PkcsReq => 19,
            MessageType::GetCertInitial => 20,
            MessageType::GetCert => 21,
            MessageType::GetCrl => 22,
        }
    }

    /// Whether the message carries a CSR that can be issued
    pub fn carries_csr(self) -> bool {
        matches!(
            self,
            MessageType::PkcsReq | MessageType::RenewalReq | MessageType::UpdateReq
        )
    }

    /// Whether the message is a new enrollment that must prove authorization
    pub fn is_enrollment(self) -> bool {
        self == MessageType::PkcsReq
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::PkcsReq => "PKCSReq",
            MessageType::RenewalReq => "RenewalReq",
            MessageType::UpdateReq => "UpdateReq",
            MessageType::GetCertInitial => "GetCertInitial",
            MessageType::GetCert => "GetCert",
            MessageType::GetCrl => "GetCRL",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// SCEP failInfo values for rejection replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailInfo {
    BadAlg,
    BadMessageCheck,
    BadRequest,
    BadTime,
    BadCertId,
}

/// A parsed but still encrypted PKI message
#[derive(Debug, Clone)]
pub struct PkiMessage {
    /// transactionID attribute
    pub transaction_id: String,
    /// messageType attribute
    pub message_type: MessageType,
    /// The raw envelope as received
    pub raw: Vec<u8>,
}

/// The decrypted content of a CSR-bearing PKI message
#[derive(Debug, Clone)]
pub struct DecryptedRequest {
    pub transaction_id: String,
    pub message_type: MessageType,
    /// The decrypted PKCS#10 request exactly as the client sent it
    pub raw_decrypted: Vec<u8>,
    /// challengePassword attribute of the CSR, empty when absent
    pub challenge_password: String,
    /// The parsed CSR; only its subject may be rewritten
    pub csr: CertReq,
}

/// A signed CertRep produced by the codec
#[derive(Debug, Clone)]
pub struct SignedReply {
    /// The encoded reply envelope
    pub raw: Vec<u8>,
    /// The certificate issued inside the reply
    pub certificate: Certificate,
}

/// Outcome of a PKIOperation that produced a protocol reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkiOperationOutcome {
    /// A CertRep carrying the newly issued certificate
    Issued(Vec<u8>),
    /// A signed CertRep with pkiStatus FAILURE
    Rejected(Vec<u8>),
}

impl PkiOperationOutcome {
    /// The reply bytes to hand back to the transport
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            PkiOperationOutcome::Issued(raw) | PkiOperationOutcome::Rejected(raw) => raw,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, PkiOperationOutcome::Rejected(_))
    }
}
