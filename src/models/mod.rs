//! Data models for the issuance engine

pub mod authority;
pub mod decision;
pub mod request;
pub mod template;

pub use authority::AuthorityMaterial;
pub use decision::Decision;
pub use request::{
    DecryptedRequest, FailInfo, MessageType, PkiMessage, PkiOperationOutcome, SignedReply,
};
pub use template::{CertificateTemplate, BACKDATE_MINUTES, CLIENT_AUTH};
