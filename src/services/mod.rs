//! Issuance services and plugin bridges

pub mod ca_chooser;
pub mod challenge;
pub mod codec;
pub mod csr_verifier;
pub mod depot;
pub mod issuance;
pub mod key_id;
pub mod notifier;
pub mod pem_decrypt;
pub mod plugin;
pub mod subject_filter;

pub use ca_chooser::{CaChooser, ExecutableCaChooser};
pub use challenge::ChallengeStore;
pub use codec::PkiCodec;
pub use csr_verifier::{CsrVerifier, ExecutableCsrVerifier};
pub use depot::Depot;
pub use issuance::{ScepService, ScepServiceBuilder, TransactionState, CA_CAPS};
pub use key_id::generate_subject_key_id;
pub use notifier::{CertFailer, CertSuccesser};
pub use plugin::{PluginExecutable, PluginKind, PluginOutput, StdoutMode};
pub use subject_filter::{ExecutableSubjectFilter, SubjectFilter};
