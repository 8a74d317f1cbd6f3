//! Trust decisions for incoming requests

/// Result of validating a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(String),
}

impl Decision {
    /// Accept when `valid`, otherwise reject with `reason`
    pub fn from_bool(valid: bool, reason: impl Into<String>) -> Self {
        if valid {
            Decision::Accept
        } else {
            Decision::Reject(reason.into())
        }
    }
}
