//! Authenticators attached to outbound store requests

use std::fmt;

/// Capability that authorizes requests made on a user's behalf.
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Value for the `Authorization` header of an outbound request
    fn authorization(&self) -> String;
}

/// Store authenticator backed by a root macaroon and its discharges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacaroonAuthenticator {
    pub macaroon: String,
    pub discharges: Vec<String>,
}

impl MacaroonAuthenticator {
    pub fn new(macaroon: impl Into<String>, discharges: Vec<String>) -> Self {
        Self {
            macaroon: macaroon.into(),
            discharges,
        }
    }
}

impl Authenticator for MacaroonAuthenticator {
    fn authorization(&self) -> String {
        let mut header = format!(r#"Macaroon root="{}""#, self.macaroon);
        for discharge in &self.discharges {
            header.push_str(&format!(r#", discharge="{discharge}""#));
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_with_discharges() {
        let auth = MacaroonAuthenticator::new("root-m", vec!["d1".into(), "d2".into()]);
        assert_eq!(
            auth.authorization(),
            r#"Macaroon root="root-m", discharge="d1", discharge="d2""#
        );
    }

    #[test]
    fn test_authorization_without_discharges() {
        let auth = MacaroonAuthenticator::new("root-m", Vec::new());
        assert_eq!(auth.authorization(), r#"Macaroon root="root-m""#);
    }
}
