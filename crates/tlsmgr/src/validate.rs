//! Client-certificate validation policy (§4.10).
//!
//! The actual X.509 chain walk is `rustls`'s job; this module takes the
//! chain-validation findings it produces and applies the accept/reject
//! policy the session server and TLS-terminating endpoints share.

use std::collections::HashSet;

use rustls_pki_types::CertificateDer;
use sha1::{Digest, Sha1};

use crate::error::TlsError;

/// One chain-validation finding for a presented client certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChainStatus {
    /// The chain terminates in a root that isn't in the trust store.
    UntrustedRoot,
    /// The certificate's `notAfter` is in the past.
    Expired,
    /// The certificate's `notBefore` is in the future.
    NotYetValid,
    /// The certificate appears on a revocation list.
    Revoked,
    /// The presented subject doesn't match any name the verifier expected.
    NameMismatch,
    /// Any other chain-validation failure not distinguished above.
    Other,
}

/// The allow-list and mode a client-certificate policy is evaluated under.
pub struct ClientCertPolicy {
    /// Lower-case hex SHA-1 thumbprints of certificates this policy accepts.
    pub thumbprint_allow_list: HashSet<String>,
    /// Subjects a certificate's `CommonName` must match in non-dev mode.
    pub allowed_subjects: HashSet<String>,
    /// Relaxes chain validation to also tolerate a lone `UntrustedRoot`
    /// finding alongside a clean chain, and downgrades thumbprint mismatches
    /// to a logged warning (§4.10).
    pub dev_mode: bool,
}

/// One presented client certificate plus the chain-validation findings
/// `rustls` produced for it.
pub struct Presentation<'a> {
    /// DER encoding of the leaf certificate, used to compute the thumbprint.
    pub certificate: &'a CertificateDer<'a>,
    /// The certificate's `CommonName`, checked against `allowed_subjects`.
    pub subject: &'a str,
    /// The certificate's `notAfter`, as a Unix timestamp.
    pub not_after_unix: i64,
    /// Chain-validation findings; empty means the chain validated cleanly.
    pub chain_statuses: &'a [ChainStatus],
}

/// Computes the lower-case hex SHA-1 thumbprint of a DER-encoded certificate
/// (§4.10, glossary "Thumbprint").
#[must_use]
pub fn thumbprint(certificate: &CertificateDer<'_>) -> String {
    let digest = Sha1::digest(certificate.as_ref());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Applies the client-certificate accept/reject policy described in §4.10:
///
/// accept iff the thumbprint is allow-listed and, outside dev mode, the
/// chain validates cleanly, the subject is allowed, and the certificate
/// hasn't expired. In dev mode, a clean chain or one whose only finding is
/// `UntrustedRoot` is tolerated and a thumbprint mismatch is logged rather
/// than rejected.
///
/// # Errors
///
/// Returns [`TlsError::ThumbprintNotAllowed`], [`TlsError::ChainNotClean`],
/// [`TlsError::SubjectNotAllowed`], or [`TlsError::CertificateExpired`]
/// depending on which check failed.
pub fn validate(policy: &ClientCertPolicy, presentation: &Presentation<'_>, now_unix: i64) -> Result<(), TlsError> {
    let observed_thumbprint = thumbprint(presentation.certificate);
    let thumbprint_allowed = policy
        .thumbprint_allow_list
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&observed_thumbprint));

    if policy.dev_mode {
        if !thumbprint_allowed {
            tracing::warn!(
                thumbprint = %observed_thumbprint,
                "client certificate thumbprint not on the allow list (accepted: dev mode)"
            );
        }
        return match presentation.chain_statuses {
            [] | [ChainStatus::UntrustedRoot] => Ok(()),
            other => Err(TlsError::ChainNotClean(other.to_vec())),
        };
    }

    if !thumbprint_allowed {
        return Err(TlsError::ThumbprintNotAllowed(observed_thumbprint));
    }
    if !presentation.chain_statuses.is_empty() {
        return Err(TlsError::ChainNotClean(presentation.chain_statuses.to_vec()));
    }
    if !policy.allowed_subjects.contains(presentation.subject) {
        return Err(TlsError::SubjectNotAllowed(presentation.subject.to_string()));
    }
    if presentation.not_after_unix <= now_unix {
        return Err(TlsError::CertificateExpired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(dev_mode: bool) -> ClientCertPolicy {
        ClientCertPolicy {
            thumbprint_allow_list: ["aa:bb".replace(':', "")].into_iter().collect(),
            allowed_subjects: ["relay-client".to_string()].into_iter().collect(),
            dev_mode,
        }
    }

    fn presentation<'a>(certificate: &'a CertificateDer<'a>, chain_statuses: &'a [ChainStatus]) -> Presentation<'a> {
        Presentation {
            certificate,
            subject: "relay-client",
            not_after_unix: 2_000_000_000,
            chain_statuses,
        }
    }

    #[test]
    fn thumbprint_is_stable_and_lowercase_hex() {
        let der = CertificateDer::from(vec![1, 2, 3, 4]);
        let first = thumbprint(&der);
        let second = thumbprint(&der);
        assert_eq!(first, second);
        assert_eq!(first, first.to_lowercase());
        assert_eq!(first.len(), 40);
    }

    #[test]
    fn non_dev_mode_rejects_an_unlisted_thumbprint() {
        let der = CertificateDer::from(vec![9, 9, 9]);
        let policy = policy(false);
        let pres = presentation(&der, &[]);
        let err = validate(&policy, &pres, 1_000_000_000).unwrap_err();
        assert!(matches!(err, TlsError::ThumbprintNotAllowed(_)));
    }

    #[test]
    fn non_dev_mode_accepts_a_clean_listed_certificate() {
        let der = CertificateDer::from(vec![1, 2, 3]);
        let mut policy = policy(false);
        policy.thumbprint_allow_list = [thumbprint(&der)].into_iter().collect();
        let pres = presentation(&der, &[]);
        assert!(validate(&policy, &pres, 1_000_000_000).is_ok());
    }

    #[test]
    fn non_dev_mode_rejects_any_chain_error() {
        let der = CertificateDer::from(vec![1, 2, 3]);
        let mut policy = policy(false);
        policy.thumbprint_allow_list = [thumbprint(&der)].into_iter().collect();
        let pres = presentation(&der, &[ChainStatus::Expired]);
        let err = validate(&policy, &pres, 1_000_000_000).unwrap_err();
        assert!(matches!(err, TlsError::ChainNotClean(_)));
    }

    #[test]
    fn non_dev_mode_rejects_an_expired_certificate() {
        let der = CertificateDer::from(vec![1, 2, 3]);
        let mut policy = policy(false);
        policy.thumbprint_allow_list = [thumbprint(&der)].into_iter().collect();
        let mut pres = presentation(&der, &[]);
        pres.not_after_unix = 0;
        let err = validate(&policy, &pres, 1_000_000_000).unwrap_err();
        assert!(matches!(err, TlsError::CertificateExpired));
    }

    #[test]
    fn dev_mode_tolerates_untrusted_root_only() {
        let der = CertificateDer::from(vec![5, 6, 7]);
        let policy = policy(true);
        let pres = presentation(&der, &[ChainStatus::UntrustedRoot]);
        assert!(validate(&policy, &pres, 1_000_000_000).is_ok());
    }

    #[test]
    fn dev_mode_accepts_a_clean_chain() {
        let der = CertificateDer::from(vec![5, 6, 7]);
        let policy = policy(true);
        let pres = presentation(&der, &[]);
        assert!(validate(&policy, &pres, 1_000_000_000).is_ok());
    }

    #[test]
    fn dev_mode_still_rejects_other_chain_errors() {
        let der = CertificateDer::from(vec![5, 6, 7]);
        let policy = policy(true);
        let pres = presentation(&der, &[ChainStatus::UntrustedRoot, ChainStatus::Expired]);
        let err = validate(&policy, &pres, 1_000_000_000).unwrap_err();
        assert!(matches!(err, TlsError::ChainNotClean(_)));
    }

    #[test]
    fn dev_mode_accepts_an_unlisted_thumbprint_with_a_clean_chain() {
        let der = CertificateDer::from(vec![8, 8, 8]);
        let policy = policy(true);
        let pres = presentation(&der, &[ChainStatus::UntrustedRoot]);
        assert!(validate(&policy, &pres, 1_000_000_000).is_ok());
    }
}
