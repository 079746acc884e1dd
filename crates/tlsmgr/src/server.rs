//! Builds a `rustls::ServerConfig` from a loaded certificate bundle (§4.10).

use std::sync::Arc;

use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DistinguishedName, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, UnixTime};

use crate::cert::CertificateBundle;
use crate::error::TlsError;

/// Accepts any client certificate at the handshake layer without rejecting
/// the connection; the accept/reject decision in §4.10 is applied
/// afterward, against the peer certificate the handshake captured, by
/// [`crate::validate::validate`]. `rustls` still requires *some*
/// [`ClientCertVerifier`] to request a certificate at all, so this one
/// exists to satisfy that API without duplicating a full PKI trust store.
#[derive(Debug)]
struct DeferredClientCertVerifier;

impl ClientCertVerifier for DeferredClientCertVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builds a `rustls::ServerConfig` presenting `bundle`. When
/// `client_certificate_required` is set, the handshake requests (but does
/// not itself reject on) a client certificate, deferring the accept
/// decision to [`crate::validate::validate`].
///
/// # Errors
///
/// Returns [`TlsError::Rustls`] if `rustls` rejects the certificate or key.
pub fn build_server_config(bundle: CertificateBundle, client_certificate_required: bool) -> Result<Arc<ServerConfig>, TlsError> {
    let builder = ServerConfig::builder();

    let config = if client_certificate_required {
        let verifier: Arc<dyn ClientCertVerifier> = Arc::new(DeferredClientCertVerifier);
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(bundle.certs, bundle.key)?
    } else {
        builder.with_no_client_auth().with_single_cert(bundle.certs, bundle.key)?
    };

    Ok(Arc::new(config))
}

/// An empty root store, used when a caller needs a `rustls` client-cert
/// verifier builder in non-dev mode with its own externally supplied trust
/// anchors.
#[must_use]
pub fn empty_root_store() -> RootCertStore {
    RootCertStore::empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_store_has_no_anchors() {
        assert_eq!(empty_root_store().len(), 0);
    }
}
