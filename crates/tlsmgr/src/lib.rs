//! Certificate lifecycle and client-certificate policy for the relay
//! server's TLS-terminating listeners (§4.10).
//!
//! # Overview
//!
//! On startup, each TLS endpoint (and the session server's own listener,
//! when TLS-wrapped) loads a PEM certificate/key pair, generating and
//! persisting a self-signed one on first run if none exists yet. Presented
//! client certificates, when mutual TLS is required, are checked against a
//! thumbprint allow-list plus (outside dev mode) full chain validation.
//!
//! # Design
//!
//! `rcgen` and `rustls` replace the reference implementation's platform
//! certificate store and PKCS#12 container; see `DESIGN.md` for what
//! changed and why.

mod cert;
mod client;
mod error;
mod server;
mod validate;

pub use cert::{load, load_or_generate, CertificateBundle};
pub use client::build_client_config;
pub use error::TlsError;
pub use server::{build_server_config, empty_root_store};
pub use validate::{thumbprint, validate, ChainStatus, ClientCertPolicy, Presentation};
