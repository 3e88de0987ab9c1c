//! Assembly of rustls configurations around one [`CompositeTrustEvaluator`].
//!
//! A [`ContextAssembler`] collects trust evaluators and key-material
//! providers from any number of sources, then [`ContextAssembler::build`]
//! freezes them into a [`TlsContext`] which hands out rustls
//! [`ClientConfig`]s and [`ServerConfig`]s:
//!
//! ```
//! use multitrust_tls::{ClientAuthEnabled, ContextAssembler, RejectUntrusted, StaticKeyStore};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), multitrust_tls::MultiTrustTlsError> {
//! let context = ContextAssembler::new()
//!     .with_trust_strategy(Arc::new(RejectUntrusted))
//!     // .load_trust_material_from_file("corporate-roots.pem", None)?
//!     // .load_trust_material_from_file("partner-roots.pem", None)?
//!     .load_key_material(Arc::new(StaticKeyStore::new()), None)
//!     .build()?;
//! let client_config = context.client_config();
//! let server_config = context.server_config::<ClientAuthEnabled>()?;
//! # let _ = (client_config, server_config);
//! # Ok(())
//! # }
//! ```
//!
//! Whichever store's evaluator accepts a peer, the configurations consult
//! every registered evaluator. Local identities come from the first
//! registered key-material provider.

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ClientConfig, ResolvesClientCert, verify_server_name};
use rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ParsedCertificate, ResolvesServerCert, ServerConfig};
use rustls::sign::CertifiedKey;
use rustls::{
    ConfigBuilder, DigitallySignedStruct, DistinguishedName, SignatureScheme,
    SupportedProtocolVersion,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::api::{
    AliasSelectionPolicy, ConnectionContext, KeyMaterialProvider, TrustError,
    TrustEvaluationStrategy, TrustEvaluator, TrustOverride, key_types,
};
use crate::certs::{auth_type_for, subject_dn};
use crate::composite::CompositeTrustEvaluator;
use crate::crypto_provider::default_crypto_provider;
use crate::delegate::{IdentityDelegate, TrustDelegate};
#[cfg(any(feature = "files", feature = "default-roots"))]
use crate::store::WebPkiTrustEvaluator;

/// Error type returned while assembling a [`TlsContext`].
#[derive(Debug, Error)]
pub enum MultiTrustTlsError {
    /// Wrapper for rustls::Error
    #[error("{0}")]
    TLSError(#[from] rustls::Error),
    /// A trust store could not be turned into a client verifier.
    #[error("{0}")]
    VerifierError(#[from] rustls::server::VerifierBuilderError),
    /// Wrapper for std::io::Error
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    /// A key file contained no private key.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    /// A certificate file contained no certificates.
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),
    /// Only one of `--key-path` and `--cert-path` was given.
    #[error("--key-path and --cert-path must be given together")]
    MissingKeyFlags,
    /// A server configuration was requested without any key material.
    #[error("No key material is available for serving")]
    NoIdentity,
}

fn push_unique<T: ?Sized>(items: &mut Vec<Arc<T>>, item: Arc<T>) {
    if !items.iter().any(|existing| Arc::ptr_eq(existing, &item)) {
        items.push(item);
    }
}

/// Builder for a [`TlsContext`].
///
/// Trust evaluators are consulted in the order they are loaded.
/// Registering the same `Arc` twice has no effect. Settings that affect
/// loading from files (the crypto provider) should come before the loads.
pub struct ContextAssembler {
    crypto_provider: Option<Arc<CryptoProvider>>,
    protocol_versions: Option<Vec<&'static SupportedProtocolVersion>>,
    strategy: Option<Arc<dyn TrustEvaluationStrategy>>,
    endpoint_identification: bool,
    trust_evaluators: Vec<Arc<dyn TrustEvaluator>>,
    key_providers: Vec<Arc<dyn KeyMaterialProvider>>,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextAssembler {
    /// An assembler with no trust or key material, the default crypto
    /// provider, rustls' safe default protocol versions, no trust failure
    /// strategy and endpoint identification enabled.
    pub fn new() -> Self {
        Self {
            crypto_provider: None,
            protocol_versions: None,
            strategy: None,
            endpoint_identification: true,
            trust_evaluators: Vec::new(),
            key_providers: Vec::new(),
        }
    }

    /// Use `crypto_provider` instead of
    /// [`crate::crypto_provider::default_crypto_provider`].
    pub fn with_crypto_provider(mut self, crypto_provider: Arc<CryptoProvider>) -> Self {
        self.crypto_provider = Some(crypto_provider);
        self
    }

    /// Restrict the TLS protocol versions.
    pub fn with_protocol_versions(
        mut self,
        versions: &[&'static SupportedProtocolVersion],
    ) -> Self {
        self.protocol_versions = Some(versions.to_vec());
        self
    }

    /// Install the strategy run when no evaluator trusts a peer. Without
    /// one, such peers are let through by the trust evaluation step.
    pub fn with_trust_strategy(mut self, strategy: Arc<dyn TrustEvaluationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Whether clients check the server certificate against the name
    /// they connected to, once trust evaluation has passed.
    pub fn with_endpoint_identification(mut self, enabled: bool) -> Self {
        self.endpoint_identification = enabled;
        self
    }

    pub(crate) fn crypto_provider(&self) -> Arc<CryptoProvider> {
        self.crypto_provider
            .clone()
            .unwrap_or_else(default_crypto_provider)
    }

    /// Add a trust evaluator, behind a [`TrustDelegate`] if a
    /// `trust_override` is given.
    pub fn load_trust_material(
        mut self,
        evaluator: Arc<dyn TrustEvaluator>,
        trust_override: Option<Arc<dyn TrustOverride>>,
    ) -> Self {
        let evaluator = match trust_override {
            Some(o) => Arc::new(TrustDelegate::new(evaluator, Some(o))),
            None => evaluator,
        };
        push_unique(&mut self.trust_evaluators, evaluator);
        self
    }

    #[cfg(any(feature = "files", feature = "default-roots"))]
    pub(crate) fn load_trust_anchors(
        self,
        anchors: Vec<CertificateDer<'static>>,
        trust_override: Option<Arc<dyn TrustOverride>>,
    ) -> Result<Self, MultiTrustTlsError> {
        let evaluator = WebPkiTrustEvaluator::new(anchors, self.crypto_provider())?;
        Ok(self.load_trust_material(Arc::new(evaluator), trust_override))
    }

    /// Add a trust store holding the Mozilla root program's certificates,
    /// the usual set of public web roots. Pair it with a `trust_override`
    /// to also accept pinned self-signed servers.
    #[cfg(feature = "default-roots")]
    pub fn load_default_trust_material(
        self,
        trust_override: Option<Arc<dyn TrustOverride>>,
    ) -> Result<Self, MultiTrustTlsError> {
        self.load_trust_anchors(
            webpki_root_certs::TLS_SERVER_ROOT_CERTS.to_vec(),
            trust_override,
        )
    }

    /// Add a key-material provider, behind an [`IdentityDelegate`] if a
    /// `policy` is given.
    pub fn load_key_material(
        mut self,
        provider: Arc<dyn KeyMaterialProvider>,
        policy: Option<Arc<dyn AliasSelectionPolicy>>,
    ) -> Self {
        let provider = match policy {
            Some(p) => Arc::new(IdentityDelegate::new(provider, p)),
            None => provider,
        };
        push_unique(&mut self.key_providers, provider);
        self
    }

    /// Freeze the collected material into a [`TlsContext`].
    pub fn build(self) -> Result<TlsContext, MultiTrustTlsError> {
        let crypto_provider = self.crypto_provider();
        let client_builder = ClientConfig::builder_with_provider(Arc::clone(&crypto_provider));
        let server_builder = ServerConfig::builder_with_provider(Arc::clone(&crypto_provider));
        let (client_config_builder, server_config_builder) = match &self.protocol_versions {
            Some(versions) => (
                client_builder.with_protocol_versions(versions)?,
                server_builder.with_protocol_versions(versions)?,
            ),
            None => (
                client_builder.with_safe_default_protocol_versions()?,
                server_builder.with_safe_default_protocol_versions()?,
            ),
        };
        if self.key_providers.len() > 1 {
            log::warn!(
                "{} key-material providers registered; only the first one supplies identities",
                self.key_providers.len()
            );
        }
        log::info!(
            "TLS context assembled from {} trust evaluators and {} key-material providers",
            self.trust_evaluators.len(),
            self.key_providers.len(),
        );
        Ok(TlsContext {
            trust: Arc::new(CompositeTrustEvaluator::new(
                self.strategy,
                self.trust_evaluators,
            )),
            identity: self.key_providers.into_iter().next(),
            supported_algs: crypto_provider.signature_verification_algorithms,
            client_config_builder,
            server_config_builder,
            endpoint_identification: self.endpoint_identification,
        })
    }
}

/// Immutable result of [`ContextAssembler::build`], safe to share between
/// any number of concurrent handshakes.
pub struct TlsContext {
    trust: Arc<CompositeTrustEvaluator>,
    identity: Option<Arc<dyn KeyMaterialProvider>>,
    supported_algs: WebPkiSupportedAlgorithms,
    client_config_builder: ConfigBuilder<ClientConfig, rustls::WantsVerifier>,
    server_config_builder: ConfigBuilder<ServerConfig, rustls::WantsVerifier>,
    endpoint_identification: bool,
}

impl TlsContext {
    /// The composite wrapping every loaded trust evaluator.
    pub fn trust_evaluator(&self) -> Arc<CompositeTrustEvaluator> {
        Arc::clone(&self.trust)
    }

    /// The key-material provider that supplies local identities.
    pub fn identity(&self) -> Option<Arc<dyn KeyMaterialProvider>> {
        self.identity.clone()
    }

    fn trust_bridge(&self) -> TrustBridge {
        TrustBridge {
            composite: Arc::clone(&self.trust),
            supported_algs: self.supported_algs,
            root_hint_subjects: self
                .trust
                .accepted_issuers()
                .iter()
                .filter_map(subject_dn)
                .collect(),
        }
    }

    /// A client configuration verifying servers with the composite and
    /// presenting an identity if the server asks for one.
    pub fn client_config(&self) -> ClientConfig {
        let backend = Arc::new(ClientConfigBackend {
            trust: self.trust_bridge(),
            identity: self.identity.clone(),
            endpoint_identification: self.endpoint_identification,
        });
        let backend2 = Arc::clone(&backend);
        self.client_config_builder
            .clone()
            .dangerous()
            .with_custom_certificate_verifier(backend)
            .with_client_cert_resolver(backend2)
    }

    /// A server configuration presenting an identity chosen by the key
    /// provider and, with [`ClientAuthEnabled`], verifying clients with
    /// the composite.
    pub fn server_config<CA: ClientAuthMode>(&self) -> Result<ServerConfig, MultiTrustTlsError> {
        let identity = self.identity.clone().ok_or(MultiTrustTlsError::NoIdentity)?;
        let backend = Arc::new(ServerConfigBackend {
            trust: self.trust_bridge(),
            identity,
        });
        Ok(CA::configure_client_auth(&backend, self.server_config_builder.clone())
            .with_cert_resolver(backend))
    }
}

/// Key types able to produce any of `schemes`, in order of first mention.
fn key_types_for(schemes: &[SignatureScheme]) -> Vec<&'static str> {
    let mut out = Vec::new();
    for scheme in schemes {
        let key_type = match scheme {
            SignatureScheme::RSA_PKCS1_SHA1
            | SignatureScheme::RSA_PKCS1_SHA256
            | SignatureScheme::RSA_PKCS1_SHA384
            | SignatureScheme::RSA_PKCS1_SHA512
            | SignatureScheme::RSA_PSS_SHA256
            | SignatureScheme::RSA_PSS_SHA384
            | SignatureScheme::RSA_PSS_SHA512 => key_types::RSA,
            SignatureScheme::ECDSA_SHA1_Legacy
            | SignatureScheme::ECDSA_NISTP256_SHA256
            | SignatureScheme::ECDSA_NISTP384_SHA384
            | SignatureScheme::ECDSA_NISTP521_SHA512 => key_types::EC,
            SignatureScheme::ED25519 => key_types::ED25519,
            SignatureScheme::ED448 => key_types::ED448,
            _ => continue,
        };
        if !out.contains(&key_type) {
            out.push(key_type);
        }
    }
    out
}

fn certified_key(provider: &dyn KeyMaterialProvider, alias: &str) -> Option<Arc<CertifiedKey>> {
    match (provider.certificate_chain(alias), provider.private_key(alias)) {
        (Some(chain), Some(key)) => Some(Arc::new(CertifiedKey::new(chain, key))),
        _ => {
            log::warn!("Identity {} was chosen but has no certificate chain or key", alias);
            None
        }
    }
}

fn chain_of<'a>(
    end_entity: &CertificateDer<'a>,
    intermediates: &[CertificateDer<'a>],
) -> Vec<CertificateDer<'a>> {
    std::iter::once(end_entity)
        .chain(intermediates)
        .cloned()
        .collect()
}

#[derive(Debug)]
struct TrustBridge {
    composite: Arc<CompositeTrustEvaluator>,
    supported_algs: WebPkiSupportedAlgorithms,
    root_hint_subjects: Vec<DistinguishedName>,
}

#[derive(Debug)]
struct ClientConfigBackend {
    trust: TrustBridge,
    identity: Option<Arc<dyn KeyMaterialProvider>>,
    endpoint_identification: bool,
}

impl ServerCertVerifier for ClientConfigBackend {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = chain_of(end_entity, intermediates);
        self.trust
            .composite
            .check_server_trusted(&chain, &auth_type_for(end_entity), now)
            .map_err(TrustError::into_rustls)?;
        if self.endpoint_identification {
            verify_server_name(&ParsedCertificate::try_from(end_entity)?, server_name)?;
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.trust.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.trust.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.trust.supported_algs.supported_schemes()
    }

    fn root_hint_subjects(&self) -> Option<&[DistinguishedName]> {
        if self.trust.root_hint_subjects.is_empty() {
            None
        } else {
            Some(&self.trust.root_hint_subjects)
        }
    }
}

impl ResolvesClientCert for ClientConfigBackend {
    fn resolve(
        &self,
        root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let identity = self.identity.as_ref()?;
        let issuers = root_hint_subjects
            .iter()
            .map(|raw| DistinguishedName::from(raw.to_vec()))
            .collect::<Vec<_>>();
        // No transport handle is visible from here.
        let alias = identity.choose_engine_client_alias(&key_types_for(sigschemes), &issuers)?;
        certified_key(identity.as_ref(), &alias)
    }

    fn has_certs(&self) -> bool {
        self.identity.is_some()
    }
}

#[derive(Debug)]
struct ServerConfigBackend {
    trust: TrustBridge,
    identity: Arc<dyn KeyMaterialProvider>,
}

impl ResolvesServerCert for ServerConfigBackend {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let context = ConnectionContext {
            server_name: client_hello.server_name(),
            peer_addr: None,
        };
        let issuers = client_hello.certificate_authorities().unwrap_or_default();
        key_types_for(client_hello.signature_schemes())
            .into_iter()
            .find_map(|key_type| {
                self.identity
                    .choose_server_alias(key_type, issuers, Some(&context))
            })
            .and_then(|alias| certified_key(self.identity.as_ref(), &alias))
    }
}

impl ClientCertVerifier for ServerConfigBackend {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.trust.root_hint_subjects
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let chain = chain_of(end_entity, intermediates);
        self.trust
            .composite
            .check_client_trusted(&chain, &auth_type_for(end_entity), now)
            .map_err(TrustError::into_rustls)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.trust.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.trust.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.trust.supported_algs.supported_schemes()
    }
}

/// Trait for either [`ClientAuthEnabled`] or [`ClientAuthDisabled`].
pub trait ClientAuthMode {
    #[doc(hidden)]
    #[allow(private_interfaces)]
    fn configure_client_auth(
        backend: &Arc<ServerConfigBackend>,
        scb: ConfigBuilder<ServerConfig, rustls::WantsVerifier>,
    ) -> ConfigBuilder<ServerConfig, rustls::server::WantsServerCert>;
}

/// Type argument for [`TlsContext::server_config`] to request mutual TLS auth.
pub enum ClientAuthEnabled {}

impl ClientAuthMode for ClientAuthEnabled {
    #[allow(private_interfaces)]
    fn configure_client_auth(
        backend: &Arc<ServerConfigBackend>,
        scb: ConfigBuilder<ServerConfig, rustls::WantsVerifier>,
    ) -> ConfigBuilder<ServerConfig, rustls::server::WantsServerCert> {
        let verifier = Arc::clone(backend);
        scb.with_client_cert_verifier(verifier)
    }
}

/// Type argument for [`TlsContext::server_config`] to request no client auth.
pub enum ClientAuthDisabled {}

impl ClientAuthMode for ClientAuthDisabled {
    #[allow(private_interfaces)]
    fn configure_client_auth(
        _: &Arc<ServerConfigBackend>,
        scb: ConfigBuilder<ServerConfig, rustls::WantsVerifier>,
    ) -> ConfigBuilder<ServerConfig, rustls::server::WantsServerCert> {
        scb.with_no_client_auth()
    }
}
