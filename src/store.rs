//! Store-backed implementations of the capability traits.
//!
//! [`WebPkiTrustEvaluator`] verifies chains against one set of trust
//! anchors using the webpki path validation built into rustls.
//! [`StaticKeyStore`] holds a fixed list of identities.

use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::{ParsedCertificate, WebPkiClientVerifier};
use rustls::sign::SigningKey;
use rustls::{CertificateError, DistinguishedName, RootCertStore, SignatureAlgorithm};
use std::sync::Arc;

use crate::api::{
    AuthType, ConnectionContext, KeyMaterialProvider, TrustError, TrustEvaluator, key_types,
};
use crate::certs::{issuer_raw, subject_raw};
use crate::context::MultiTrustTlsError;

fn classify(e: rustls::Error) -> TrustError {
    match e {
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
            TrustError::Rejected(e)
        }
        other => TrustError::Internal(other),
    }
}

fn split_chain<'a, 'b>(
    chain: &'a [CertificateDer<'b>],
) -> Result<(&'a CertificateDer<'b>, &'a [CertificateDer<'b>]), TrustError> {
    chain
        .split_first()
        .ok_or(TrustError::Rejected(rustls::Error::NoCertificatesPresented))
}

/// Trust evaluator over a single set of trust anchors.
///
/// Both roles get full webpki path validation, including validity period
/// and extended key usage, but no name checks.
pub struct WebPkiTrustEvaluator {
    anchors: Vec<CertificateDer<'static>>,
    roots: Arc<RootCertStore>,
    crypto_provider: Arc<CryptoProvider>,
    // None when there are no anchors: rustls refuses to build it.
    client_verifier: Option<Arc<dyn ClientCertVerifier>>,
}

impl std::fmt::Debug for WebPkiTrustEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPkiTrustEvaluator")
            .field("anchors", &self.anchors.len())
            .finish_non_exhaustive()
    }
}

impl WebPkiTrustEvaluator {
    /// Trust chains that lead to any of `anchors`.
    pub fn new(
        anchors: Vec<CertificateDer<'static>>,
        crypto_provider: Arc<CryptoProvider>,
    ) -> Result<Self, MultiTrustTlsError> {
        let mut roots = RootCertStore::empty();
        for anchor in &anchors {
            roots.add(anchor.clone())?;
        }
        let roots = Arc::new(roots);
        let client_verifier = if roots.is_empty() {
            None
        } else {
            Some(
                WebPkiClientVerifier::builder_with_provider(
                    Arc::clone(&roots),
                    Arc::clone(&crypto_provider),
                )
                .build()?,
            )
        };
        Ok(Self {
            anchors,
            roots,
            crypto_provider,
            client_verifier,
        })
    }
}

impl TrustEvaluator for WebPkiTrustEvaluator {
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        _: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        let (end_entity, intermediates) = split_chain(chain)?;
        let Some(verifier) = &self.client_verifier else {
            return Err(TrustError::Rejected(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )));
        };
        verifier
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ())
            .map_err(classify)
    }

    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        _: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        let (end_entity, intermediates) = split_chain(chain)?;
        let parsed = ParsedCertificate::try_from(end_entity).map_err(classify)?;
        verify_server_cert_signed_by_trust_anchor(
            &parsed,
            &self.roots,
            intermediates,
            now,
            self.crypto_provider.signature_verification_algorithms.all,
        )
        .map_err(classify)
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.anchors.clone()
    }
}

/// Key type of a signing key, in the vocabulary of [`key_types`].
pub fn key_type_of(key: &dyn SigningKey) -> &'static str {
    match key.algorithm() {
        SignatureAlgorithm::RSA => key_types::RSA,
        SignatureAlgorithm::ECDSA => key_types::EC,
        SignatureAlgorithm::ED25519 => key_types::ED25519,
        SignatureAlgorithm::ED448 => key_types::ED448,
        _ => "UNKNOWN",
    }
}

struct KeyEntry {
    alias: String,
    key_type: &'static str,
    chain: Vec<CertificateDer<'static>>,
    // Issuer and subject DER of every certificate in the chain.
    names: Vec<Vec<u8>>,
    key: Arc<dyn SigningKey>,
}

impl KeyEntry {
    fn matches(&self, key_type: &str, issuers: &[DistinguishedName]) -> bool {
        self.key_type == key_type
            && (issuers.is_empty()
                || self
                    .names
                    .iter()
                    .any(|raw| issuers.iter().any(|dn| dn.as_ref() == raw.as_slice())))
    }
}

/// Fixed set of identities, kept in insertion order.
///
/// An alias qualifies for a key type if its signing key is of that type
/// and, when the peer names acceptable issuers, if any certificate of its
/// chain is one of them or was issued by one of them. The same aliases
/// serve both roles.
#[derive(Default)]
pub struct StaticKeyStore {
    entries: Vec<KeyEntry>,
}

impl std::fmt::Debug for StaticKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.alias, e.key_type)))
            .finish()
    }
}

impl StaticKeyStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity, replacing any earlier one with the same alias.
    pub fn insert(
        &mut self,
        alias: impl Into<String>,
        chain: Vec<CertificateDer<'static>>,
        key: Arc<dyn SigningKey>,
    ) {
        let entry = KeyEntry {
            alias: alias.into(),
            key_type: key_type_of(key.as_ref()),
            names: chain
                .iter()
                .flat_map(|c| [issuer_raw(c), subject_raw(c)])
                .flatten()
                .collect(),
            chain,
            key,
        };
        match self.entries.iter_mut().find(|e| e.alias == entry.alias) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Builder form of [`Self::insert`].
    pub fn with_identity(
        mut self,
        alias: impl Into<String>,
        chain: Vec<CertificateDer<'static>>,
        key: Arc<dyn SigningKey>,
    ) -> Self {
        self.insert(alias, chain, key);
        self
    }

    /// Number of identities held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identity is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.matches(key_type, issuers))
            .map(|e| e.alias.clone())
            .collect()
    }

    fn entry(&self, alias: &str) -> Option<&KeyEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }
}

impl KeyMaterialProvider for StaticKeyStore {
    fn client_aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String> {
        self.aliases(key_type, issuers)
    }

    fn server_aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String> {
        self.aliases(key_type, issuers)
    }

    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: &[DistinguishedName],
        _: Option<&ConnectionContext<'_>>,
    ) -> Option<String> {
        key_types
            .iter()
            .find_map(|key_type| self.aliases(key_type, issuers).into_iter().next())
    }

    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: &[DistinguishedName],
        _: Option<&ConnectionContext<'_>>,
    ) -> Option<String> {
        self.aliases(key_type, issuers).into_iter().next()
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.entry(alias).map(|e| e.chain.clone())
    }

    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>> {
        self.entry(alias).map(|e| Arc::clone(&e.key))
    }
}
