//! Capabilities consumed and exposed by the multi-source trust engine.
//!
//! A [`TrustEvaluator`] judges certificate chains presented by peers and
//! lists the issuers it accepts. A [`KeyMaterialProvider`] enumerates local
//! identities by alias and hands out their certificate chains and signing
//! keys. Both traits are implemented by the raw, store-backed collaborators
//! in [`crate::store`] and by the wrappers in [`crate::composite`] and
//! [`crate::delegate`], so a wrapper can stand in anywhere a raw
//! implementation is expected.
//!
//! The plug-in points are small traits as well:
//!
//! * [`TrustEvaluationStrategy`] reacts when no evaluator trusts a chain.
//! * [`TrustOverride`] pre-approves specific server chains.
//! * [`AliasSelectionPolicy`] picks one identity out of an [`AliasTable`].
//!
//! Plain closures can be used for the last two via [`trust_override`] and
//! [`alias_policy`].
//!
//! ```
//! use multitrust_tls::api::{AliasTable, AuthType, alias_policy, trust_override};
//!
//! let pinned = trust_override(|chain, _auth_type: &AuthType| chain.len() == 1);
//! let smallest = alias_policy(|aliases: &AliasTable, _| aliases.keys().min().cloned());
//! # let _ = (pinned, smallest);
//! ```

use rustls::DistinguishedName;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::sign::SigningKey;
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

pub use rustls;
pub use rustls_pki_types;

/// Key type names understood by [`crate::store::StaticKeyStore`] and by the
/// rustls handshake bridges.
pub mod key_types {
    /// RSA keys (PKCS#1 and PSS signatures).
    pub const RSA: &str = "RSA";
    /// ECDSA keys on any named curve.
    pub const EC: &str = "EC";
    /// Ed25519 keys.
    pub const ED25519: &str = "Ed25519";
    /// Ed448 keys.
    pub const ED448: &str = "Ed448";
}

/// Opaque token naming the key-exchange or signature algorithm family of a
/// handshake. Never interpreted by the trust engine, only passed along.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AuthType(Cow<'static, str>);

impl AuthType {
    /// Peer authenticated with an RSA key.
    pub const RSA: AuthType = AuthType(Cow::Borrowed(key_types::RSA));
    /// Peer authenticated with an ECDSA key.
    pub const EC: AuthType = AuthType(Cow::Borrowed(key_types::EC));
    /// Peer authenticated with an Ed25519 key.
    pub const ED25519: AuthType = AuthType(Cow::Borrowed(key_types::ED25519));
    /// The key algorithm of the peer could not be determined.
    pub const UNKNOWN: AuthType = AuthType(Cow::Borrowed("UNKNOWN"));

    /// Wrap an arbitrary algorithm family name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// The algorithm family name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for AuthType {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

/// Outcome of a failed [`TrustEvaluator`] check.
#[derive(Debug, Error)]
pub enum TrustError {
    /// The evaluator does not trust the chain. A composite moves on to the
    /// next evaluator when it sees this.
    #[error("certificate chain rejected: {0}")]
    Rejected(rustls::Error),
    /// The evaluator is unusable as configured.
    #[error("trust evaluator misconfigured: {0}")]
    Configuration(String),
    /// Any other failure that says nothing about the trustworthiness of
    /// the chain itself.
    #[error("{0}")]
    Internal(rustls::Error),
}

impl TrustError {
    /// Whether this is an ordinary "not trusted" verdict.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Convert into the error reported to the rustls handshake.
    pub fn into_rustls(self) -> rustls::Error {
        match self {
            Self::Rejected(e) | Self::Internal(e) => e,
            Self::Configuration(msg) => rustls::Error::General(msg),
        }
    }
}

/// Something that can judge certificate chains presented by peers.
///
/// Chains are ordered leaf first and are never modified.
pub trait TrustEvaluator: Send + Sync + std::fmt::Debug {
    /// Decide whether a client presenting `chain` should be trusted.
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError>;

    /// Decide whether a server presenting `chain` should be trusted.
    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError>;

    /// Certificates of the issuers this evaluator accepts.
    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>>;
}

/// Reaction to a chain that no evaluator of a
/// [`crate::CompositeTrustEvaluator`] trusts.
///
/// Whatever the hook returns becomes the result of the composite check:
/// `Ok(())` lets the handshake proceed, an error aborts it. See
/// [`crate::NoopStrategy`] and [`crate::RejectUntrusted`].
pub trait TrustEvaluationStrategy: Send + Sync {
    /// Called once per client chain that no evaluator trusts.
    fn on_client_trust_failure(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
    ) -> Result<(), TrustError>;

    /// Called once per server chain that no evaluator trusts.
    fn on_server_trust_failure(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
    ) -> Result<(), TrustError>;
}

/// Caller-supplied predicate that pre-approves a server chain without
/// consulting the trust store it is attached to.
pub trait TrustOverride: Send + Sync {
    /// Return true to trust `chain` unconditionally.
    fn is_trusted(&self, chain: &[CertificateDer<'_>], auth_type: &AuthType) -> bool;
}

impl<F> TrustOverride for F
where
    F: Fn(&[CertificateDer<'_>], &AuthType) -> bool + Send + Sync,
{
    fn is_trusted(&self, chain: &[CertificateDer<'_>], auth_type: &AuthType) -> bool {
        self(chain, auth_type)
    }
}

/// Box a closure as a [`TrustOverride`].
pub fn trust_override<F>(f: F) -> Arc<dyn TrustOverride>
where
    F: Fn(&[CertificateDer<'_>], &AuthType) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Whatever is known about the connection an identity is being chosen for.
///
/// Handshake paths without a concrete transport handle pass no context at
/// all rather than an empty one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionContext<'a> {
    /// Server Name Indication sent by the client.
    pub server_name: Option<&'a str>,
    /// Address of the remote peer.
    pub peer_addr: Option<SocketAddr>,
}

/// One identity eligible for selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasCandidate {
    /// Name of the identity within its provider.
    pub alias: String,
    /// Key type the alias was offered for.
    pub key_type: String,
    /// Certificate chain of the identity, leaf first, if the provider has one.
    pub chain: Option<Vec<CertificateDer<'static>>>,
}

/// Every candidate identity for one selection, keyed by alias.
pub type AliasTable = HashMap<String, AliasCandidate>;

/// Picks one identity out of the candidates gathered by an
/// [`crate::IdentityDelegate`].
///
/// The table is not pre-filtered beyond what the provider did, so any
/// further preference (issuer, key type, name) is up to the policy.
pub trait AliasSelectionPolicy: Send + Sync {
    /// Choose an alias from `aliases`, or none.
    fn choose_alias(
        &self,
        aliases: &AliasTable,
        context: Option<&ConnectionContext<'_>>,
    ) -> Option<String>;
}

impl<F> AliasSelectionPolicy for F
where
    F: Fn(&AliasTable, Option<&ConnectionContext<'_>>) -> Option<String> + Send + Sync,
{
    fn choose_alias(
        &self,
        aliases: &AliasTable,
        context: Option<&ConnectionContext<'_>>,
    ) -> Option<String> {
        self(aliases, context)
    }
}

/// Box a closure as an [`AliasSelectionPolicy`].
pub fn alias_policy<F>(f: F) -> Arc<dyn AliasSelectionPolicy>
where
    F: Fn(&AliasTable, Option<&ConnectionContext<'_>>) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Source of local identities: certificate chains with their signing keys,
/// each known by an alias.
///
/// Key types are names such as those in [`key_types`]. Issuers are the
/// distinguished names of certificate authorities acceptable to the peer;
/// an empty list means no preference.
pub trait KeyMaterialProvider: Send + Sync + std::fmt::Debug {
    /// Aliases usable for client authentication with `key_type`.
    fn client_aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String>;

    /// Aliases usable for serving with `key_type`.
    fn server_aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String>;

    /// Choose the identity a client presents.
    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: &[DistinguishedName],
        context: Option<&ConnectionContext<'_>>,
    ) -> Option<String>;

    /// Choose the identity a server presents.
    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: &[DistinguishedName],
        context: Option<&ConnectionContext<'_>>,
    ) -> Option<String>;

    /// Client identity choice for handshakes that run without a transport
    /// handle.
    fn choose_engine_client_alias(
        &self,
        key_types: &[&str],
        issuers: &[DistinguishedName],
    ) -> Option<String> {
        self.choose_client_alias(key_types, issuers, None)
    }

    /// Server identity choice for handshakes that run without a transport
    /// handle.
    fn choose_engine_server_alias(
        &self,
        key_type: &str,
        issuers: &[DistinguishedName],
    ) -> Option<String> {
        self.choose_server_alias(key_type, issuers, None)
    }

    /// Certificate chain of `alias`, leaf first.
    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>>;

    /// Signing key of `alias`.
    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>>;
}
