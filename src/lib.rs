//! Multi-source TLS trust for rustls
//!
//! A TLS context normally trusts peers according to one trust store. This
//! crate lets a context trust a peer whenever ANY of several independent
//! trust stores would, for example a corporate root bundle next to a
//! partner's private CA, without merging the stores into one.
//!
//! The pieces are:
//!
//! * [`CompositeTrustEvaluator`], which consults every registered
//!   [`api::TrustEvaluator`] in order and stops at the first that trusts
//!   the chain. When none does, a pluggable
//!   [`api::TrustEvaluationStrategy`] decides what happens; the default
//!   [`NoopStrategy`] lets the handshake proceed, [`RejectUntrusted`]
//!   refuses it.
//! * [`TrustDelegate`], which lets an [`api::TrustOverride`] pre-approve
//!   specific server chains (self-signed pinning) in front of a store.
//! * [`IdentityDelegate`], which gathers every candidate identity of an
//!   [`api::KeyMaterialProvider`] and lets an
//!   [`api::AliasSelectionPolicy`] choose which one to present.
//! * [`ContextAssembler`] and [`TlsContext`], which put the above together
//!   and produce rustls client and server configurations.
//!
//! With the `files` feature (on by default) trust stores and identities
//! can be loaded from PEM files named on the command line; see
//! [`files::Args`].
//!
//! The `default-roots` feature (also on by default) adds
//! [`ContextAssembler::load_default_trust_material`], which trusts the
//! public web roots as one more store.

#![warn(missing_docs)]

pub mod api;
mod certs;
pub mod composite;
pub mod context;
pub mod crypto_provider;
pub mod delegate;
#[cfg(feature = "files")]
pub mod files;
pub mod store;
#[cfg(test)]
mod testdata;

pub use composite::{CompositeTrustEvaluator, NoopStrategy, RejectUntrusted};
pub use context::{
    ClientAuthDisabled, ClientAuthEnabled, ContextAssembler, MultiTrustTlsError, TlsContext,
};
pub use delegate::{IdentityDelegate, TrustDelegate};
pub use store::{StaticKeyStore, WebPkiTrustEvaluator};
