//! Trust and key material read from PEM files on disk.
//!
//! # Command line flags
//!
//! | Flag                           | Default   | Meaning                 |
//! |--------------------------------|-----------|-------------------------|
//! | `--trust-store`                | None      | File of PEM-format X.509 trust anchors. Repeat for each independent store. |
//! | `--key-path`                   | None      | File containing the PEM-format private key of the local identity |
//! | `--cert-path`                  | None      | File containing the PEM-format certificate chain of the local identity |
//! | `--key-alias`                  | `default` | Alias under which the local identity is registered |
//! | `--no-endpoint-identification` | false     | Do not check server names after trust evaluation |
//! | `--reject-untrusted`           | false     | Fail handshakes with peers no trust store accepts |
//!
//! Without `--reject-untrusted`, a peer that no store trusts is only logged
//! and the handshake continues; see [`crate::NoopStrategy`].
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io::{BufRead, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::{AliasSelectionPolicy, TrustOverride};
use crate::composite::RejectUntrusted;
use crate::context::{ContextAssembler, MultiTrustTlsError};
use crate::store::StaticKeyStore;

/// Command line arguments for [`ContextAssembler::from_args`].
#[derive(clap::Args, Debug)]
#[group(id = "multitrust_tls_args")]
pub struct Args {
    #[arg(
        long,
        help = "Path to a trust store of PEM-format certificates. May be repeated; a peer is trusted if any store trusts it."
    )]
    trust_store: Vec<PathBuf>,

    #[arg(
        long,
        help = "Path to TLS key in PEM format. If unset, secure servers cannot be configured."
    )]
    key_path: Option<PathBuf>,

    #[arg(
        long,
        help = "Path to TLS certificate chain in PEM format. If unset, secure servers cannot be configured."
    )]
    cert_path: Option<PathBuf>,

    #[arg(
        long,
        default_value = "default",
        help = "Alias of the identity loaded from --key-path and --cert-path."
    )]
    key_alias: String,

    #[arg(
        long,
        help = "Accept server certificates that do not match the name connected to."
    )]
    no_endpoint_identification: bool,

    #[arg(
        long,
        help = "Refuse peers that no --trust-store accepts. Otherwise they are only logged."
    )]
    reject_untrusted: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            trust_store: Vec::new(),
            key_path: None,
            cert_path: None,
            key_alias: String::from("default"),
            no_endpoint_identification: false,
            reject_untrusted: false,
        }
    }
}

/// Every certificate in a PEM stream, in order.
pub fn load_certificates(
    pem: &mut dyn BufRead,
) -> Result<Vec<CertificateDer<'static>>, MultiTrustTlsError> {
    Ok(rustls_pemfile::certs(pem).collect::<Result<Vec<_>, _>>()?)
}

/// The first private key in the PEM file at `path`.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, MultiTrustTlsError> {
    let pem = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut Cursor::new(&pem))?
        .ok_or_else(|| MultiTrustTlsError::NoPrivateKey(path.to_path_buf()))
}

impl ContextAssembler {
    /// A new assembler configured from command line flags.
    pub fn from_args(args: &Args) -> Result<Self, MultiTrustTlsError> {
        Self::new().with_args(args)
    }

    /// Load everything named by `args` into this assembler. Trust stores
    /// are registered in the order their flags were given.
    pub fn with_args(mut self, args: &Args) -> Result<Self, MultiTrustTlsError> {
        if args.reject_untrusted {
            self = self.with_trust_strategy(Arc::new(RejectUntrusted));
        }
        let mut assembler = args.trust_store.iter().try_fold(self, |a, path| {
            a.load_trust_material_from_file(path, None)
        })?;
        assembler = match (&args.key_path, &args.cert_path) {
            (Some(key_path), Some(cert_path)) => assembler.load_key_material_from_files(
                args.key_alias.as_str(),
                key_path,
                cert_path,
                None,
            )?,
            (None, None) => assembler,
            _ => return Err(MultiTrustTlsError::MissingKeyFlags),
        };
        Ok(assembler.with_endpoint_identification(!args.no_endpoint_identification))
    }

    /// Add a trust store made of every certificate in a PEM stream.
    pub fn load_trust_material_from_pem(
        self,
        pem: &mut dyn BufRead,
        trust_override: Option<Arc<dyn TrustOverride>>,
    ) -> Result<Self, MultiTrustTlsError> {
        let anchors = load_certificates(pem)?;
        if anchors.is_empty() {
            log::warn!("No trust anchors loaded from PEM input");
        }
        self.load_trust_anchors(anchors, trust_override)
    }

    /// Add a trust store made of every certificate in the PEM file at `path`.
    pub fn load_trust_material_from_file(
        self,
        path: impl AsRef<Path>,
        trust_override: Option<Arc<dyn TrustOverride>>,
    ) -> Result<Self, MultiTrustTlsError> {
        let path = path.as_ref();
        let pem = std::fs::read(path)?;
        let anchors = load_certificates(&mut Cursor::new(&pem))?;
        if anchors.is_empty() {
            log::warn!("No trust anchors loaded from file {}", path.display());
        }
        self.load_trust_anchors(anchors, trust_override)
    }

    /// Add a key store holding the single identity found in `key_path`
    /// and `cert_path`, registered as `alias`.
    pub fn load_key_material_from_files(
        self,
        alias: impl Into<String>,
        key_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        policy: Option<Arc<dyn AliasSelectionPolicy>>,
    ) -> Result<Self, MultiTrustTlsError> {
        let cert_path = cert_path.as_ref();
        let pem = std::fs::read(cert_path)?;
        let chain = load_certificates(&mut Cursor::new(&pem))?;
        if chain.is_empty() {
            return Err(MultiTrustTlsError::NoCertificates(cert_path.to_path_buf()));
        }
        let key = self
            .crypto_provider()
            .key_provider
            .load_private_key(load_private_key(key_path.as_ref())?)?;
        let store = StaticKeyStore::new().with_identity(alias, chain, key);
        Ok(self.load_key_material(Arc::new(store), policy))
    }
}
