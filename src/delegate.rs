//! Wrappers that add caller policy to a single trust evaluator or key
//! provider without changing the capability they expose.

use rustls::DistinguishedName;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::sign::SigningKey;
use std::sync::Arc;

use crate::api::{
    AliasCandidate, AliasSelectionPolicy, AliasTable, AuthType, ConnectionContext,
    KeyMaterialProvider, TrustError, TrustEvaluator, TrustOverride,
};

/// A [`TrustEvaluator`] with an optional [`TrustOverride`] in front of it.
///
/// The override is only consulted for server chains. Client chains always
/// go through the wrapped evaluator.
pub struct TrustDelegate {
    evaluator: Arc<dyn TrustEvaluator>,
    trust_override: Option<Arc<dyn TrustOverride>>,
}

impl std::fmt::Debug for TrustDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustDelegate")
            .field("evaluator", &self.evaluator)
            .field("trust_override", &self.trust_override.is_some())
            .finish()
    }
}

impl TrustDelegate {
    /// Wrap `evaluator`.
    pub fn new(
        evaluator: Arc<dyn TrustEvaluator>,
        trust_override: Option<Arc<dyn TrustOverride>>,
    ) -> Self {
        Self {
            evaluator,
            trust_override,
        }
    }
}

impl TrustEvaluator for TrustDelegate {
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        self.evaluator.check_client_trusted(chain, auth_type, now)
    }

    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        if let Some(o) = &self.trust_override {
            if o.is_trusted(chain, auth_type) {
                return Ok(());
            }
        }
        self.evaluator.check_server_trusted(chain, auth_type, now)
    }

    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.evaluator.accepted_issuers()
    }
}

/// A [`KeyMaterialProvider`] whose alias choices are made by an
/// [`AliasSelectionPolicy`].
///
/// Every alias the wrapped provider offers for the requested key types is
/// gathered into an [`AliasTable`] together with its certificate chain and
/// the whole table goes to the policy. When two key types offer the same
/// alias, the entry from the later key type replaces the earlier one.
/// Everything other than alias choice passes straight through.
pub struct IdentityDelegate {
    provider: Arc<dyn KeyMaterialProvider>,
    policy: Arc<dyn AliasSelectionPolicy>,
}

impl std::fmt::Debug for IdentityDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDelegate")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl IdentityDelegate {
    /// Wrap `provider`, choosing aliases with `policy`.
    pub fn new(
        provider: Arc<dyn KeyMaterialProvider>,
        policy: Arc<dyn AliasSelectionPolicy>,
    ) -> Self {
        Self { provider, policy }
    }

    fn add_candidates(&self, table: &mut AliasTable, key_type: &str, aliases: Vec<String>) {
        for alias in aliases {
            let chain = self.provider.certificate_chain(&alias);
            table.insert(
                alias.clone(),
                AliasCandidate {
                    alias,
                    key_type: key_type.to_owned(),
                    chain,
                },
            );
        }
    }

    /// Candidates for client authentication across all of `key_types`.
    pub fn client_alias_table(
        &self,
        key_types: &[&str],
        issuers: &[DistinguishedName],
    ) -> AliasTable {
        let mut table = AliasTable::new();
        for key_type in key_types {
            let aliases = self.provider.client_aliases(key_type, issuers);
            self.add_candidates(&mut table, key_type, aliases);
        }
        table
    }

    /// Candidates for serving with `key_type`.
    pub fn server_alias_table(&self, key_type: &str, issuers: &[DistinguishedName]) -> AliasTable {
        let mut table = AliasTable::new();
        let aliases = self.provider.server_aliases(key_type, issuers);
        self.add_candidates(&mut table, key_type, aliases);
        table
    }
}

impl KeyMaterialProvider for IdentityDelegate {
    fn client_aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String> {
        self.provider.client_aliases(key_type, issuers)
    }

    fn server_aliases(&self, key_type: &str, issuers: &[DistinguishedName]) -> Vec<String> {
        self.provider.server_aliases(key_type, issuers)
    }

    fn choose_client_alias(
        &self,
        key_types: &[&str],
        issuers: &[DistinguishedName],
        context: Option<&ConnectionContext<'_>>,
    ) -> Option<String> {
        let table = self.client_alias_table(key_types, issuers);
        self.policy.choose_alias(&table, context)
    }

    fn choose_server_alias(
        &self,
        key_type: &str,
        issuers: &[DistinguishedName],
        context: Option<&ConnectionContext<'_>>,
    ) -> Option<String> {
        let table = self.server_alias_table(key_type, issuers);
        self.policy.choose_alias(&table, context)
    }

    fn choose_engine_client_alias(
        &self,
        key_types: &[&str],
        issuers: &[DistinguishedName],
    ) -> Option<String> {
        let table = self.client_alias_table(key_types, issuers);
        self.policy.choose_alias(&table, None)
    }

    fn choose_engine_server_alias(
        &self,
        key_type: &str,
        issuers: &[DistinguishedName],
    ) -> Option<String> {
        let table = self.server_alias_table(key_type, issuers);
        self.policy.choose_alias(&table, None)
    }

    fn certificate_chain(&self, alias: &str) -> Option<Vec<CertificateDer<'static>>> {
        self.provider.certificate_chain(alias)
    }

    fn private_key(&self, alias: &str) -> Option<Arc<dyn SigningKey>> {
        self.provider.private_key(alias)
    }
}
