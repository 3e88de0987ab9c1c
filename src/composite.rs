//! Union trust over several independent [`TrustEvaluator`]s.
//!
//! Standard TLS stacks consult a single trust store per context. A
//! [`CompositeTrustEvaluator`] instead asks each of its evaluators in
//! registration order and trusts a chain as soon as one of them does.
//! Individual rejections are expected and are not reported; when every
//! evaluator rejects, a [`TrustEvaluationStrategy`] decides what happens.
//!
//! The default strategy, [`NoopStrategy`], does nothing and so lets the
//! handshake proceed. That is deliberate: the composite only provides
//! multi-source trust plus a hook, and enforcement is opt-in through
//! [`RejectUntrusted`] or a custom strategy.

use rustls::CertificateError;
use rustls::pki_types::{CertificateDer, UnixTime};
use std::sync::Arc;

use crate::api::{AuthType, TrustError, TrustEvaluationStrategy, TrustEvaluator};
use crate::certs::leaf_subject;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Strategy that ignores trust failures.
///
/// With this strategy a chain trusted by no evaluator is still accepted
/// at this level; any rejection has to come from checks performed after
/// trust evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStrategy;

impl TrustEvaluationStrategy for NoopStrategy {
    fn on_client_trust_failure(
        &self,
        _: &[CertificateDer<'_>],
        _: &AuthType,
    ) -> Result<(), TrustError> {
        Ok(())
    }

    fn on_server_trust_failure(
        &self,
        _: &[CertificateDer<'_>],
        _: &AuthType,
    ) -> Result<(), TrustError> {
        Ok(())
    }
}

/// Strategy that fails the check with
/// [`rustls::CertificateError::UnknownIssuer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectUntrusted;

impl RejectUntrusted {
    fn reject() -> Result<(), TrustError> {
        Err(TrustError::Rejected(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        )))
    }
}

impl TrustEvaluationStrategy for RejectUntrusted {
    fn on_client_trust_failure(
        &self,
        _: &[CertificateDer<'_>],
        _: &AuthType,
    ) -> Result<(), TrustError> {
        Self::reject()
    }

    fn on_server_trust_failure(
        &self,
        _: &[CertificateDer<'_>],
        _: &AuthType,
    ) -> Result<(), TrustError> {
        Self::reject()
    }
}

#[cfg(feature = "metrics")]
mod metrics {
    use lazy_static::lazy_static;
    use prometheus::{IntCounterVec, register_int_counter_vec};

    lazy_static! {
        pub(super) static ref TLS_TRUST_EVALUATIONS: IntCounterVec = register_int_counter_vec!(
            "tls_trust_evaluations_total",
            "Composite TLS trust evaluations by peer role and outcome",
            &["role", "outcome"]
        )
        .unwrap();
    }

    pub(super) fn record(role: super::Role, trusted: bool) {
        TLS_TRUST_EVALUATIONS
            .with_label_values(&[role.as_str(), if trusted { "trusted" } else { "untrusted" }])
            .inc();
    }
}

/// A [`TrustEvaluator`] that trusts whatever any one of its evaluators
/// trusts.
///
/// Evaluators are consulted in the order given to [`Self::new`] and the
/// first acceptance ends the search. A [`TrustError::Rejected`] from one
/// evaluator only moves the search along; any other error is returned
/// immediately because it points at a broken evaluator rather than an
/// untrusted chain. If nobody accepts, a warning is logged and the
/// matching strategy hook runs exactly once with the original arguments;
/// its result is the result of the check.
pub struct CompositeTrustEvaluator {
    evaluators: Arc<[Arc<dyn TrustEvaluator>]>,
    strategy: Arc<dyn TrustEvaluationStrategy>,
}

impl std::fmt::Debug for CompositeTrustEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTrustEvaluator")
            .field("evaluators", &self.evaluators)
            .finish_non_exhaustive()
    }
}

impl CompositeTrustEvaluator {
    /// Combine `evaluators`, keeping their order. Without a `strategy`,
    /// [`NoopStrategy`] is used.
    pub fn new(
        strategy: Option<Arc<dyn TrustEvaluationStrategy>>,
        evaluators: impl IntoIterator<Item = Arc<dyn TrustEvaluator>>,
    ) -> Self {
        Self {
            evaluators: evaluators.into_iter().collect(),
            strategy: strategy.unwrap_or_else(|| Arc::new(NoopStrategy)),
        }
    }

    /// The wrapped evaluators in consultation order.
    pub fn evaluators(&self) -> &[Arc<dyn TrustEvaluator>] {
        &self.evaluators
    }

    fn trusted_by_any(
        &self,
        role: Role,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<bool, TrustError> {
        for (i, evaluator) in self.evaluators.iter().enumerate() {
            let verdict = match role {
                Role::Client => evaluator.check_client_trusted(chain, auth_type, now),
                Role::Server => evaluator.check_server_trusted(chain, auth_type, now),
            };
            match verdict {
                Ok(()) => return Ok(true),
                Err(TrustError::Rejected(e)) => {
                    log::debug!("{} chain rejected by trust evaluator {}: {}", role.as_str(), i, e);
                }
                Err(other) => return Err(other),
            }
        }
        Ok(false)
    }

    fn check(
        &self,
        role: Role,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        let trusted = self.trusted_by_any(role, chain, auth_type, now)?;
        #[cfg(feature = "metrics")]
        metrics::record(role, trusted);
        if trusted {
            return Ok(());
        }
        log::warn!(
            "{} certificate {} ({}) is not trusted by any of {} trust evaluators",
            role.as_str(),
            leaf_subject(chain),
            auth_type,
            self.evaluators.len(),
        );
        match role {
            Role::Client => self.strategy.on_client_trust_failure(chain, auth_type),
            Role::Server => self.strategy.on_server_trust_failure(chain, auth_type),
        }
    }
}

impl TrustEvaluator for CompositeTrustEvaluator {
    fn check_client_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        self.check(Role::Client, chain, auth_type, now)
    }

    fn check_server_trusted(
        &self,
        chain: &[CertificateDer<'_>],
        auth_type: &AuthType,
        now: UnixTime,
    ) -> Result<(), TrustError> {
        self.check(Role::Server, chain, auth_type, now)
    }

    /// Issuers of every evaluator, concatenated in evaluator order.
    /// Duplicates are kept and nothing is cached.
    fn accepted_issuers(&self) -> Vec<CertificateDer<'static>> {
        self.evaluators
            .iter()
            .flat_map(|e| e.accepted_issuers())
            .collect()
    }
}
