//! Small certificate inspections used for logging, root hints and issuer
//! filtering. Trust decisions never depend on these.

use rustls::DistinguishedName;
use rustls::pki_types::CertificateDer;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;

use crate::api::AuthType;

const OID_ED25519: &str = "1.3.101.112";

fn parse<'a>(cert: &'a CertificateDer<'_>) -> Option<X509Certificate<'a>> {
    X509Certificate::from_der(cert.as_ref())
        .ok()
        .map(|(_, parsed)| parsed)
}

/// Authentication type implied by the public key of `cert`.
pub(crate) fn auth_type_for(cert: &CertificateDer<'_>) -> AuthType {
    let Some(parsed) = parse(cert) else {
        return AuthType::UNKNOWN;
    };
    let spki = parsed.public_key();
    match spki.parsed() {
        Ok(PublicKey::RSA(_)) => AuthType::RSA,
        Ok(PublicKey::EC(_)) => AuthType::EC,
        _ if spki.algorithm.algorithm.to_id_string() == OID_ED25519 => AuthType::ED25519,
        _ => AuthType::UNKNOWN,
    }
}

/// Human readable subject of the leaf of `chain`.
pub(crate) fn leaf_subject(chain: &[CertificateDer<'_>]) -> String {
    match chain.first() {
        None => "<empty chain>".into(),
        Some(leaf) => parse(leaf)
            .map(|c| c.subject().to_string())
            .unwrap_or_else(|| "<unparsable>".into()),
    }
}

/// Subject of `cert` in the form used for TLS root hints.
pub(crate) fn subject_dn(cert: &CertificateDer<'_>) -> Option<DistinguishedName> {
    subject_raw(cert).map(DistinguishedName::from)
}

pub(crate) fn subject_raw(cert: &CertificateDer<'_>) -> Option<Vec<u8>> {
    parse(cert).map(|c| c.subject().as_raw().to_vec())
}

/// Raw DER encoding of the issuer name of `cert`.
pub(crate) fn issuer_raw(cert: &CertificateDer<'_>) -> Option<Vec<u8>> {
    parse(cert).map(|c| c.issuer().as_raw().to_vec())
}
