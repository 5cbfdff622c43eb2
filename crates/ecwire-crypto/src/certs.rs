//! Self-signed root CA generation.
//!
//! A standalone demo: the handshake never consults these certificates.
//!
//! Requires the `certs` feature to be enabled.

use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose, SerialNumber,
};
use time::{Duration, OffsetDateTime};

/// Default validity period for generated CA certificates.
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Serial number stamped on the root certificate.
pub const CA_SERIAL: u64 = 1000;

/// Distinguished name of the root.
#[derive(Debug, Clone)]
pub struct CaSubject {
    pub country: String,
    pub state: String,
    pub organization: String,
    pub common_name: String,
}

impl Default for CaSubject {
    fn default() -> Self {
        Self {
            country: "UA".to_string(),
            state: "Kyiv".to_string(),
            organization: "Simple CA".to_string(),
            common_name: "Simple Root CA".to_string(),
        }
    }
}

/// PEM-encoded root CA material.
pub struct CaBundle {
    /// PEM-encoded self-signed certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
}

/// Certificate generation errors.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    /// An error occurred during certificate generation or signing.
    #[error("Certificate generation error: {0}")]
    Generation(String),
}

/// Generate a self-signed ECDSA P-256 / SHA-256 root certificate.
///
/// Subject and issuer are identical. Validity starts now and lasts
/// `validity_days`.
pub fn create_ca(subject: &CaSubject, validity_days: u32) -> Result<CaBundle, CertError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CountryName, subject.country.as_str());
    params
        .distinguished_name
        .push(DnType::StateOrProvinceName, subject.state.as_str());
    params
        .distinguished_name
        .push(DnType::OrganizationName, subject.organization.as_str());
    params
        .distinguished_name
        .push(DnType::CommonName, subject.common_name.as_str());
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);
    params.serial_number = Some(SerialNumber::from(CA_SERIAL));

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(i64::from(validity_days));

    let key_pair = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(CaBundle {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn create_ca_produces_valid_pem() {
        let ca = create_ca(&CaSubject::default(), DEFAULT_VALIDITY_DAYS).unwrap();
        assert!(ca.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.cert_pem.contains("END CERTIFICATE"));
        assert!(ca.key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn each_ca_has_its_own_key() {
        let a = create_ca(&CaSubject::default(), 1).unwrap();
        let b = create_ca(&CaSubject::default(), 1).unwrap();
        assert_ne!(a.key_pem, b.key_pem);
        assert_ne!(a.cert_pem, b.cert_pem);
    }
}
