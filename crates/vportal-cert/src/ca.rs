//! Portal certificate authority
//!
//! The CA certificate and key live in `<key-dir>/ca/ca.crt` and
//! `<key-dir>/ca/ca.key`. They are generated on first start.

use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::error::CertError;

const CA_CERT_FILE: &str = "ca.crt";
const CA_KEY_FILE: &str = "ca.key";
const CA_COMMON_NAME: &str = "VPN CA";
const CA_LIFETIME_DAYS: i64 = 5 * 365;

/// Public information about the CA certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaInfo {
    pub pem: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    fingerprint: [u8; 32],
}

impl CaInfo {
    /// Extract validity and fingerprint from the first certificate of a PEM document
    pub fn from_pem(pem: &str) -> Result<Self, CertError> {
        let der = rustls_pemfile::certs(&mut pem.as_bytes())
            .next()
            .ok_or_else(|| CertError::Parse("no certificate found in PEM".to_string()))?
            .map_err(|e| CertError::Parse(e.to_string()))?;

        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| CertError::Parse(e.to_string()))?;

        let validity = cert.validity();
        let valid_from = timestamp(validity.not_before.timestamp())?;
        let valid_to = timestamp(validity.not_after.timestamp())?;

        Ok(Self {
            pem: pem.to_string(),
            valid_from,
            valid_to,
            fingerprint: Sha256::digest(der.as_ref()).into(),
        })
    }

    /// SHA-256 fingerprint of the DER certificate, lowercase hex
    ///
    /// With `human` set the digest is split into space separated groups of
    /// four characters, for reading it out over the phone.
    pub fn fingerprint(&self, human: bool) -> String {
        let hex = hex::encode(self.fingerprint);
        if !human {
            return hex;
        }
        hex.as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A freshly issued client certificate and its private key
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    pub common_name: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
    info: CaInfo,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("valid_from", &self.info.valid_from)
            .field("valid_to", &self.info.valid_to)
            .field("fingerprint", &self.info.fingerprint(false))
            .finish()
    }
}

impl CertificateAuthority {
    /// Load the CA from `<key_dir>/ca`, generating it when absent
    pub async fn load_or_generate(key_dir: &Path) -> Result<Self, CertError> {
        let ca_dir = key_dir.join("ca");
        let cert_path = ca_dir.join(CA_CERT_FILE);
        let key_path = ca_dir.join(CA_KEY_FILE);

        if fs::try_exists(&cert_path)
            .await
            .map_err(|e| CertError::io(&cert_path, e))?
        {
            let cert_pem = fs::read_to_string(&cert_path)
                .await
                .map_err(|e| CertError::io(&cert_path, e))?;
            let key_pem = fs::read_to_string(&key_path)
                .await
                .map_err(|e| CertError::io(&key_path, e))?;

            let ca = Self::from_pem(&cert_pem, &key_pem)?;
            info!(
                path = %cert_path.display(),
                valid_to = %ca.info.valid_to,
                "Loaded CA certificate"
            );
            return Ok(ca);
        }

        let ca = Self::generate(Utc::now(), chrono::Duration::days(CA_LIFETIME_DAYS))?;

        fs::create_dir_all(&ca_dir)
            .await
            .map_err(|e| CertError::io(&ca_dir, e))?;
        fs::write(&cert_path, &ca.info.pem)
            .await
            .map_err(|e| CertError::io(&cert_path, e))?;
        write_private(&key_path, &ca.key.serialize_pem()).await?;

        info!(
            path = %cert_path.display(),
            valid_to = %ca.info.valid_to,
            "Generated new CA certificate"
        );
        Ok(ca)
    }

    /// Create a new self-signed CA valid from `not_before` for `lifetime`
    pub fn generate(
        not_before: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Result<Self, CertError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_before + lifetime)?;
        params.serial_number = Some(rcgen::SerialNumber::from(rand::random::<u64>()));

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        let info = CaInfo::from_pem(&cert.pem())?;

        Ok(Self { cert, key, info })
    }

    /// Rebuild the CA from its PEM encoded certificate and private key
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let key = KeyPair::from_pem(key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)?;
        // Re-signing with the same key and subject yields an equivalent issuer
        let cert = params.self_signed(&key)?;
        let info = CaInfo::from_pem(cert_pem)?;

        Ok(Self { cert, key, info })
    }

    pub fn info(&self) -> &CaInfo {
        &self.info
    }

    /// Issue a client certificate for `common_name`
    ///
    /// `not_after` is clamped to the CA's own expiry.
    pub fn issue_client_certificate(
        &self,
        common_name: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<ClientCertificate, CertError> {
        let not_after = not_after.min(self.info.valid_to);
        if not_after <= not_before {
            return Err(CertError::InvalidValidity(format!(
                "not_after {} is not later than not_before {}",
                not_after, not_before
            )));
        }

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.use_authority_key_identifier_extension = true;
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.serial_number = Some(rcgen::SerialNumber::from(rand::random::<u64>()));

        let key = KeyPair::generate()?;
        let cert = params.signed_by(&key, &self.cert, &self.key)?;

        debug!(common_name = %common_name, not_after = %not_after, "Issued client certificate");

        Ok(ClientCertificate {
            common_name: common_name.to_string(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            not_before,
            not_after,
        })
    }
}

fn to_offset(dt: DateTime<Utc>) -> Result<time::OffsetDateTime, CertError> {
    time::OffsetDateTime::from_unix_timestamp(dt.timestamp())
        .map_err(|e| CertError::InvalidValidity(e.to_string()))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CertError::Parse(format!("timestamp {} out of range", secs)))
}

/// Write a file readable by the owner only
pub(crate) async fn write_private(path: &Path, contents: &str) -> Result<(), CertError> {
    fs::write(path, contents)
        .await
        .map_err(|e| CertError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| CertError::io(path, e))?;
    }

    Ok(())
}
