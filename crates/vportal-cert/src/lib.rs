//! Credential issuance for VPN clients
//!
//! OpenVPN clients receive a short-lived X.509 client certificate signed by
//! the portal CA, plus the per-profile tls-crypt key. WireGuard clients bring
//! their own key pair; the portal only hands back the server public key.

pub mod ca;
pub mod error;
pub mod issuer;
pub mod tls_crypt;
pub mod wireguard;

pub use ca::{CaInfo, CertificateAuthority, ClientCertificate};
pub use error::CertError;
pub use issuer::{CredentialIssuer, PeerRegistration};
pub use tls_crypt::TlsCrypt;
pub use wireguard::{read_server_public_key, server_public_key_path};
