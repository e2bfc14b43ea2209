//! Per-profile OpenVPN tls-crypt keys

use dashmap::DashMap;
use rand::RngCore;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::ca::write_private;
use crate::error::CertError;

const KEY_SIZE: usize = 256;
const BEGIN_MARKER: &str = "-----BEGIN OpenVPN Static key V1-----";
const END_MARKER: &str = "-----END OpenVPN Static key V1-----";

/// Loads `tls-crypt-<profile_id>.key` from the key directory, creating it
/// on first use. Keys are cached after the first read.
#[derive(Debug)]
pub struct TlsCrypt {
    key_dir: PathBuf,
    keys: DashMap<String, String>,
    create: Mutex<()>,
}

impl TlsCrypt {
    pub fn new(key_dir: impl Into<PathBuf>) -> Self {
        Self {
            key_dir: key_dir.into(),
            keys: DashMap::new(),
            create: Mutex::new(()),
        }
    }

    /// tls-crypt key of `profile_id` in OpenVPN static key format
    pub async fn get(&self, profile_id: &str) -> Result<String, CertError> {
        if let Some(key) = self.keys.get(profile_id) {
            return Ok(key.clone());
        }

        // Serializes first use so two callers never create different keys
        let _guard = self.create.lock().await;
        if let Some(key) = self.keys.get(profile_id) {
            return Ok(key.clone());
        }

        let key = self.load_or_create(profile_id).await?;
        self.keys.insert(profile_id.to_string(), key.clone());
        Ok(key)
    }

    fn key_path(&self, profile_id: &str) -> PathBuf {
        self.key_dir.join(format!("tls-crypt-{}.key", profile_id))
    }

    async fn load_or_create(&self, profile_id: &str) -> Result<String, CertError> {
        let path = self.key_path(profile_id);

        match fs::read_to_string(&path).await {
            Ok(contents) => {
                validate(&path, &contents)?;
                Ok(contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = generate();
                fs::create_dir_all(&self.key_dir)
                    .await
                    .map_err(|e| CertError::io(&self.key_dir, e))?;
                write_private(&path, &key).await?;
                info!(profile_id = %profile_id, path = %path.display(), "Generated tls-crypt key");
                Ok(key)
            }
            Err(e) => Err(CertError::io(&path, e)),
        }
    }
}

/// 2048 bit static key, 16 hex lines of 16 bytes each
fn generate() -> String {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut out = String::new();
    out.push_str("#\n# 2048 bit OpenVPN static key\n#\n");
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for line in bytes.chunks(16) {
        let _ = writeln!(out, "{}", hex::encode(line));
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

fn validate(path: &Path, contents: &str) -> Result<(), CertError> {
    if contents.contains(BEGIN_MARKER) && contents.contains(END_MARKER) {
        return Ok(());
    }
    Err(CertError::InvalidKey {
        path: path.to_path_buf(),
        reason: "not an OpenVPN static key".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_format() {
        let key = generate();
        let body: Vec<_> = key
            .lines()
            .skip_while(|l| *l != BEGIN_MARKER)
            .skip(1)
            .take_while(|l| *l != END_MARKER)
            .collect();
        assert_eq!(body.len(), 16);
        assert!(body.iter().all(|l| l.len() == 32));
    }

    #[tokio::test]
    async fn test_key_is_created_once_per_profile() {
        let dir = tempfile::tempdir().unwrap();
        let tls_crypt = TlsCrypt::new(dir.path());

        let first = tls_crypt.get("default").await.unwrap();
        assert!(dir.path().join("tls-crypt-default.key").exists());
        assert_eq!(tls_crypt.get("default").await.unwrap(), first);

        // A fresh instance reads the same file back
        let reloaded = TlsCrypt::new(dir.path());
        assert_eq!(reloaded.get("default").await.unwrap(), first);

        assert_ne!(tls_crypt.get("other").await.unwrap(), first);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tls_crypt = TlsCrypt::new(dir.path());
        tls_crypt.get("default").await.unwrap();

        let mode = std::fs::metadata(dir.path().join("tls-crypt-default.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_invalid_key_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tls-crypt-bad.key"), "garbage").unwrap();

        let tls_crypt = TlsCrypt::new(dir.path());
        assert!(matches!(
            tls_crypt.get("bad").await,
            Err(CertError::InvalidKey { .. })
        ));
    }
}
