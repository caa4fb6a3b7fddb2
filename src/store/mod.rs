//! Encrypted Credential Store
//!
//! Persists one encrypted file per (provider, profile) under a private
//! directory. The key is derived from machine facts with PBKDF2 and a salt
//! kept beside the files in `store.key`, so only this machine and user can
//! read the store back.
//!
//! ## Layout
//!
//! ```text
//! ~/.lornu/credentials/        (0700)
//! ├── store.key                (0600, 16-byte salt)
//! ├── aws_default.enc          (0600, nonce || AES-256-GCM ciphertext)
//! └── gcp_staging.enc
//! ```

pub mod crypto;

use crate::cloud::{CloudProvider, Credentials};
use crypto::{MachineIdentity, StoreCipher, SALT_LEN};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const KEY_FILE: &str = "store.key";
const DEFAULT_PROFILE: &str = "default";

/// Errors from the credential store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Decryption failed: wrong key, or the file was altered
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("No stored credentials for {provider} profile '{profile}'")]
    NotFound { provider: CloudProvider, profile: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// File-backed, encrypted credential storage
#[derive(Debug)]
pub struct CredentialStore {
    dir: PathBuf,
    cipher: StoreCipher,
}

impl CredentialStore {
    /// Open (or create) a store in `dir` using this machine's identity
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_identity(dir, &MachineIdentity::current())
    }

    /// Open a store with an explicit machine identity
    pub fn with_identity(dir: impl Into<PathBuf>, identity: &MachineIdentity) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        set_mode(&dir, 0o700)?;

        let salt = load_or_create_salt(&dir.join(KEY_FILE), identity)?;
        let cipher = StoreCipher::derive(&identity.password(), &salt)?;
        debug!(dir = %dir.display(), "Opened credential store");
        Ok(Self { dir, cipher })
    }

    /// `~/.lornu/credentials`
    pub fn default_location() -> Result<PathBuf> {
        home::home_dir()
            .map(|home| home.join(".lornu").join("credentials"))
            .ok_or_else(|| StoreError::KeyDerivation("cannot determine home directory".to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, provider: CloudProvider, profile: &str) -> PathBuf {
        let profile = if profile.is_empty() { DEFAULT_PROFILE } else { profile };
        self.dir.join(format!("{}_{}.enc", provider, profile))
    }

    /// Encrypt and write credentials, replacing any previous file
    pub fn store(
        &self,
        provider: CloudProvider,
        profile: &str,
        credentials: &Credentials,
    ) -> Result<PathBuf> {
        let plaintext = serde_json::to_vec(credentials)?;
        let sealed = self.cipher.encrypt(&plaintext)?;

        let path = self.file_for(provider, profile);
        let tmp = path.with_extension("enc.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            set_mode(&tmp, 0o600)?;
            file.write_all(&sealed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        info!(provider = %provider, profile = %profile, "Stored credentials");
        Ok(path)
    }

    pub fn retrieve(&self, provider: CloudProvider, profile: &str) -> Result<Credentials> {
        let path = self.file_for(provider, profile);
        let sealed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    provider,
                    profile: profile.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let plaintext = self.cipher.decrypt(&sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    pub fn delete(&self, provider: CloudProvider, profile: &str) -> Result<()> {
        match fs::remove_file(self.file_for(provider, profile)) {
            Ok(()) => {
                info!(provider = %provider, profile = %profile, "Deleted credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                provider,
                profile: profile.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored profiles for a provider, sorted; the default profile is `""`
    pub fn list(&self, provider: CloudProvider) -> Result<Vec<String>> {
        let prefix = format!("{}_", provider);
        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            let Some(profile) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".enc"))
            else {
                continue;
            };
            if profile == DEFAULT_PROFILE {
                profiles.push(String::new());
            } else {
                profiles.push(profile.to_string());
            }
        }
        profiles.sort();
        Ok(profiles)
    }
}

fn load_or_create_salt(path: &Path, identity: &MachineIdentity) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(salt) if salt.len() == SALT_LEN => Ok(salt),
        Ok(salt) => Err(StoreError::KeyDerivation(format!(
            "{} holds {} bytes, expected {}",
            path.display(),
            salt.len(),
            SALT_LEN
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let salt = identity.salt().to_vec();
            fs::write(path, &salt)?;
            set_mode(path, 0o600)?;
            Ok(salt)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::AuthMethod;
    use chrono::{TimeZone, Utc};

    fn identity() -> MachineIdentity {
        MachineIdentity {
            hostname: "test-host".to_string(),
            home: "/home/tester".to_string(),
            os: "linux".to_string(),
        }
    }

    fn sample() -> Credentials {
        Credentials::new(CloudProvider::Aws, AuthMethod::IamRole)
            .keys("AKIAEXAMPLE", "secret")
            .token("session-token")
            .region("us-west-2")
            .expires_at(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
            .property("role_arn", "arn:aws:iam::123456789012:role/Deploy")
    }

    #[test]
    fn test_round_trip_reproduces_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_identity(dir.path().join("creds"), &identity()).unwrap();
        let creds = sample();
        store.store(CloudProvider::Aws, "prod", &creds).unwrap();

        let restored = store.retrieve(CloudProvider::Aws, "prod").unwrap();
        assert_eq!(
            serde_json::to_string(&restored).unwrap(),
            serde_json::to_string(&creds).unwrap()
        );
    }

    #[test]
    fn test_default_profile_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_identity(dir.path(), &identity()).unwrap();
        let path = store.store(CloudProvider::Gcp, "", &sample()).unwrap();
        assert_eq!(path.file_name().unwrap(), "gcp_default.enc");
        assert!(store.retrieve(CloudProvider::Gcp, "").is_ok());
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_identity(dir.path(), &identity()).unwrap();
        store.store(CloudProvider::Aws, "", &sample()).unwrap();
        store.store(CloudProvider::Aws, "staging", &sample()).unwrap();
        store.store(CloudProvider::Azure, "prod", &sample()).unwrap();

        assert_eq!(
            store.list(CloudProvider::Aws).unwrap(),
            vec!["".to_string(), "staging".to_string()]
        );

        store.delete(CloudProvider::Aws, "staging").unwrap();
        assert_eq!(store.list(CloudProvider::Aws).unwrap(), vec!["".to_string()]);
        assert!(matches!(
            store.delete(CloudProvider::Aws, "staging"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.retrieve(CloudProvider::Aws, "staging"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_tampered_file_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_identity(dir.path(), &identity()).unwrap();
        let path = store.store(CloudProvider::Aws, "prod", &sample()).unwrap();

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        std::fs::write(&path, data).unwrap();

        assert!(matches!(
            store.retrieve(CloudProvider::Aws, "prod"),
            Err(StoreError::Integrity(_))
        ));
    }

    #[test]
    fn test_reopen_uses_persisted_salt() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CredentialStore::with_identity(dir.path(), &identity()).unwrap();
            store.store(CloudProvider::Aws, "prod", &sample()).unwrap();
        }
        let salt = std::fs::read(dir.path().join(KEY_FILE)).unwrap();
        assert_eq!(salt, identity().salt().to_vec());

        let reopened = CredentialStore::with_identity(dir.path(), &identity()).unwrap();
        assert_eq!(reopened.retrieve(CloudProvider::Aws, "prod").unwrap(), sample());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("creds");
        let store = CredentialStore::with_identity(&root, &identity()).unwrap();
        let path = store.store(CloudProvider::Aws, "prod", &sample()).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&root), 0o700);
        assert_eq!(mode(&path), 0o600);
        assert_eq!(mode(&root.join(KEY_FILE)), 0o600);
    }
}
