//! Key derivation and authenticated encryption for stored credentials

use super::StoreError;
// aes-gcm relies on generic-array 0.14, so suppress the upstream deprecation locally.
#[allow(deprecated)]
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use sha2::{Digest, Sha256};
use std::path::Path;

pub const PBKDF2_ROUNDS: u32 = 10_000;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Facts about the current machine that seed the store key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineIdentity {
    pub hostname: String,
    pub home: String,
    pub os: String,
}

impl MachineIdentity {
    pub fn current() -> Self {
        let home = home::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            hostname: hostname(),
            home,
            os: std::env::consts::OS.to_string(),
        }
    }

    /// SHA-256 of `hostname:home:os`, first 16 bytes
    pub fn salt(&self) -> [u8; SALT_LEN] {
        let digest = Sha256::digest(format!("{}:{}:{}", self.hostname, self.home, self.os));
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&digest[..SALT_LEN]);
        salt
    }

    /// `lornu-access-{hostname}-{home basename}-{os}`
    pub fn password(&self) -> String {
        let home_name = Path::new(&self.home)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("lornu-access-{}-{}-{}", self.hostname, home_name, self.os)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// AES-256-GCM cipher keyed by PBKDF2-HMAC-SHA256
pub struct StoreCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for StoreCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCipher").finish_non_exhaustive()
    }
}

impl StoreCipher {
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self, StoreError> {
        if salt.len() != SALT_LEN {
            return Err(StoreError::KeyDerivation(format!(
                "salt must be {} bytes, got {}",
                SALT_LEN,
                salt.len()
            )));
        }
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt with a fresh random nonce; output is `nonce || ciphertext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| StoreError::Integrity("encryption failed".to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    #[allow(deprecated)]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StoreError> {
        if data.len() <= NONCE_LEN {
            return Err(StoreError::Integrity("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Integrity("authentication tag mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> MachineIdentity {
        MachineIdentity {
            hostname: "build-01".to_string(),
            home: "/home/lornu".to_string(),
            os: "linux".to_string(),
        }
    }

    #[test]
    fn test_salt_and_password_are_stable() {
        let id = identity();
        assert_eq!(id.salt(), id.salt());
        assert_eq!(id.password(), "lornu-access-build-01-lornu-linux");

        let other = MachineIdentity {
            hostname: "build-02".to_string(),
            ..identity()
        };
        assert_ne!(id.salt(), other.salt());
    }

    #[test]
    fn test_os_changes_the_key() {
        let linux = identity();
        let mac = MachineIdentity {
            os: "macos".to_string(),
            ..identity()
        };
        assert_ne!(linux.password(), mac.password());
        assert_ne!(linux.salt(), mac.salt());

        // same salt, so only the password differs
        let salt = linux.salt();
        let sealed = StoreCipher::derive(&linux.password(), &salt)
            .unwrap()
            .encrypt(b"secret")
            .unwrap();
        let other = StoreCipher::derive(&mac.password(), &salt).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_nonce_is_fresh_per_write() {
        let id = identity();
        let cipher = StoreCipher::derive(&id.password(), &id.salt()).unwrap();
        let a = cipher.encrypt(b"secret").unwrap();
        let b = cipher.encrypt(b"secret").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_eq!(cipher.decrypt(&a).unwrap(), b"secret");
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let id = identity();
        let cipher = StoreCipher::derive(&id.password(), &id.salt()).unwrap();
        let other = StoreCipher::derive("another-password", &id.salt()).unwrap();
        let sealed = cipher.encrypt(b"secret").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(StoreError::Integrity(_))));
        assert!(matches!(cipher.decrypt(&sealed[..4]), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn test_bad_salt_length() {
        assert!(matches!(
            StoreCipher::derive("pw", &[0u8; 8]),
            Err(StoreError::KeyDerivation(_))
        ));
    }
}
