// Encryption Service
// AES-256-GCM sealing of secret values with a per-machine key

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::Rng;
use std::path::Path;
use zeroize::{Zeroize, Zeroizing};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

// Prefix for identifying sealed values
const SEALED_PREFIX: &str = "ENC::";

const KEY_FILE_NAME: &str = ".secret_key";

/// Seals and unseals secret strings with a machine key stored next to the data
pub struct MachineKeyCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl MachineKeyCipher {
    /// Load the machine key from `key_dir`, creating it on first use
    pub fn open(key_dir: &Path) -> Result<Self, String> {
        std::fs::create_dir_all(key_dir)
            .map_err(|e| format!("Failed to create key directory: {e}"))?;
        let key = Self::get_or_create_machine_key(key_dir)?;
        Ok(Self { key })
    }

    fn get_or_create_machine_key(key_dir: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
        let key_file = key_dir.join(KEY_FILE_NAME);

        if key_file.exists() {
            let mut key_data = std::fs::read(&key_file)
                .map_err(|e| format!("Failed to read machine key: {e}"))?;

            if key_data.len() != KEY_LEN {
                key_data.zeroize();
                return Err("Invalid machine key file".to_string());
            }

            Self::restrict_permissions(&key_file)?;

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&key_data);
            key_data.zeroize();

            Ok(key)
        } else {
            let mut rng = rand::thread_rng();
            let key = Zeroizing::new(rng.gen::<[u8; KEY_LEN]>());

            std::fs::write(&key_file, *key)
                .map_err(|e| format!("Failed to save machine key: {e}"))?;
            Self::restrict_permissions(&key_file)?;

            log::info!("[Encryption] Generated new machine key");
            Ok(key)
        }
    }

    #[cfg(unix)]
    fn restrict_permissions(key_file: &Path) -> Result<(), String> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(key_file, perms)
            .map_err(|e| format!("Failed to set key file permissions: {e}"))
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_key_file: &Path) -> Result<(), String> {
        Ok(())
    }

    /// Check if a value is sealed (has ENC:: prefix)
    pub fn is_sealed(value: &str) -> bool {
        value.starts_with(SEALED_PREFIX)
    }

    /// Encrypt a value; returns base64(nonce + ciphertext) with the ENC:: prefix
    pub fn seal(&self, plaintext: &str) -> Result<String, String> {
        if Self::is_sealed(plaintext) {
            return Ok(plaintext.to_string());
        }

        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; NONCE_LEN] = rng.gen();

        let cipher = Aes256Gcm::new_from_slice(&*self.key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| format!("Secret encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", SEALED_PREFIX, BASE64.encode(combined)))
    }

    /// Decrypt a sealed value. Unsealed input is returned unchanged.
    pub fn unseal(&self, sealed: &str) -> Result<String, String> {
        let Some(encoded) = sealed.strip_prefix(SEALED_PREFIX) else {
            return Ok(sealed.to_string());
        };

        let mut combined = BASE64.decode(encoded)
            .map_err(|e| format!("Failed to decode sealed secret: {e}"))?;

        if combined.len() < NONCE_LEN {
            combined.zeroize();
            return Err("Invalid sealed secret".to_string());
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new_from_slice(&*self.key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let decrypted = cipher.decrypt(nonce, ciphertext)
            .map_err(|e| format!("Secret decryption failed: {e}"));
        combined.zeroize();

        let mut plaintext = decrypted?;
        let result = String::from_utf8(plaintext.clone())
            .map_err(|e| format!("Invalid UTF-8 in decrypted secret: {e}"));
        plaintext.zeroize();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seal_unseal_with_persisted_key() {
        let dir = TempDir::new().unwrap();
        let cipher = MachineKeyCipher::open(dir.path()).unwrap();

        let sealed = cipher.seal("live_abc123").unwrap();
        assert!(MachineKeyCipher::is_sealed(&sealed));
        assert!(!sealed.contains("live_abc123"));

        // A second instance reads the same key file
        let reopened = MachineKeyCipher::open(dir.path()).unwrap();
        assert_eq!(reopened.unseal(&sealed).unwrap(), "live_abc123");
    }

    #[test]
    fn test_foreign_key_cannot_unseal() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let sealed = MachineKeyCipher::open(a.path()).unwrap().seal("secret").unwrap();
        assert!(MachineKeyCipher::open(b.path()).unwrap().unseal(&sealed).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        MachineKeyCipher::open(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join(KEY_FILE_NAME)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
