use argon2::Argon2;
use zeroize::Zeroizing;

use crate::crypto::aes::{self, KEY_SIZE, SecureKey};
use crate::error::{AppError, Result};

/// Binds key derivation to this application. Not secret.
///
/// Changing it (or the passphrase) makes every stored credential
/// undecryptable until it is re-entered by its operator.
const KDF_SALT: &[u8] = b"rcon-gate/credential-cipher/v1";

/// Derives the cipher key from a passphrase using Argon2id.
fn derive_key(passphrase: &str) -> Result<SecureKey> {
    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut key)
        .map_err(|e| AppError::Encryption(format!("Argon2 key derivation error: {}", e)))?;
    Ok(SecureKey::new(key))
}

/// Authenticated encryption of RCON credentials at rest.
pub struct CredentialCipher {
    key: SecureKey,
    ephemeral: bool,
}

impl CredentialCipher {
    /// Creates a cipher whose key is derived from a deployment-wide passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        let key = derive_key(passphrase)?;
        tracing::info!("✅ Credential cipher keyed from ENCRYPTION_KEY");
        Ok(Self {
            key,
            ephemeral: false,
        })
    }

    /// Creates a cipher with a random key that lives only as long as the process.
    ///
    /// Credentials sealed by a previous process become undecryptable.
    pub fn ephemeral() -> Self {
        tracing::warn!(
            "⚠️  ENCRYPTION_KEY is not set: using a random per-process key. \
             Stored RCON credentials will NOT survive a restart and operators \
             will have to authorize again."
        );
        Self {
            key: aes::generate_key(),
            ephemeral: true,
        }
    }

    /// Creates a cipher from an explicit key.
    pub fn from_key(key: SecureKey) -> Self {
        Self {
            key,
            ephemeral: false,
        }
    }

    /// Picks [`from_passphrase`](Self::from_passphrase) or
    /// [`ephemeral`](Self::ephemeral) depending on whether a passphrase is configured.
    pub fn from_config(passphrase: Option<&str>) -> Result<Self> {
        match passphrase {
            Some(p) if !p.is_empty() => Self::from_passphrase(p),
            _ => Ok(Self::ephemeral()),
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Seals a credential. The output differs on every call.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        aes::seal(&self.key, plaintext.as_bytes())
    }

    /// Opens a sealed credential.
    ///
    /// # Errors
    ///
    /// [`AppError::Decryption`] for a corrupted blob, a blob sealed under
    /// another key, or one that does not hold UTF-8. Callers must treat the
    /// credential as unusable and ask the operator to authorize again.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Zeroizing<String>> {
        let plaintext = Zeroizing::new(aes::open(&self.key, sealed)?);
        let text = std::str::from_utf8(&plaintext).map_err(|_| AppError::Decryption)?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
