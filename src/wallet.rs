//! Wallet identity generated for each user.
//!
//! An Ed25519 keypair is created with the OS RNG. The public key is kept
//! as base58 (the usual Solana address encoding) and the secret as base64.
//! The secret is wrapped in [`SecretString`] so it never appears in `Debug`
//! output or logs; the only way out is [`Wallet::export_secret`], which the
//! ledger calls from its audited export operation.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Public identifier plus secret key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub public_key: String,
    #[serde(serialize_with = "secret_serde::serialize", deserialize_with = "secret_serde::deserialize")]
    secret_key: SecretString,
}

impl Wallet {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        // Solana-style 64-byte secret: seed followed by public key.
        let mut keypair_bytes = [0u8; 64];
        keypair_bytes[..32].copy_from_slice(&signing_key.to_bytes());
        keypair_bytes[32..].copy_from_slice(verifying_key.as_bytes());

        Self {
            public_key: bs58::encode(verifying_key.as_bytes()).into_string(),
            secret_key: SecretString::new(STANDARD.encode(keypair_bytes)),
        }
    }

    /// Hand out a copy of the secret. Callers are responsible for auditing.
    pub(crate) fn export_secret(&self) -> SecretString {
        self.secret_key.clone()
    }

    #[cfg(test)]
    pub(crate) fn expose_secret_for_test(&self) -> String {
        secrecy::ExposeSecret::expose_secret(&self.secret_key).clone()
    }
}

/// Persistence needs the raw secret; nothing else does.
mod secret_serde {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SecretString::new(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_generate_produces_distinct_wallets() {
        let a = Wallet::generate();
        let b = Wallet::generate();
        assert_ne!(a.public_key, b.public_key);
        assert_ne!(a.expose_secret_for_test(), b.expose_secret_for_test());
    }

    #[test]
    fn test_public_key_is_base58_32_bytes() {
        let w = Wallet::generate();
        let decoded = bs58::decode(&w.public_key).into_vec().unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_secret_embeds_public_key() {
        let w = Wallet::generate();
        let secret = STANDARD.decode(w.expose_secret_for_test()).unwrap();
        assert_eq!(secret.len(), 64);
        let public = bs58::decode(&w.public_key).into_vec().unwrap();
        assert_eq!(&secret[32..], public.as_slice());
    }

    #[test]
    fn test_debug_is_redacted() {
        let w = Wallet::generate();
        let debug = format!("{w:?}");
        assert!(!debug.contains(&w.expose_secret_for_test()));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_secret() {
        let w = Wallet::generate();
        let json = serde_json::to_string(&w).unwrap();
        let parsed: Wallet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.public_key, w.public_key);
        assert_eq!(parsed.expose_secret_for_test(), w.expose_secret_for_test());
    }

    #[test]
    fn test_export_matches_stored_secret() {
        let w = Wallet::generate();
        assert_eq!(w.export_secret().expose_secret(), &w.expose_secret_for_test());
    }
}
