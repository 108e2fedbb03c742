//! RSA keypair handling
//!
//! A keypair is bound to exactly one local actor through its key id
//! (`<actor-iri>#main-key` by default). Keys are held in memory only;
//! persistence is the embedding application's concern.

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{pkcs1v15, RsaPrivateKey, RsaPublicKey};
use serde_json::json;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Default RSA modulus size for newly generated keys
pub const DEFAULT_KEY_SIZE: usize = 2048;

/// An RSA keypair owned by a local actor
#[derive(Clone)]
pub struct KeyPair {
    owner: String,
    key_id: Option<String>,
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("owner", &self.owner)
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new keypair for `owner` with the default modulus size.
    pub fn generate(owner: &str) -> Result<Self> {
        Self::generate_with_size(owner, DEFAULT_KEY_SIZE)
    }

    /// Generate a new keypair with an explicit modulus size.
    ///
    /// Smaller sizes are only appropriate for tests.
    pub fn generate_with_size(owner: &str, bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, bits).context("RSA key generation failed")?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            owner: owner.to_string(),
            key_id: None,
            private_key,
            public_key,
        })
    }

    /// Load a keypair from a PEM-encoded private key (PKCS#8 or PKCS#1).
    pub fn from_pem(owner: &str, private_key_pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| Error::Config(format!("invalid private key: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            owner: owner.to_string(),
            key_id: None,
            private_key,
            public_key,
        })
    }

    /// Override the default `<owner>#main-key` key id.
    pub fn with_key_id(mut self, key_id: &str) -> Self {
        self.key_id = Some(key_id.to_string());
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn key_id(&self) -> String {
        self.key_id
            .clone()
            .unwrap_or_else(|| format!("{}#main-key", self.owner))
    }

    pub fn private_key_pem(&self) -> Result<String> {
        Ok(self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .context("private key PEM encoding failed")?
            .to_string())
    }

    pub fn public_key_pem(&self) -> Result<String> {
        Ok(self
            .public_key
            .to_public_key_pem(LineEnding::LF)
            .context("public key PEM encoding failed")?)
    }

    /// Sign a message with RSA-SHA256 (PKCS#1 v1.5), returning raw bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = pkcs1v15::SigningKey::<Sha256>::new(self.private_key.clone());
        let mut rng = rand::thread_rng();
        signing_key.sign_with_rng(&mut rng, message).to_vec()
    }

    /// Sign a message and base64-encode the result.
    pub fn sign_base64(&self, message: &[u8]) -> String {
        BASE64.encode(self.sign(message))
    }

    /// Verify a signature against this keypair's public half.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        verify_with_public_key(&self.public_key, message, signature)
    }

    /// The key as an ActivityPub `publicKey` JSON object.
    pub fn to_public_key_json(&self) -> Result<serde_json::Value> {
        Ok(json!({
            "id": self.key_id(),
            "owner": self.owner,
            "publicKeyPem": self.public_key_pem()?,
            "type": "Key",
        }))
    }
}

/// Parse a PEM-encoded public key (SPKI or PKCS#1).
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|_| Error::InvalidSignature)
}

/// Verify an RSA-SHA256 (PKCS#1 v1.5) signature.
pub fn verify_with_public_key(
    public_key: &RsaPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let verifying_key = pkcs1v15::VerifyingKey::<Sha256>::new(public_key.clone());
    let signature =
        pkcs1v15::Signature::try_from(signature).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::InvalidSignature)
}

/// Verify an RSA-SHA256 signature against a PEM-encoded public key.
pub fn verify_with_pem(pem: &str, message: &[u8], signature: &[u8]) -> Result<()> {
    verify_with_public_key(&public_key_from_pem(pem)?, message, signature)
}
