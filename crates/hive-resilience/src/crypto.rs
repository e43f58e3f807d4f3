use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use chrono::{DateTime, Utc};
use hive_core::{HiveError, HiveResult};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// AEAD nonce length in bytes, prepended to the ciphertext.
const NONCE_LEN: usize = 12;

/// A sealed inter-agent message.
///
/// `payload` is base64(nonce ‖ ciphertext) when `encrypted`, or the raw JSON
/// text in pass-through mode. `signature` is a hex HMAC-SHA256 over the
/// plaintext payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// Who sealed the message.
    pub sender: String,
    /// The channel it was published on.
    pub channel: String,
    /// Base64 ciphertext, or plaintext JSON in pass-through mode.
    pub payload: String,
    /// Hex HMAC-SHA256 over the plaintext, when a signing key is configured.
    pub signature: Option<String>,
    /// Whether `payload` is encrypted.
    pub encrypted: bool,
    /// When the envelope was sealed.
    pub timestamp: DateTime<Utc>,
}

/// Seals and opens [`SecureEnvelope`]s.
///
/// With no key material the cipher degrades to explicit, logged plaintext
/// pass-through — never a silent failure. With keys configured, receivers
/// must see both the AEAD authentication and the keyed-hash signature pass
/// before the payload is trusted; any mismatch is rejected.
pub struct MessageCipher {
    cipher: Option<ChaCha20Poly1305>,
    signing_key: Option<Vec<u8>>,
}

impl MessageCipher {
    /// Build a cipher from hex-encoded 32-byte keys. The signing key falls
    /// back to the message key when unset; both absent selects pass-through.
    pub fn new(message_key: Option<&str>, signing_key: Option<&str>) -> HiveResult<Self> {
        let cipher = match message_key {
            Some(hex_key) => {
                let bytes = decode_key(hex_key)?;
                let cipher = ChaCha20Poly1305::new_from_slice(&bytes)
                    .map_err(|_| HiveError::Security("invalid message key length".into()))?;
                Some(cipher)
            }
            None => {
                warn!("No message key configured; inter-agent messages are plaintext");
                None
            }
        };
        let signing_key = match signing_key.or(message_key) {
            Some(hex_key) => Some(decode_key(hex_key)?),
            None => None,
        };
        Ok(Self { cipher, signing_key })
    }

    /// A pass-through cipher with no keys.
    pub fn plaintext() -> Self {
        Self {
            cipher: None,
            signing_key: None,
        }
    }

    /// Whether payloads are actually encrypted.
    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seal a JSON payload for the given channel.
    pub fn seal(
        &self,
        sender: &str,
        channel: &str,
        payload: &serde_json::Value,
    ) -> HiveResult<SecureEnvelope> {
        let plaintext = serde_json::to_vec(payload)?;
        let signature = self.sign(&plaintext)?;

        let (payload, encrypted) = match &self.cipher {
            Some(cipher) => {
                let mut nonce_bytes = [0u8; NONCE_LEN];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce_bytes);
                let nonce = Nonce::from_slice(&nonce_bytes);
                let ciphertext = cipher
                    .encrypt(nonce, plaintext.as_slice())
                    .map_err(|_| HiveError::Security("encryption failed".into()))?;
                let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                framed.extend_from_slice(&nonce_bytes);
                framed.extend(ciphertext);
                (BASE64.encode(framed), true)
            }
            None => {
                let text = String::from_utf8(plaintext)
                    .map_err(|_| HiveError::Security("payload is not UTF-8".into()))?;
                (text, false)
            }
        };

        Ok(SecureEnvelope {
            sender: sender.to_string(),
            channel: channel.to_string(),
            payload,
            signature,
            encrypted,
            timestamp: Utc::now(),
        })
    }

    /// Open an envelope: authenticate, verify the signature, then parse.
    /// Any mismatch is a `Security` error — callers log and drop.
    pub fn open(&self, envelope: &SecureEnvelope) -> HiveResult<serde_json::Value> {
        let plaintext = if envelope.encrypted {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                HiveError::Security("received encrypted message without a message key".into())
            })?;
            let framed = BASE64
                .decode(&envelope.payload)
                .map_err(|_| HiveError::Security("payload is not valid base64".into()))?;
            if framed.len() < NONCE_LEN {
                return Err(HiveError::Security("ciphertext too short".into()));
            }
            let nonce = Nonce::from_slice(&framed[..NONCE_LEN]);
            cipher
                .decrypt(nonce, &framed[NONCE_LEN..])
                .map_err(|_| HiveError::Security("decryption failed (tampered payload?)".into()))?
        } else {
            envelope.payload.clone().into_bytes()
        };

        self.verify(&plaintext, envelope.signature.as_deref())?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn sign(&self, plaintext: &[u8]) -> HiveResult<Option<String>> {
        let Some(key) = &self.signing_key else {
            return Ok(None);
        };
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| HiveError::Security("invalid signing key length".into()))?;
        mac.update(plaintext);
        Ok(Some(hex::encode(mac.finalize().into_bytes())))
    }

    fn verify(&self, plaintext: &[u8], signature: Option<&str>) -> HiveResult<()> {
        let Some(key) = &self.signing_key else {
            // Pass-through mode cannot verify anything; that was logged at
            // construction time.
            return Ok(());
        };
        let signature = signature
            .ok_or_else(|| HiveError::Security("message is missing its signature".into()))?;
        let expected = hex::decode(signature)
            .map_err(|_| HiveError::Security("signature is not valid hex".into()))?;
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| HiveError::Security("invalid signing key length".into()))?;
        mac.update(plaintext);
        mac.verify_slice(&expected)
            .map_err(|_| HiveError::Security("signature mismatch".into()))
    }
}

fn decode_key(hex_key: &str) -> HiveResult<Vec<u8>> {
    let bytes =
        hex::decode(hex_key).map_err(|_| HiveError::Security("key is not valid hex".into()))?;
    if bytes.len() != 32 {
        return Err(HiveError::Security(format!(
            "key must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}
