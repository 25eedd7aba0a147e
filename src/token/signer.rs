//! Keypair-backed encoding and decoding of reservation tokens.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::{CryptoRng, RngCore};

use crate::error::{BlitzError, Result};

/// Length of the signed payload: two little-endian u64 millisecond stamps.
pub const MESSAGE_LENGTH: usize = 16;

/// Length of the signature-prepended message.
pub const SIGNED_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH + MESSAGE_LENGTH;

/// Length of the base64 text form; doubles as a cheap format check.
pub const ENCODED_LENGTH: usize = (SIGNED_LENGTH + 2) / 3 * 4;

/// Signs and verifies reservation tokens with an Ed25519 keypair.
///
/// A token is `signature || validFrom || validUntil` in base64, with both
/// timestamps as little-endian u64 Unix milliseconds. The keypair lives for
/// the process lifetime; tokens from a previous run will not verify.
pub struct Signer {
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl Signer {
    /// Creates a signer with a fresh keypair drawn from `rng`.
    /// The random source is only used here and not needed afterwards.
    pub fn new<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let signing = SigningKey::generate(rng);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    /// Signs a validity window and encodes it as a base64 token.
    pub fn encode(&self, from_ms: u64, until_ms: u64) -> String {
        let mut message = [0u8; MESSAGE_LENGTH];
        message[..8].copy_from_slice(&from_ms.to_le_bytes());
        message[8..].copy_from_slice(&until_ms.to_le_bytes());

        let signature = self.signing.sign(&message);

        let mut signed = [0u8; SIGNED_LENGTH];
        signed[..ed25519_dalek::SIGNATURE_LENGTH].copy_from_slice(&signature.to_bytes());
        signed[ed25519_dalek::SIGNATURE_LENGTH..].copy_from_slice(&message);

        BASE64.encode(signed)
    }

    /// Decodes and verifies a token, returning its validity window as Unix
    /// milliseconds.
    pub fn decode(&self, token: &str) -> Result<(u64, u64)> {
        if token.len() != ENCODED_LENGTH {
            return Err(BlitzError::InvalidReservationFormat);
        }

        let signed = BASE64
            .decode(token)
            .map_err(|_| BlitzError::InvalidReservationFormat)?;
        if signed.len() != SIGNED_LENGTH {
            return Err(BlitzError::InvalidReservationFormat);
        }

        let (sig_bytes, message) = signed.split_at(ed25519_dalek::SIGNATURE_LENGTH);
        let signature = Signature::from_slice(sig_bytes)
            .map_err(|_| BlitzError::InvalidReservationSignature)?;
        self.verifying
            .verify(message, &signature)
            .map_err(|_| BlitzError::InvalidReservationSignature)?;

        let mut buf = [0u8; 8];
        buf.copy_from_slice(&message[..8]);
        let from_ms = u64::from_le_bytes(buf);
        buf.copy_from_slice(&message[8..]);
        let until_ms = u64::from_le_bytes(buf);

        Ok((from_ms, until_ms))
    }
}
