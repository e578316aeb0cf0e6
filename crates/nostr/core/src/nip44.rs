//! NIP-44: Encrypted payloads (version 2).
//!
//! Payload format: `base64(0x02 || nonce(32) || ciphertext || hmac(32))`.
//!
//! The conversation key is derived from an ECDH shared secret and is
//! symmetric: `get_conversation_key(a_sk, b_pk) == get_conversation_key(b_sk, a_pk)`.
//! Per-message keys are derived from the conversation key and a fresh
//! random nonce via HKDF-expand.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Parity, PublicKey, SecretKey, XOnlyPublicKey, ecdh};
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Payload version byte.
pub const VERSION: u8 = 2;
/// Size of the per-message nonce in bytes.
pub const NONCE_SIZE: usize = 32;
/// Size of the ChaCha20 key in bytes.
pub const CHACHA_KEY_SIZE: usize = 32;
/// Size of the ChaCha20 nonce in bytes.
pub const CHACHA_NONCE_SIZE: usize = 12;
/// Size of the HMAC key in bytes.
pub const HMAC_KEY_SIZE: usize = 32;
/// Size of the authentication tag in bytes.
pub const MAC_SIZE: usize = 32;
/// Minimum plaintext length in bytes.
pub const MIN_PLAINTEXT_LEN: usize = 1;
/// Maximum plaintext length in bytes.
pub const MAX_PLAINTEXT_LEN: usize = 65535;
/// Minimum padded plaintext length in bytes.
pub const MIN_PADDED_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"nip44-v2";

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur during NIP-44 operations.
#[derive(Debug, Error)]
pub enum Nip44Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid plaintext length: {0}")]
    InvalidPlaintextLength(usize),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("MAC verification failed")]
    MacMismatch,

    #[error("invalid padding")]
    InvalidPadding,
}

/// Derive the shared conversation key between a secret key and a
/// counterparty's x-only public key.
///
/// The counterparty key is lifted to the curve point with even Y. The
/// x-coordinate of the ECDH point is run through HKDF-extract with the
/// salt `"nip44-v2"`.
pub fn get_conversation_key(
    secret_key: &[u8; 32],
    public_key: &[u8; 32],
) -> Result<[u8; 32], Nip44Error> {
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    let xonly =
        XOnlyPublicKey::from_slice(public_key).map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    let pk = PublicKey::from_x_only_public_key(xonly, Parity::Even);

    // Unhashed ECDH: take the x-coordinate of the shared point directly.
    let shared_point = ecdh::shared_secret_point(&pk, &sk);
    let shared_x = &shared_point[..32];

    let (prk, _) = Hkdf::<Sha256>::extract(Some(HKDF_SALT), shared_x);
    let mut conversation_key = [0u8; 32];
    conversation_key.copy_from_slice(&prk);
    Ok(conversation_key)
}

/// Derive the per-message ChaCha20 key, ChaCha20 nonce, and HMAC key
/// from a conversation key and a 32-byte message nonce.
pub fn get_message_keys(
    conversation_key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
) -> Result<([u8; CHACHA_KEY_SIZE], [u8; CHACHA_NONCE_SIZE], [u8; HMAC_KEY_SIZE]), Nip44Error> {
    let hk = Hkdf::<Sha256>::from_prk(conversation_key)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;

    let mut okm = [0u8; CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE + HMAC_KEY_SIZE];
    hk.expand(nonce, &mut okm)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;

    let mut chacha_key = [0u8; CHACHA_KEY_SIZE];
    let mut chacha_nonce = [0u8; CHACHA_NONCE_SIZE];
    let mut hmac_key = [0u8; HMAC_KEY_SIZE];
    chacha_key.copy_from_slice(&okm[..CHACHA_KEY_SIZE]);
    chacha_nonce.copy_from_slice(&okm[CHACHA_KEY_SIZE..CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE]);
    hmac_key.copy_from_slice(&okm[CHACHA_KEY_SIZE + CHACHA_NONCE_SIZE..]);

    Ok((chacha_key, chacha_nonce, hmac_key))
}

/// Compute the padded length for a plaintext of `unpadded_len` bytes.
fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= MIN_PADDED_LEN {
        return MIN_PADDED_LEN;
    }

    let next_power = 1usize << (usize::BITS - (unpadded_len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((unpadded_len - 1) / chunk + 1)
}

/// Pad a plaintext: 2-byte big-endian length prefix, then zero-padding
/// to the calculated padded length.
fn pad(plaintext: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT_LEN..=MAX_PLAINTEXT_LEN).contains(&len) {
        return Err(Nip44Error::InvalidPlaintextLength(len));
    }

    let padded_len = calc_padded_len(len);
    let mut padded = vec![0u8; 2 + padded_len];
    padded[0] = (len >> 8) as u8;
    padded[1] = (len & 0xff) as u8;
    padded[2..2 + len].copy_from_slice(plaintext);
    Ok(padded)
}

/// Strip padding, validating the length prefix and the zero fill.
fn unpad(padded: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::InvalidPadding);
    }

    let len = ((padded[0] as usize) << 8) | (padded[1] as usize);
    if !(MIN_PLAINTEXT_LEN..=MAX_PLAINTEXT_LEN).contains(&len)
        || padded.len() != 2 + calc_padded_len(len)
    {
        return Err(Nip44Error::InvalidPadding);
    }

    // Padding bytes past the plaintext must be zero.
    if padded[2 + len..].iter().any(|&b| b != 0) {
        return Err(Nip44Error::InvalidPadding);
    }

    Ok(padded[2..2 + len].to_vec())
}

/// Encrypt a plaintext with a conversation key, using a fresh random nonce.
pub fn encrypt(plaintext: &str, conversation_key: &[u8; 32]) -> Result<String, Nip44Error> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, conversation_key, &nonce)
}

fn encrypt_with_nonce(
    plaintext: &str,
    conversation_key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
) -> Result<String, Nip44Error> {
    let (chacha_key, chacha_nonce, hmac_key) = get_message_keys(conversation_key, nonce)?;

    let mut buffer = pad(plaintext.as_bytes())?;
    let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
    cipher.apply_keystream(&mut buffer);

    let mut mac = HmacSha256::new_from_slice(&hmac_key)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    mac.update(nonce);
    mac.update(&buffer);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_SIZE + buffer.len() + MAC_SIZE);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buffer);
    payload.extend_from_slice(&tag);

    Ok(BASE64.encode(payload))
}

/// Decrypt a base64 payload with a conversation key.
pub fn decrypt(payload: &str, conversation_key: &[u8; 32]) -> Result<String, Nip44Error> {
    // A "#" prefix marks a future non-base64 payload encoding.
    if payload.starts_with('#') {
        return Err(Nip44Error::InvalidPayload(
            "unsupported payload prefix".to_string(),
        ));
    }

    let data = BASE64
        .decode(payload)
        .map_err(|e| Nip44Error::InvalidPayload(format!("invalid base64: {}", e)))?;

    // version + nonce + at least one ciphertext block (2-byte prefix + 32
    // bytes of padding, encrypted) + mac
    if data.len() < 1 + NONCE_SIZE + 2 + MIN_PADDED_LEN + MAC_SIZE {
        return Err(Nip44Error::InvalidPayload("payload too short".to_string()));
    }

    let version = data[0];
    if version != VERSION {
        return Err(Nip44Error::UnsupportedVersion(version));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&data[1..1 + NONCE_SIZE]);
    let ciphertext = &data[1 + NONCE_SIZE..data.len() - MAC_SIZE];
    let received_mac = &data[data.len() - MAC_SIZE..];

    let (chacha_key, chacha_nonce, hmac_key) = get_message_keys(conversation_key, &nonce)?;

    // Constant-time MAC check before any decryption.
    let mut mac = HmacSha256::new_from_slice(&hmac_key)
        .map_err(|e| Nip44Error::InvalidKey(e.to_string()))?;
    mac.update(&nonce);
    mac.update(ciphertext);
    mac.verify_slice(received_mac)
        .map_err(|_| Nip44Error::MacMismatch)?;

    let mut buffer = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
    cipher.apply_keystream(&mut buffer);

    let plaintext = unpad(&buffer)?;
    String::from_utf8(plaintext)
        .map_err(|e| Nip44Error::InvalidPayload(format!("invalid utf-8: {}", e)))
}

/// Encrypt a plaintext for a recipient, deriving the conversation key
/// from the sender's secret key and the recipient's x-only public key.
pub fn encrypt_to(
    plaintext: &str,
    sender_secret_key: &[u8; 32],
    recipient_public_key: &[u8; 32],
) -> Result<String, Nip44Error> {
    let conversation_key = get_conversation_key(sender_secret_key, recipient_public_key)?;
    encrypt(plaintext, &conversation_key)
}

/// Decrypt a payload from a sender, deriving the conversation key from
/// the recipient's secret key and the sender's x-only public key.
pub fn decrypt_from(
    payload: &str,
    recipient_secret_key: &[u8; 32],
    sender_public_key: &[u8; 32],
) -> Result<String, Nip44Error> {
    let conversation_key = get_conversation_key(recipient_secret_key, sender_public_key)?;
    decrypt(payload, &conversation_key)
}
