//! Nostr protocol types and cryptography for the chat client.
//!
//! This crate provides:
//! - Key generation and import (secp256k1 keypairs, x-only public keys)
//! - NIP-01: Basic protocol (events, serialization, signing, verification)
//! - NIP-44: Versioned encryption (v2 conversation-key encryption for DMs)

mod keys;
pub mod nip01;
pub mod nip44;

pub use keys::{KeyError, Keypair};

pub use nip01::{
    Event, EventTemplate, KIND_ENCRYPTED_DM, KIND_TEXT_NOTE, Nip01Error, TAG_PUBKEY, TAG_ROOM,
    UnsignedEvent, finalize_event, generate_secret_key, get_event_hash, get_public_key,
    get_public_key_hex, serialize_event, sort_events, validate_event, validate_unsigned_event,
    verify_event,
};

pub use nip44::{Nip44Error, decrypt, decrypt_from, encrypt, encrypt_to, get_conversation_key};
