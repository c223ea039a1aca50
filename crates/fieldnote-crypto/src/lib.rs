//! # Fieldnote Crypto
//!
//! Encryption at rest for queue payloads.
//!
//! The queue never stores plaintext: producers hand the [`CipherService`] a
//! payload, it comes back as an authenticated ciphertext, and only that
//! ciphertext touches the durable store. Any bit-flip or truncation of the
//! stored blob is detected at open time and surfaces as
//! [`CryptoError::AuthenticationFailure`], never as silently corrupted
//! plaintext.
//!
//! Key material lives in a separate keystore file with restricted
//! permissions (see [`keystore`]), outside the queue database. Every sealed
//! payload records the fingerprint of the key that sealed it, so key
//! rotation can be layered in later without a schema change.

pub mod cipher;
pub mod error;
pub mod keystore;

pub use cipher::{CipherKey, CipherService, KeyId};
pub use error::{CryptoError, Result};
pub use keystore::load_or_create;
