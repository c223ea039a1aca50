//! File keystore.
//!
//! The key lives in a small JSON file next to (but never inside) the queue
//! database. First open generates a key and writes the file with owner-only
//! permissions; later opens load the same key back.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cipher::CipherKey;
use crate::error::{CryptoError, Result};

/// On-disk keyset format.
///
/// `key_id` is stored redundantly so a corrupted or hand-edited file is
/// rejected instead of silently decrypting nothing.
#[derive(Debug, Serialize, Deserialize)]
struct KeysetFile {
    version: u32,
    key_id: String,
    /// Hex-encoded 256-bit key.
    key: String,
}

const KEYSET_VERSION: u32 = 1;

/// Load the key from `path`, generating and persisting a fresh one if the
/// file does not exist yet.
pub fn load_or_create(path: impl AsRef<Path>) -> Result<CipherKey> {
    let path = path.as_ref();
    if path.exists() {
        return load(path);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let key = CipherKey::generate();
    let file = KeysetFile {
        version: KEYSET_VERSION,
        key_id: key.key_id().to_string(),
        key: hex::encode(key.as_bytes()),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| CryptoError::MalformedKeystore(e.to_string()))?;
    fs::write(path, json)?;
    restrict_permissions(path)?;

    Ok(key)
}

fn load(path: &Path) -> Result<CipherKey> {
    let json = fs::read_to_string(path)?;
    let file: KeysetFile =
        serde_json::from_str(&json).map_err(|e| CryptoError::MalformedKeystore(e.to_string()))?;

    if file.version != KEYSET_VERSION {
        return Err(CryptoError::MalformedKeystore(format!(
            "unsupported keyset version: {}",
            file.version
        )));
    }

    let raw = hex::decode(&file.key)
        .map_err(|e| CryptoError::MalformedKeystore(format!("bad key encoding: {e}")))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| CryptoError::MalformedKeystore("key is not 32 bytes".into()))?;

    let key = CipherKey::from_bytes(bytes);
    if key.key_id().as_str() != file.key_id {
        return Err(CryptoError::MalformedKeystore(
            "key fingerprint does not match key material".into(),
        ));
    }

    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
