//! Client identity files
//!
//! ```text
//! ~/.gridvoice/identity.json              # { "private_key": hex32, "public_key": hex32 }
//! ~/.gridvoice/bots/<name>/identity.json  # bot clients
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gridvoice_core::crypto::Keypair;

use crate::error::ClientError;

pub const APP_DIR: &str = ".gridvoice";

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    private_key: String,
    public_key: String,
}

/// `~/.gridvoice`, used for the identity and the level cache.
pub fn app_dir() -> Result<PathBuf, ClientError> {
    dirs::home_dir()
        .map(|home| home.join(APP_DIR))
        .ok_or_else(|| ClientError::Identity("cannot determine home directory".into()))
}

pub fn default_identity_path() -> Result<PathBuf, ClientError> {
    Ok(app_dir()?.join("identity.json"))
}

pub fn bot_identity_path(name: &str) -> Result<PathBuf, ClientError> {
    Ok(app_dir()?.join("bots").join(name).join("identity.json"))
}

/// Load the identity at `path`, generating and persisting a fresh one when
/// the file does not exist yet.
pub fn load_or_create(path: &Path) -> Result<Keypair, ClientError> {
    if path.exists() {
        let data = fs::read(path)?;
        let file: IdentityFile = serde_json::from_slice(&data)
            .map_err(|e| ClientError::Identity(format!("corrupt identity file: {e}")))?;
        let keypair = Keypair::from_private_hex(&file.private_key)
            .map_err(|e| ClientError::Identity(e.to_string()))?;
        if keypair.public_hex() != file.public_key {
            return Err(ClientError::Identity(
                "identity file public key does not match private key".into(),
            ));
        }
        return Ok(keypair);
    }

    let keypair = Keypair::generate();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = IdentityFile {
        private_key: keypair.private_hex(),
        public_key: keypair.public_hex(),
    };
    let json = serde_json::to_vec_pretty(&file)
        .map_err(|e| ClientError::Identity(e.to_string()))?;
    fs::write(path, json)?;
    tracing::info!(path = %path.display(), "generated new identity");
    Ok(keypair)
}
