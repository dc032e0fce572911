//! Per-workspace private key persistence

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::WsError;

/// File name of the private key inside a workspace's key directory
pub const PRIVATE_KEY_FILE_NAME: &str = "id_workspace_ecdsa";

/// Key entry inside the workspace credential secret
pub const PRIVATE_KEY_SECRET_KEY: &str = "ssh_host_ecdsa_key";

/// Location of the private key for (name, namespace) under `key_dir`
pub fn private_key_path(key_dir: &Path, name: &str, namespace: &str) -> PathBuf {
    key_dir.join(namespace).join(name).join(PRIVATE_KEY_FILE_NAME)
}

/// Write `key` with owner-only permissions and return its path.
///
/// An existing file is replaced.
pub fn write_private_key(
    key_dir: &Path,
    name: &str,
    namespace: &str,
    key: &[u8],
) -> Result<PathBuf, WsError> {
    let path = private_key_path(key_dir, name, namespace);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&path)?;
    file.write_all(key)?;

    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    log_key_fingerprint(key);
    Ok(path)
}

fn log_key_fingerprint(key: &[u8]) {
    let Ok(pem) = std::str::from_utf8(key) else {
        tracing::warn!("Workspace private key is not valid UTF-8");
        return;
    };

    match russh_keys::decode_secret_key(pem, None) {
        Ok(pair) => match pair.clone_public_key() {
            Ok(public) => tracing::debug!("Workspace key fingerprint: {}", public.fingerprint()),
            Err(e) => tracing::debug!("Could not derive public key: {}", e),
        },
        Err(e) => tracing::warn!("Workspace private key could not be parsed: {}", e),
    }
}
