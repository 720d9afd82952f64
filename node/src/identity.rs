use std::{fmt::Write, fs, path::PathBuf};

use sha2::{Digest, Sha256};
use thermonode_common::{DeviceId, DeviceIdError};
use thiserror::Error;

pub const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Bytes of the hashed hardware identity kept in the device id.
const ID_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no machine identity found in {0:?}")]
    Unavailable(Vec<PathBuf>),
    #[error(transparent)]
    Invalid(#[from] DeviceIdError),
}

/// Uppercase hex of the leading bytes of SHA-256 over the raw identity.
pub fn derive_device_id(raw: &[u8]) -> Result<DeviceId, DeviceIdError> {
    let digest = Sha256::digest(raw.trim_ascii());
    let mut id = String::with_capacity(ID_BYTES * 2);
    for byte in &digest[..ID_BYTES] {
        let _ = write!(id, "{byte:02X}");
    }
    DeviceId::new(id)
}

/// An explicit override wins; otherwise the first readable, non-empty
/// machine id file is hashed.
pub fn resolve_device_id(
    override_id: Option<String>,
    paths: &[PathBuf],
) -> Result<DeviceId, IdentityError> {
    if let Some(id) = override_id.filter(|id| !id.trim().is_empty()) {
        return Ok(DeviceId::new(id.trim())?);
    }

    for path in paths {
        match fs::read(path) {
            Ok(raw) if !raw.trim_ascii().is_empty() => return Ok(derive_device_id(&raw)?),
            _ => continue,
        }
    }
    Err(IdentityError::Unavailable(paths.to_vec()))
}
