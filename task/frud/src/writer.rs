// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-image FRU writes.
//!
//! A candidate image is accepted only if it is no larger than the FRU size
//! cap and survives a full decode; partial or field-level patches are not
//! supported.

use std::path::Path;

use log::error;
use thiserror::Error;

use crate::baseboard;

#[derive(Debug, Error)]
pub enum WriteError {
    /// The caller's image or target is no good; reported as an
    /// invalid-argument error on the bus.
    #[error("{0}")]
    InvalidArgument(String),
    /// The image was fine but the hardware or filesystem was not; reported
    /// as an opaque internal error.
    #[error("{0}")]
    Internal(String),
}

/// Validates and writes a FRU image. Bus 0 address 0 is the file-backed
/// baseboard; any other target is a physical EEPROM reached through its
/// bus device node.
pub fn write_fru(
    dev_dir: &Path,
    baseboard_path: &Path,
    bus: u8,
    address: u8,
    data: &[u8],
) -> Result<(), WriteError> {
    if data.len() > ipmi_fru::MAX_FRU_SIZE {
        return Err(WriteError::InvalidArgument(format!(
            "image is {} bytes, limit is {}",
            data.len(),
            ipmi_fru::MAX_FRU_SIZE
        )));
    }
    if let Err(e) = ipmi_fru::decode(data) {
        return Err(WriteError::InvalidArgument(format!(
            "image does not decode: {e}"
        )));
    }

    if bus == 0 && address == 0 {
        return baseboard::write(baseboard_path, data).map_err(|e| {
            error!("baseboard write failed: {e}");
            WriteError::Internal(format!("baseboard write failed: {e}"))
        });
    }

    let node = dev_dir.join(format!("i2c-{bus}"));
    let mut handle = i2c_smbus::I2cBus::open(&node).map_err(|e| {
        error!("unable to open {}: {e}", node.display());
        WriteError::Internal(format!("unable to open {}", node.display()))
    })?;
    fru_scan::write_fru(&mut handle, address, data).map_err(|e| {
        error!("EEPROM write failed on bus {bus}: {e}");
        WriteError::Internal(format!("EEPROM write failed: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipmi_fru::checksum;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("frud-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn minimal_fru() -> Vec<u8> {
        let mut fru = vec![0x01u8, 0, 0, 0, 0, 0, 0];
        fru.push(checksum(&fru));
        fru.push(0);
        fru
    }

    #[test]
    fn oversize_image_rejected() {
        let err = write_fru(
            Path::new("/dev"),
            Path::new("/nonexistent"),
            0,
            0,
            &vec![0u8; ipmi_fru::MAX_FRU_SIZE + 1],
        )
        .unwrap_err();
        assert!(matches!(err, WriteError::InvalidArgument(_)));
    }

    #[test]
    fn undecodable_image_rejected() {
        let err = write_fru(
            Path::new("/dev"),
            Path::new("/nonexistent"),
            0,
            0,
            &[0xFFu8; 64],
        )
        .unwrap_err();
        assert!(matches!(err, WriteError::InvalidArgument(_)));
    }

    #[test]
    fn baseboard_write_round_trips() {
        let dir = scratch_dir("baseboard");
        let path = dir.join("baseboard.fru.bin");
        let fru = minimal_fru();

        write_fru(Path::new("/dev"), &path, 0, 0, &fru).unwrap();
        assert_eq!(baseboard::read(&path).unwrap(), fru);

        // Overwriting replaces the image wholesale.
        let mut second = minimal_fru();
        second.push(0xAB);
        write_fru(Path::new("/dev"), &path, 0, 0, &second).unwrap();
        assert_eq!(baseboard::read(&path).unwrap(), second);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreachable_bus_is_internal_error() {
        let err = write_fru(
            Path::new("/nonexistent-dev"),
            Path::new("/nonexistent"),
            7,
            0x50,
            &minimal_fru(),
        )
        .unwrap_err();
        assert!(matches!(err, WriteError::Internal(_)));
    }
}
