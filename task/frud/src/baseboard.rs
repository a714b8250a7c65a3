// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The file-backed baseboard FRU.
//!
//! Some platforms cannot reach their baseboard EEPROM from this host, so
//! provisioning drops the image into a well-known file instead. It is
//! surfaced as bus 0, address 0.

use std::fs;
use std::io;
use std::path::Path;

pub const BASEBOARD_FRU_PATH: &str = "/etc/fru/baseboard.fru.bin";

/// Reads the baseboard FRU image, if one is provisioned.
pub fn read(path: &Path) -> Option<Vec<u8>> {
    fs::read(path).ok()
}

/// Replaces the baseboard FRU image wholesale.
pub fn write(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)
}
