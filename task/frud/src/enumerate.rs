// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Listing of i2c bus device nodes.

use std::path::{Path, PathBuf};

use log::warn;

/// Lists the `i2c-N` device nodes under `dir`, ordered by bus index. An
/// unreadable directory yields an empty list; the caller decides whether
/// that is fatal.
pub fn i2c_buses(dir: &Path) -> Vec<(u32, PathBuf)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut buses = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix("i2c-") else {
            continue;
        };
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(index) = suffix.parse::<u32>() else { continue };
        buses.push((index, entry.path()));
    }
    buses.sort_unstable_by_key(|&(index, _)| index);
    buses
}
