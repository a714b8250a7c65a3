// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware-version change tracking.
//!
//! A hash of the OS release file is kept under the configuration
//! directory; consumers of the published inventory use the comparison to
//! decide whether cached configuration derived from it is stale.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use log::warn;

pub const CONFIGURATION_DIR: &str = "/var/configuration";
pub const OS_RELEASE: &str = "/etc/os-release";
const VERSION_FILE: &str = "version";

/// Compares the hash of `os_release` against the recorded one, rewriting
/// the record when they differ. Returns true when the version changed or
/// could not be determined.
pub fn fw_version_changed(config_dir: &Path, os_release: &Path) -> bool {
    let data = match fs::read_to_string(os_release) {
        Ok(data) => data,
        Err(e) => {
            warn!("cannot read {}: {e}", os_release.display());
            return true;
        }
    };
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    let current = hasher.finish().to_string();

    if let Err(e) = fs::create_dir_all(config_dir) {
        warn!("cannot create {}: {e}", config_dir.display());
        return true;
    }
    let record = config_dir.join(VERSION_FILE);
    let previous = fs::read_to_string(&record).unwrap_or_default();
    if previous == current {
        return false;
    }
    if let Err(e) = fs::write(&record, &current) {
        warn!("cannot record firmware version: {e}");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("frud-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn records_then_matches() {
        let dir = scratch_dir("version");
        let release = dir.join("os-release");
        let config = dir.join("configuration");
        fs::write(&release, "VERSION_ID=1.0\n").unwrap();

        assert!(fw_version_changed(&config, &release));
        assert!(!fw_version_changed(&config, &release));

        fs::write(&release, "VERSION_ID=2.0\n").unwrap();
        assert!(fw_version_changed(&config, &release));
        assert!(!fw_version_changed(&config, &release));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreadable_release_counts_as_changed() {
        let dir = scratch_dir("version-missing");
        let config = dir.join("configuration");
        assert!(fw_version_changed(&config, Path::new("/nonexistent")));
        fs::remove_dir_all(&dir).unwrap();
    }
}
