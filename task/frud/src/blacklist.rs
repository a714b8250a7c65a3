// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Buses the scanner must leave alone.
//!
//! The set starts from an optional JSON file and grows at runtime when a
//! bus times out. Runtime additions are not written back; a bus that needs
//! permanent exclusion belongs in the file.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Expected document shape. Additional keys are tolerated so the file can
/// grow other exclusion kinds later; `buses`, when present, must be an
/// array of non-negative integers.
#[derive(Debug, Deserialize)]
struct BlacklistFile {
    #[serde(default)]
    buses: Vec<u32>,
}

#[derive(Debug, Default, Clone)]
pub struct Blacklist {
    buses: BTreeSet<u32>,
}

impl Blacklist {
    /// Loads the blacklist file. A missing file means an empty set; a file
    /// that exists but has the wrong shape is a fatal configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(_) => Ok(Self::default()),
        }
    }

    fn parse(text: &str) -> Result<Self> {
        let parsed: BlacklistFile =
            serde_json::from_str(text).context("malformed blacklist")?;
        Ok(Self {
            buses: parsed.buses.into_iter().collect(),
        })
    }

    pub fn contains(&self, bus: u32) -> bool {
        self.buses.contains(&bus)
    }

    /// Excludes `bus` for the rest of the process lifetime.
    pub fn add(&mut self, bus: u32) {
        self.buses.insert(bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_document() {
        let bl = Blacklist::parse(r#"{"buses": [1, 4, 11]}"#).unwrap();
        assert!(bl.contains(1));
        assert!(bl.contains(11));
        assert!(!bl.contains(2));
    }

    #[test]
    fn buses_key_optional() {
        let bl = Blacklist::parse(r#"{}"#).unwrap();
        assert!(!bl.contains(0));
    }

    #[test]
    fn other_keys_tolerated() {
        let bl =
            Blacklist::parse(r#"{"buses": [3], "addresses": [80]}"#).unwrap();
        assert!(bl.contains(3));
    }

    #[test]
    fn non_object_rejected() {
        assert!(Blacklist::parse(r#"[1, 2]"#).is_err());
    }

    #[test]
    fn non_array_buses_rejected() {
        assert!(Blacklist::parse(r#"{"buses": 7}"#).is_err());
    }

    #[test]
    fn non_integer_bus_rejected() {
        assert!(Blacklist::parse(r#"{"buses": ["4"]}"#).is_err());
        assert!(Blacklist::parse(r#"{"buses": [-1]}"#).is_err());
    }

    #[test]
    fn missing_file_is_empty() {
        let bl =
            Blacklist::load(Path::new("/nonexistent/blacklist.json")).unwrap();
        assert!(!bl.contains(0));
    }

    #[test]
    fn runtime_additions() {
        let mut bl = Blacklist::default();
        bl.add(9);
        assert!(bl.contains(9));
    }
}
