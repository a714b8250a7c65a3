// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planning of the published object set.
//!
//! Object paths are derived from the decoded product name. Two devices can
//! legitimately decode to the same name (multiple identical PSUs), and a
//! multiplexer child bus can surface the very same EEPROM its parent
//! already exposed; the planner suppresses the latter and numbers the
//! former.

use std::path::Path;

use indexmap::IndexMap;
use ipmi_fru::sanitize;
use log::warn;

use crate::BusMap;

pub const PATH_PREFIX: &str = "/xyz/openbmc_project/FruDevice";

/// One object slated for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedObject {
    pub path: String,
    pub bus: u32,
    pub address: u8,
    /// Sanitized, NUL-terminated property values; empty fields dropped.
    pub fields: IndexMap<String, String>,
}

/// True when the bus hangs off a multiplexer; the kernel advertises this
/// with a `mux_device` symlink on the bus's sysfs node.
pub fn is_mux_bus(bus: u32) -> bool {
    let path = format!("/sys/bus/i2c/devices/i2c-{bus}/mux_device");
    std::fs::symlink_metadata(Path::new(&path))
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// Derives names for every decodable FRU in the map.
///
/// A FRU that fails to decode is logged and dropped. When a candidate path
/// collides with one already planned: a mux child carrying byte-identical
/// data at the same address as the earlier device is suppressed outright,
/// and anything else takes the smallest free `_N` suffix.
pub fn plan_publication(
    bus_map: &BusMap,
    is_mux: &dyn Fn(u32) -> bool,
) -> Vec<PlannedObject> {
    let mut planned: Vec<PlannedObject> = Vec::new();
    let mut unknown_count = 0usize;

    for (&bus, devices) in bus_map {
        for (&address, raw) in devices {
            let decoded = match ipmi_fru::decode(raw) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(
                        "cannot decode FRU at bus {bus} address \
                         {address:#04x}: {e}"
                    );
                    continue;
                }
            };

            let base = product_name(&decoded).unwrap_or_else(|| {
                let name = format!("UNKNOWN{unknown_count}");
                unknown_count += 1;
                name
            });
            let base_path = format!("{PATH_PREFIX}/{base}");

            let mut path = base_path.clone();
            if bus > 0 && planned.iter().any(|p| p.path == path) {
                // A mux child reflecting its parent's EEPROM is the same
                // physical device seen twice.
                let duplicate = is_mux(bus)
                    && planned.iter().any(|p| {
                        p.path == path
                            && p.address == address
                            && bus_map
                                .get(&p.bus)
                                .and_then(|d| d.get(&address))
                                .is_some_and(|other| other == raw)
                    });
                if duplicate {
                    continue;
                }
                let mut n = 0usize;
                path = loop {
                    let candidate = format!("{base_path}_{n}");
                    if !planned.iter().any(|p| p.path == candidate) {
                        break candidate;
                    }
                    n += 1;
                };
            }

            let mut fields = IndexMap::new();
            for (key, value) in &decoded {
                let value = sanitize(value);
                if value.is_empty() {
                    continue;
                }
                fields.insert(sanitize(key), format!("{value}\0"));
            }

            planned.push(PlannedObject {
                path,
                bus,
                address,
                fields,
            });
        }
    }
    planned
}

/// Picks the name the object path derives from: the board product name,
/// else the product-area product name, else nothing. Characters that are
/// not legal in an object path element become underscores.
fn product_name(decoded: &ipmi_fru::FieldMap) -> Option<String> {
    let name = decoded
        .get("BOARD_PRODUCT_NAME")
        .filter(|v| !v.is_empty())
        .or_else(|| {
            decoded.get("PRODUCT_PRODUCT_NAME").filter(|v| !v.is_empty())
        })?;
    Some(
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipmi_fru::checksum;
    use std::collections::BTreeMap;

    fn no_mux(_: u32) -> bool {
        false
    }

    /// Builds a FRU whose board area carries the given product name.
    fn fru_with_board_name(name: &str) -> Vec<u8> {
        assert!(name.len() >= 2 && name.len() < 32);
        let mut body = vec![0x00, 0x00, 0x00, 0x00]; // language, minutes
        body.extend_from_slice(&[0xC2, b'M', b'M']); // manufacturer
        body.push(0xC0 | name.len() as u8);
        body.extend_from_slice(name.as_bytes());
        body.push(0xC1);

        let total = (body.len() + 2).div_ceil(8) * 8;
        let mut area = vec![0x01, (total / 8) as u8];
        area.extend_from_slice(&body);
        area.resize(total, 0);

        let mut header = vec![0x01u8, 0, 0, 1, 0, 0, 0];
        header.push(checksum(&header));
        let mut fru = header;
        fru.extend_from_slice(&area);
        fru
    }

    /// A FRU with no name-bearing areas at all.
    fn anonymous_fru() -> Vec<u8> {
        let mut fru = vec![0x01u8, 0, 0, 0, 0, 0, 0];
        fru.push(checksum(&fru));
        fru.push(0);
        fru
    }

    fn one_device(bus: u32, address: u8, raw: Vec<u8>) -> BusMap {
        BusMap::from([(bus, BTreeMap::from([(address, raw)]))])
    }

    #[test]
    fn path_from_board_name() {
        let map = one_device(1, 0x50, fru_with_board_name("Widget Srv"));
        let planned = plan_publication(&map, &no_mux);
        assert_eq!(planned.len(), 1);
        assert_eq!(
            planned[0].path,
            "/xyz/openbmc_project/FruDevice/Widget_Srv"
        );
        assert_eq!(planned[0].bus, 1);
        assert_eq!(planned[0].address, 0x50);
    }

    #[test]
    fn values_are_nul_terminated() {
        let map = one_device(1, 0x50, fru_with_board_name("Box"));
        let planned = plan_publication(&map, &no_mux);
        assert_eq!(planned[0].fields["BOARD_PRODUCT_NAME"], "Box\0");
        assert_eq!(planned[0].fields["Common_Format_Version"], "1\0");
    }

    #[test]
    fn anonymous_devices_numbered() {
        let mut map = one_device(1, 0x50, anonymous_fru());
        map.get_mut(&1).unwrap().insert(0x52, anonymous_fru());
        let planned = plan_publication(&map, &no_mux);
        assert_eq!(planned[0].path, "/xyz/openbmc_project/FruDevice/UNKNOWN0");
        assert_eq!(planned[1].path, "/xyz/openbmc_project/FruDevice/UNKNOWN1");
    }

    #[test]
    fn collisions_take_numeric_suffixes() {
        let mut map = one_device(1, 0x50, fru_with_board_name("PSU"));
        map.insert(2, BTreeMap::from([(0x50, fru_with_board_name("PSU"))]));
        map.insert(3, BTreeMap::from([(0x50, fru_with_board_name("PSU"))]));
        let planned = plan_publication(&map, &no_mux);
        let paths: Vec<&str> =
            planned.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/xyz/openbmc_project/FruDevice/PSU",
                "/xyz/openbmc_project/FruDevice/PSU_0",
                "/xyz/openbmc_project/FruDevice/PSU_1",
            ]
        );
    }

    #[test]
    fn mux_child_duplicate_suppressed() {
        let raw = fru_with_board_name("Sled");
        let mut map = one_device(1, 0x50, raw.clone());
        map.insert(5, BTreeMap::from([(0x50, raw)]));
        let planned = plan_publication(&map, &|bus| bus == 5);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].bus, 1);
    }

    #[test]
    fn mux_child_with_different_bytes_kept() {
        let mut map = one_device(1, 0x50, fru_with_board_name("Sled"));
        map.insert(
            5,
            BTreeMap::from([(0x50, fru_with_board_name("Sled2"))]),
        );
        // Same name would be needed for suppression; different images get
        // separate paths regardless of mux status.
        let planned = plan_publication(&map, &|bus| bus == 5);
        assert_eq!(planned.len(), 2);
    }

    #[test]
    fn mux_duplicate_same_bytes_different_address_kept() {
        let raw = fru_with_board_name("Sled");
        let mut map = one_device(1, 0x50, raw.clone());
        map.insert(5, BTreeMap::from([(0x52, raw)]));
        let planned = plan_publication(&map, &|bus| bus == 5);
        assert_eq!(planned.len(), 2);
        assert_eq!(
            planned[1].path,
            "/xyz/openbmc_project/FruDevice/Sled_0"
        );
    }

    #[test]
    fn undecodable_devices_dropped() {
        let map = one_device(1, 0x50, vec![0xFF; 24]);
        assert!(plan_publication(&map, &no_mux).is_empty());
    }

    #[test]
    fn baseboard_skips_collision_handling() {
        let raw = fru_with_board_name("Node");
        let mut map = one_device(0, 0, raw.clone());
        map.insert(1, BTreeMap::from([(0x50, raw)]));
        // Bus 0 plans first and keeps the bare path; the physical device
        // collides and gets numbered.
        let planned = plan_publication(&map, &no_mux);
        assert_eq!(planned[0].path, "/xyz/openbmc_project/FruDevice/Node");
        assert_eq!(planned[1].path, "/xyz/openbmc_project/FruDevice/Node_0");
    }
}
