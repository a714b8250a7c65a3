// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! D-Bus surface: the FRU manager interface and the per-device objects.
//!
//! Device objects expose the full decoded vocabulary as string properties.
//! The vocabulary is fixed, so every key is declared on the interface and
//! fields the FRU does not carry read as empty strings; sdbusplus-based
//! consumers treat the two the same way.

use std::sync::Arc;

use indexmap::IndexMap;
use log::info;
use zbus::{fdo, interface};

use crate::publish::PlannedObject;
use crate::{writer, Shared};

pub const SERVICE_NAME: &str = "xyz.openbmc_project.FruDevice";
pub const MANAGER_PATH: &str = "/xyz/openbmc_project/FruDevice";

pub struct FruDeviceManager {
    shared: Arc<Shared>,
}

impl FruDeviceManager {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[interface(name = "xyz.openbmc_project.FruDeviceManager")]
impl FruDeviceManager {
    /// Schedules a rescan, subject to the debounce window.
    fn re_scan(&self) {
        let _ = self.shared.rescan.send(());
    }

    /// Returns the raw image of a discovered FRU.
    fn get_raw_fru(&self, bus: u8, address: u8) -> fdo::Result<Vec<u8>> {
        let state = self.shared.state.lock().unwrap();
        state
            .bus_map
            .get(&u32::from(bus))
            .and_then(|devices| devices.get(&address))
            .cloned()
            .ok_or_else(|| {
                fdo::Error::InvalidArgs(format!(
                    "no FRU at bus {bus} address {address}"
                ))
            })
    }

    /// Validates and writes a FRU image, then schedules a rescan.
    async fn write_fru(
        &self,
        bus: u8,
        address: u8,
        data: Vec<u8>,
    ) -> fdo::Result<()> {
        let dev_dir = self.shared.args.dev_dir.clone();
        let baseboard = self.shared.args.baseboard.clone();
        // A full image takes seconds of write-cycle pauses; keep it off
        // the event loop.
        let result = tokio::task::spawn_blocking(move || {
            writer::write_fru(&dev_dir, &baseboard, bus, address, &data)
        })
        .await
        .map_err(|e| fdo::Error::Failed(e.to_string()))?;

        match result {
            Ok(()) => {
                info!("wrote FRU at bus {bus} address {address:#04x}");
                let _ = self.shared.rescan.send(());
                Ok(())
            }
            Err(writer::WriteError::InvalidArgument(msg)) => {
                Err(fdo::Error::InvalidArgs(msg))
            }
            Err(writer::WriteError::Internal(msg)) => {
                Err(fdo::Error::Failed(msg))
            }
        }
    }
}

/// One discovered FRU, published under a product-name-derived path.
pub struct FruDevice {
    bus: u32,
    address: u32,
    fields: IndexMap<String, String>,
}

impl FruDevice {
    pub fn new(object: PlannedObject) -> Self {
        Self {
            bus: object.bus,
            address: u32::from(object.address),
            fields: object.fields,
        }
    }

    fn field(&self, key: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_default()
    }
}

#[interface(name = "xyz.openbmc_project.FruDevice")]
impl FruDevice {
    #[zbus(property, name = "BUS")]
    fn bus(&self) -> u32 {
        self.bus
    }

    #[zbus(property, name = "ADDRESS")]
    fn address(&self) -> u32 {
        self.address
    }

    #[zbus(property, name = "Common_Format_Version")]
    fn common_format_version(&self) -> String {
        self.field("Common_Format_Version")
    }

    #[zbus(property, name = "CHASSIS_TYPE")]
    fn chassis_type(&self) -> String {
        self.field("CHASSIS_TYPE")
    }

    #[zbus(property, name = "CHASSIS_PART_NUMBER")]
    fn chassis_part_number(&self) -> String {
        self.field("CHASSIS_PART_NUMBER")
    }

    #[zbus(property, name = "CHASSIS_SERIAL_NUMBER")]
    fn chassis_serial_number(&self) -> String {
        self.field("CHASSIS_SERIAL_NUMBER")
    }

    #[zbus(property, name = "CHASSIS_INFO_AM1")]
    fn chassis_info_am1(&self) -> String {
        self.field("CHASSIS_INFO_AM1")
    }

    #[zbus(property, name = "CHASSIS_INFO_AM2")]
    fn chassis_info_am2(&self) -> String {
        self.field("CHASSIS_INFO_AM2")
    }

    #[zbus(property, name = "BOARD_LANGUAGE_CODE")]
    fn board_language_code(&self) -> String {
        self.field("BOARD_LANGUAGE_CODE")
    }

    #[zbus(property, name = "BOARD_MANUFACTURE_DATE")]
    fn board_manufacture_date(&self) -> String {
        self.field("BOARD_MANUFACTURE_DATE")
    }

    #[zbus(property, name = "BOARD_MANUFACTURER")]
    fn board_manufacturer(&self) -> String {
        self.field("BOARD_MANUFACTURER")
    }

    #[zbus(property, name = "BOARD_PRODUCT_NAME")]
    fn board_product_name(&self) -> String {
        self.field("BOARD_PRODUCT_NAME")
    }

    #[zbus(property, name = "BOARD_SERIAL_NUMBER")]
    fn board_serial_number(&self) -> String {
        self.field("BOARD_SERIAL_NUMBER")
    }

    #[zbus(property, name = "BOARD_PART_NUMBER")]
    fn board_part_number(&self) -> String {
        self.field("BOARD_PART_NUMBER")
    }

    #[zbus(property, name = "BOARD_FRU_VERSION_ID")]
    fn board_fru_version_id(&self) -> String {
        self.field("BOARD_FRU_VERSION_ID")
    }

    #[zbus(property, name = "BOARD_INFO_AM1")]
    fn board_info_am1(&self) -> String {
        self.field("BOARD_INFO_AM1")
    }

    #[zbus(property, name = "BOARD_INFO_AM2")]
    fn board_info_am2(&self) -> String {
        self.field("BOARD_INFO_AM2")
    }

    #[zbus(property, name = "PRODUCT_LANGUAGE_CODE")]
    fn product_language_code(&self) -> String {
        self.field("PRODUCT_LANGUAGE_CODE")
    }

    #[zbus(property, name = "PRODUCT_MANUFACTURER")]
    fn product_manufacturer(&self) -> String {
        self.field("PRODUCT_MANUFACTURER")
    }

    #[zbus(property, name = "PRODUCT_PRODUCT_NAME")]
    fn product_product_name(&self) -> String {
        self.field("PRODUCT_PRODUCT_NAME")
    }

    #[zbus(property, name = "PRODUCT_PART_NUMBER")]
    fn product_part_number(&self) -> String {
        self.field("PRODUCT_PART_NUMBER")
    }

    #[zbus(property, name = "PRODUCT_VERSION")]
    fn product_version(&self) -> String {
        self.field("PRODUCT_VERSION")
    }

    #[zbus(property, name = "PRODUCT_SERIAL_NUMBER")]
    fn product_serial_number(&self) -> String {
        self.field("PRODUCT_SERIAL_NUMBER")
    }

    #[zbus(property, name = "PRODUCT_ASSET_TAG")]
    fn product_asset_tag(&self) -> String {
        self.field("PRODUCT_ASSET_TAG")
    }

    #[zbus(property, name = "PRODUCT_FRU_VERSION_ID")]
    fn product_fru_version_id(&self) -> String {
        self.field("PRODUCT_FRU_VERSION_ID")
    }

    #[zbus(property, name = "PRODUCT_INFO_AM1")]
    fn product_info_am1(&self) -> String {
        self.field("PRODUCT_INFO_AM1")
    }

    #[zbus(property, name = "PRODUCT_INFO_AM2")]
    fn product_info_am2(&self) -> String {
        self.field("PRODUCT_INFO_AM2")
    }
}
