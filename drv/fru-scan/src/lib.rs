// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FRU discovery and write engine for I2C EEPROMs.
//!
//! Everything here is generic over [`FruEeprom`], a trait modeling an opened
//! bus handle: the real implementation sits on top of
//! [`i2c_smbus::I2cBus`], and tests drive the same code against simulated
//! devices. The engine handles the two EEPROM addressing flavors found in
//! the field (8-bit register-addressed parts and 16-bit parts with an
//! internal byte pointer), assembles whole FRU images area by area, and
//! writes images back one byte at a time across page-select address
//! boundaries.

use std::collections::BTreeMap;
use std::io;
use std::thread;
use std::time::Duration;

use i2c_smbus::{I2cBus, SMBUS_BLOCK_MAX};
use ipmi_fru::{CommonHeader, COMMON_HEADER_SIZE};
use log::{debug, error};
use thiserror::Error;

/// First slave address probed, matching the range i2cdetect uses.
pub const FIRST_SCAN_ADDR: u8 = 0x03;

/// Last slave address probed.
pub const LAST_SCAN_ADDR: u8 = 0x77;

/// Byte index span covered by one slave address on a paged EEPROM.
pub const EEPROM_PAGE_SIZE: usize = 256;

/// Additional attempts allowed per byte before a write is abandoned.
pub const WRITE_RETRY_MAX: u8 = 2;

/// EEPROM write cycle time; the part ignores traffic while committing a
/// byte.
pub const WRITE_CYCLE: Duration = Duration::from_millis(10);

/// Operations the engine needs from an opened bus handle.
pub trait FruEeprom {
    /// Targets `addr`, overriding any driver already bound to it.
    fn set_slave(&mut self, addr: u8) -> io::Result<()>;
    /// SMBus receive byte, used as a liveness probe.
    fn receive_byte(&mut self) -> io::Result<u8>;
    /// SMBus read byte data from register `reg`.
    fn read_byte_data(&mut self, reg: u8) -> io::Result<u8>;
    /// SMBus write byte data to register `reg`.
    fn write_byte_data(&mut self, reg: u8, value: u8) -> io::Result<()>;
    /// I2C block read of `buf.len()` bytes starting at register `reg`.
    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> io::Result<usize>;
    /// Waits out the EEPROM write cycle after an accepted byte.
    fn write_cycle_pause(&mut self);
}

impl FruEeprom for I2cBus {
    fn set_slave(&mut self, addr: u8) -> io::Result<()> {
        self.set_slave_force(addr)
    }

    fn receive_byte(&mut self) -> io::Result<u8> {
        self.read_byte()
    }

    fn read_byte_data(&mut self, reg: u8) -> io::Result<u8> {
        I2cBus::read_byte_data(self, reg)
    }

    fn write_byte_data(&mut self, reg: u8, value: u8) -> io::Result<()> {
        I2cBus::write_byte_data(self, reg, value)
    }

    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> io::Result<usize> {
        self.read_i2c_block(reg, buf)
    }

    fn write_cycle_pause(&mut self) {
        thread::sleep(WRITE_CYCLE);
    }
}

/// How a device interprets the byte offsets we hand it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Addressing {
    /// The register number is the full EEPROM offset.
    EightBit,
    /// The device keeps an internal byte pointer; the offset is split into
    /// a pointer write and a high-byte tag.
    SixteenBit,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("bus transfer failed")]
    Io(#[from] io::Error),
    #[error("EEPROM write failed at byte {index}")]
    WriteFailed {
        index: usize,
        #[source]
        source: io::Error,
    },
}

/// Classifies a selected device as 8-bit or 16-bit addressed.
///
/// Register 0 is read eight times. An 8-bit part decodes the register
/// number and returns the same byte every time; a 16-bit part ignores it
/// and streams successive bytes from its internal pointer. The first eight
/// bytes of a FRU are a structured header, so a 16-bit part is
/// overwhelmingly likely to show a difference.
pub fn detect_addressing<D: FruEeprom>(dev: &mut D) -> io::Result<Addressing> {
    if cfg!(feature = "force-16bit") {
        return Ok(Addressing::SixteenBit);
    }
    let first = dev.read_byte_data(0)?;
    for _ in 0..7 {
        if dev.read_byte_data(0)? != first {
            return Ok(Addressing::SixteenBit);
        }
    }
    Ok(Addressing::EightBit)
}

/// Fills `buf` from the EEPROM starting at `offset`.
///
/// For 16-bit parts the low offset byte is first written to register 0 to
/// position the internal pointer, and the block read carries the high byte;
/// this is the split real parts accept. `buf` must not exceed the SMBus
/// block limit.
pub fn read_at<D: FruEeprom>(
    dev: &mut D,
    addressing: Addressing,
    offset: u16,
    buf: &mut [u8],
) -> io::Result<()> {
    let got = match addressing {
        Addressing::EightBit => dev.read_block(offset as u8, buf)?,
        Addressing::SixteenBit => {
            dev.write_byte_data(0, offset as u8)?;
            dev.read_block((offset >> 8) as u8, buf)?
        }
    };
    if got < buf.len() {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
    }
    Ok(())
}

/// Reads the areas a validated common header declares, returning the
/// assembled FRU image (header first, then each area in slot order).
///
/// Each area starts with its own 8-byte header whose second byte gives the
/// area length in multiples of 8; the remainder is pulled in block-sized
/// chunks.
pub fn read_areas<D: FruEeprom>(
    dev: &mut D,
    addressing: Addressing,
    header: &[u8; COMMON_HEADER_SIZE],
) -> io::Result<Vec<u8>> {
    let mut raw = header.to_vec();
    for &offset_mult in &header[1..6] {
        if offset_mult == 0 {
            continue;
        }
        let mut offset = u16::from(offset_mult) * 8;
        let mut area_header = [0u8; 8];
        read_at(dev, addressing, offset, &mut area_header)?;
        raw.extend_from_slice(&area_header);
        offset += 8;

        let declared = usize::from(area_header[1]) * 8;
        let mut remaining = declared.saturating_sub(8);
        while remaining > 0 {
            let chunk = remaining.min(SMBUS_BLOCK_MAX);
            let mut buf = [0u8; SMBUS_BLOCK_MAX];
            read_at(dev, addressing, offset, &mut buf[..chunk])?;
            raw.extend_from_slice(&buf[..chunk]);
            offset += chunk as u16;
            remaining -= chunk;
        }
    }
    Ok(raw)
}

/// Walks slave addresses `first..=last` and collects every device carrying
/// a valid FRU header.
///
/// Per-address failures (nothing answering, probe errors, bad headers) skip
/// that address. A transfer failure while pulling a validated device's
/// areas abandons the rest of the bus; devices collected before the failure
/// are kept.
pub fn scan_addresses<D: FruEeprom>(
    dev: &mut D,
    first: u8,
    last: u8,
) -> BTreeMap<u8, Vec<u8>> {
    let mut found = BTreeMap::new();
    for addr in first..=last {
        if dev.set_slave(addr).is_err() {
            debug!("address {addr:#04x} busy");
            continue;
        }
        if dev.receive_byte().is_err() {
            continue;
        }
        let addressing = match detect_addressing(dev) {
            Ok(a) => a,
            Err(e) => {
                debug!("addressing probe failed at {addr:#04x}: {e}");
                continue;
            }
        };
        let mut header = [0u8; COMMON_HEADER_SIZE];
        if read_at(dev, addressing, 0, &mut header).is_err() {
            debug!("header read failed at {addr:#04x}");
            continue;
        }
        let valid = CommonHeader::parse(&header)
            .map(|h| h.validate())
            .unwrap_or(false);
        if !valid {
            continue;
        }
        match read_areas(dev, addressing, &header) {
            Ok(raw) => {
                debug!("FRU at {addr:#04x}, {} bytes", raw.len());
                found.insert(addr, raw);
            }
            Err(e) => {
                error!("area read failed at {addr:#04x}: {e}");
                break;
            }
        }
    }
    found
}

/// Writes a FRU image to the EEPROM at `address`, one byte per SMBus
/// write.
///
/// Every accepted byte is followed by a write-cycle pause. A failed byte
/// is retried up to [`WRITE_RETRY_MAX`] more times; three consecutive
/// failures at the same index abandon the write. Crossing a 256-byte page
/// boundary bumps the slave address by one, since paged parts use low
/// device-address bits as a page selector.
pub fn write_fru<D: FruEeprom>(
    dev: &mut D,
    address: u8,
    data: &[u8],
) -> Result<(), ScanError> {
    let mut address = address;
    dev.set_slave(address)?;
    let mut index = 0usize;
    let mut retries = WRITE_RETRY_MAX;
    while index < data.len() {
        if index != 0
            && index % EEPROM_PAGE_SIZE == 0
            && retries == WRITE_RETRY_MAX
        {
            address += 1;
            dev.set_slave(address)?;
        }
        match dev.write_byte_data(index as u8, data[index]) {
            Ok(()) => {
                retries = WRITE_RETRY_MAX;
                index += 1;
            }
            Err(source) => {
                if retries == 0 {
                    return Err(ScanError::WriteFailed { index, source });
                }
                retries -= 1;
            }
        }
        dev.write_cycle_pause();
    }
    Ok(())
}
