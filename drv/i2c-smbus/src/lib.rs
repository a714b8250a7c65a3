// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thin wrapper over a Linux `/dev/i2c-N` character device.
//!
//! Exposes exactly the SMBus transfers the FRU machinery needs: receive
//! byte, read/write byte data, and I2C block read, all routed through the
//! `I2C_SMBUS` ioctl. Slave selection always uses `I2C_SLAVE_FORCE`, since
//! EEPROMs of interest are frequently bound to a kernel driver already.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

/// Largest block transfer the SMBus protocol allows.
pub const SMBUS_BLOCK_MAX: usize = 32;

/// Adapter functionality bit for the SMBus receive-byte transfer.
pub const FUNC_SMBUS_READ_BYTE: u64 = 0x0002_0000;

/// Adapter functionality bit for the I2C block-read transfer.
pub const FUNC_SMBUS_READ_I2C_BLOCK: u64 = 0x0400_0000;

mod ffi {
    //! ioctl numbers and argument layout from `linux/i2c-dev.h` and
    //! `linux/i2c.h`.

    pub const I2C_SLAVE_FORCE: libc::c_ulong = 0x0706;
    pub const I2C_FUNCS: libc::c_ulong = 0x0705;
    pub const I2C_SMBUS: libc::c_ulong = 0x0720;

    pub const I2C_SMBUS_READ: u8 = 1;
    pub const I2C_SMBUS_WRITE: u8 = 0;

    pub const I2C_SMBUS_BYTE: u32 = 1;
    pub const I2C_SMBUS_BYTE_DATA: u32 = 2;
    pub const I2C_SMBUS_I2C_BLOCK_DATA: u32 = 8;

    /// Block payloads carry a leading length byte plus a trailing PEC slot.
    pub const I2C_SMBUS_BLOCK_LEN: usize = super::SMBUS_BLOCK_MAX + 2;

    #[repr(C)]
    pub union I2cSmbusData {
        pub byte: u8,
        pub word: u16,
        pub block: [u8; I2C_SMBUS_BLOCK_LEN],
    }

    #[repr(C)]
    pub struct I2cSmbusIoctlData {
        pub read_write: u8,
        pub command: u8,
        pub size: u32,
        pub data: *mut I2cSmbusData,
    }
}

/// An opened I2C bus device node.
///
/// The underlying file descriptor is closed on drop. A bus handle carries no
/// slave address state of its own beyond what the kernel tracks for the fd;
/// callers re-select before talking to a different device.
#[derive(Debug)]
pub struct I2cBus {
    file: File,
}

impl I2cBus {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Returns the adapter functionality word (`I2C_FUNCS`).
    pub fn funcs(&self) -> io::Result<u64> {
        let mut funcs: libc::c_ulong = 0;
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), ffi::I2C_FUNCS, &mut funcs)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(funcs as u64)
    }

    /// Checks that the adapter can run both transfers the scanner depends
    /// on: SMBus receive byte and I2C block read.
    pub fn supports_fru_reads(&self) -> io::Result<bool> {
        let funcs = self.funcs()?;
        Ok(funcs & FUNC_SMBUS_READ_BYTE != 0
            && funcs & FUNC_SMBUS_READ_I2C_BLOCK != 0)
    }

    /// Selects `addr` as the target slave, overriding any kernel driver
    /// bound to it.
    pub fn set_slave_force(&self, addr: u8) -> io::Result<()> {
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                ffi::I2C_SLAVE_FORCE,
                libc::c_ulong::from(addr),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn smbus_xfer(
        &self,
        read_write: u8,
        command: u8,
        size: u32,
        data: *mut ffi::I2cSmbusData,
    ) -> io::Result<()> {
        let mut args = ffi::I2cSmbusIoctlData {
            read_write,
            command,
            size,
            data,
        };
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), ffi::I2C_SMBUS, &mut args)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// SMBus receive byte: reads one byte from the selected slave without
    /// naming a register.
    pub fn read_byte(&self) -> io::Result<u8> {
        let mut data = ffi::I2cSmbusData { byte: 0 };
        self.smbus_xfer(
            ffi::I2C_SMBUS_READ,
            0,
            ffi::I2C_SMBUS_BYTE,
            &mut data,
        )?;
        Ok(unsafe { data.byte })
    }

    /// SMBus read byte data: reads one byte from register `reg`.
    pub fn read_byte_data(&self, reg: u8) -> io::Result<u8> {
        let mut data = ffi::I2cSmbusData { byte: 0 };
        self.smbus_xfer(
            ffi::I2C_SMBUS_READ,
            reg,
            ffi::I2C_SMBUS_BYTE_DATA,
            &mut data,
        )?;
        Ok(unsafe { data.byte })
    }

    /// SMBus write byte data: writes `value` to register `reg`.
    pub fn write_byte_data(&self, reg: u8, value: u8) -> io::Result<()> {
        let mut data = ffi::I2cSmbusData { byte: value };
        self.smbus_xfer(
            ffi::I2C_SMBUS_WRITE,
            reg,
            ffi::I2C_SMBUS_BYTE_DATA,
            &mut data,
        )
    }

    /// I2C block read: fills `buf` (at most [`SMBUS_BLOCK_MAX`] bytes) from
    /// registers starting at `reg`. Returns the number of bytes the adapter
    /// produced, which may be shorter than requested.
    pub fn read_i2c_block(&self, reg: u8, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || buf.len() > SMBUS_BLOCK_MAX {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        let mut block = [0u8; ffi::I2C_SMBUS_BLOCK_LEN];
        block[0] = buf.len() as u8;
        let mut data = ffi::I2cSmbusData { block };
        self.smbus_xfer(
            ffi::I2C_SMBUS_READ,
            reg,
            ffi::I2C_SMBUS_I2C_BLOCK_DATA,
            &mut data,
        )?;
        let block = unsafe { &data.block };
        let got = usize::from(block[0]).min(buf.len());
        buf[..got].copy_from_slice(&block[1..1 + got]);
        Ok(got)
    }
}
