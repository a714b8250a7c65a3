// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device-node watch.
//!
//! An inotify descriptor on the device directory, driven through the
//! event loop with `AsyncFd`. Only events whose name starts with `i2c`
//! matter; everything else in /dev is noise to us.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::warn;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc::UnboundedSender;

const EVENT_MASK: u32 =
    libc::IN_CREATE | libc::IN_MOVED_TO | libc::IN_DELETE;

/// Byte offsets into `struct inotify_event`.
const EVENT_HEADER: usize = std::mem::size_of::<libc::inotify_event>();

pub struct DevWatch {
    fd: AsyncFd<OwnedFd>,
}

impl DevWatch {
    pub fn new(dir: &Path) -> io::Result<Self> {
        let fd = unsafe {
            libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        let dir_c = std::ffi::CString::new(dir.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let wd = unsafe {
            libc::inotify_add_watch(
                owned.as_raw_fd(),
                dir_c.as_ptr(),
                EVENT_MASK,
            )
        };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: AsyncFd::new(owned)?,
        })
    }

    /// Waits until an `i2c*` node is created, moved in, or deleted.
    pub async fn next_i2c_event(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            let mut guard = self.fd.readable().await?;
            let read = guard.try_io(|inner| {
                let n = unsafe {
                    libc::read(
                        inner.get_ref().as_raw_fd(),
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match read {
                Ok(Ok(n)) => {
                    if batch_names_i2c(&buf[..n]) {
                        return Ok(());
                    }
                }
                Ok(Err(e)) => return Err(e),
                // Spurious readiness; wait again.
                Err(_would_block) => continue,
            }
        }
    }
}

/// Walks one batch of inotify events, looking for a matching event whose
/// name starts with `i2c`. Names are NUL-padded out to the declared
/// length.
fn batch_names_i2c(buf: &[u8]) -> bool {
    let mut offset = 0;
    while offset + EVENT_HEADER <= buf.len() {
        let mask = u32::from_ne_bytes([
            buf[offset + 4],
            buf[offset + 5],
            buf[offset + 6],
            buf[offset + 7],
        ]);
        let name_len = u32::from_ne_bytes([
            buf[offset + 12],
            buf[offset + 13],
            buf[offset + 14],
            buf[offset + 15],
        ]) as usize;
        let start = offset + EVENT_HEADER;
        let end = (start + name_len).min(buf.len());
        if mask & EVENT_MASK != 0 && buf[start..end].starts_with(b"i2c") {
            return true;
        }
        offset = end;
    }
    false
}

/// Feeds rescan triggers from device-node churn until the daemon exits.
pub async fn watch_task(dir: PathBuf, tx: UnboundedSender<()>) {
    let mut watch = match DevWatch::new(&dir) {
        Ok(watch) => watch,
        Err(e) => {
            warn!("cannot watch {}: {e}", dir.display());
            return;
        }
    };
    loop {
        match watch.next_i2c_event().await {
            Ok(()) => {
                if tx.send(()).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("device watch failed: {e}");
                return;
            }
        }
    }
}
