// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The rescan orchestrator and per-bus scan workers.
//!
//! Each rescan builds a fresh generation: enumerate, scan, swap the shared
//! map, tear down every published object, publish the new set. A bus scan
//! runs on its own thread because the underlying ioctls block; the
//! orchestrator waits on the worker with a deadline and abandons it on
//! expiry (the in-flight syscall cannot be interrupted, so the thread gets
//! to unwind on its own and the bus handle closes with it).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use zbus::Connection;

use crate::blacklist::Blacklist;
use crate::{baseboard, dbus, enumerate, publish};
use crate::{BusMap, DeviceMap, Shared, DEBOUNCE, SCAN_TIMEOUT};

enum BusScan {
    Complete(DeviceMap),
    TimedOut,
    Skipped,
}

/// Scans one bus on a worker thread, bounded by `deadline`.
fn scan_bus(path: &Path, first: u8, last: u8, deadline: Duration) -> BusScan {
    let mut bus = match i2c_smbus::I2cBus::open(path) {
        Ok(bus) => bus,
        Err(e) => {
            warn!("unable to open {}: {e}", path.display());
            return BusScan::Skipped;
        }
    };
    match bus.supports_fru_reads() {
        Ok(true) => (),
        Ok(false) => {
            warn!(
                "{}: adapter lacks SMBus byte read or block read",
                path.display()
            );
            return BusScan::Skipped;
        }
        Err(e) => {
            warn!(
                "{}: cannot query adapter functionality: {e}",
                path.display()
            );
            return BusScan::Skipped;
        }
    }

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let devices = fru_scan::scan_addresses(&mut bus, first, last);
        // If the deadline already passed, the receiver is gone; the bus
        // handle closes when this thread exits either way.
        let _ = tx.send(devices);
    });
    match rx.recv_timeout(deadline) {
        Ok(devices) => BusScan::Complete(devices),
        Err(_) => BusScan::TimedOut,
    }
}

/// Scans every non-blacklisted bus in enumeration order. Returns the
/// discoveries and the buses that timed out and now belong on the
/// blacklist.
fn scan_all(
    buses: &[(u32, PathBuf)],
    blacklist: &Blacklist,
    first: u8,
    last: u8,
) -> (BusMap, Vec<u32>) {
    let mut map = BusMap::new();
    let mut timed_out = Vec::new();
    for (index, path) in buses {
        if blacklist.contains(*index) {
            continue;
        }
        debug!("scanning bus {index}");
        match scan_bus(path, first, last, SCAN_TIMEOUT) {
            BusScan::Complete(devices) => {
                if !devices.is_empty() {
                    map.insert(*index, devices);
                }
            }
            BusScan::TimedOut => {
                error!(
                    "bus {index} did not finish within {SCAN_TIMEOUT:?}; \
                     blacklisting"
                );
                timed_out.push(*index);
            }
            BusScan::Skipped => (),
        }
    }
    (map, timed_out)
}

/// Debounces rescan triggers and runs one rescan at a time.
pub async fn orchestrate(
    shared: Arc<Shared>,
    conn: Connection,
    mut rx: UnboundedReceiver<()>,
) {
    let mut published: Vec<String> = Vec::new();
    while rx.recv().await.is_some() {
        // Every further trigger restarts the window, so a burst of events
        // becomes a single scan.
        loop {
            match timeout(DEBOUNCE, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        run_rescan(&shared, &conn, &mut published).await;
    }
}

async fn run_rescan(
    shared: &Arc<Shared>,
    conn: &Connection,
    published: &mut Vec<String>,
) {
    let buses = enumerate::i2c_buses(&shared.args.dev_dir);
    if buses.is_empty() {
        warn!("no i2c buses to scan");
    }
    let blacklist = shared.state.lock().unwrap().blacklist.clone();
    let first = shared.args.first_address;
    let last = shared.args.last_address;

    let worker = tokio::task::spawn_blocking(move || {
        scan_all(&buses, &blacklist, first, last)
    });
    let (mut bus_map, timed_out) = match worker.await {
        Ok(result) => result,
        Err(e) => {
            error!("scan worker failed: {e}");
            return;
        }
    };

    if let Some(fru) = baseboard::read(&shared.args.baseboard) {
        bus_map.insert(0, BTreeMap::from([(0u8, fru)]));
    }

    // Swap in the new generation before touching the object set, so
    // GetRawFru answers match what is about to be published.
    {
        let mut state = shared.state.lock().unwrap();
        for bus in &timed_out {
            state.blacklist.add(*bus);
        }
        state.bus_map = bus_map.clone();
    }

    let server = conn.object_server();
    for path in published.drain(..) {
        if let Err(e) =
            server.remove::<dbus::FruDevice, _>(path.as_str()).await
        {
            debug!("removing {path}: {e}");
        }
    }

    let planned = publish::plan_publication(&bus_map, &publish::is_mux_bus);
    info!("publishing {} FRU object(s)", planned.len());
    for object in planned {
        let path = object.path.clone();
        match server.at(path.as_str(), dbus::FruDevice::new(object)).await {
            Ok(true) => published.push(path),
            Ok(false) => warn!("object already registered at {path}"),
            Err(e) => warn!("cannot publish {path}: {e}"),
        }
    }
}
