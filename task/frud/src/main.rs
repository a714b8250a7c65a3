// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FRU inventory daemon.
//!
//! Probes every accessible I2C bus for EEPROMs carrying IPMI FRU data,
//! publishes each discovered FRU as an object on the system bus, and
//! accepts whole-image rewrites. Rescans are debounced and retriggered by
//! D-Bus request, successful writes, chassis power transitions, and i2c
//! device nodes appearing or disappearing.
//!
//! The event loop is a single-threaded tokio runtime; bus scanning runs on
//! worker threads so a wedged bus cannot stall the daemon, and each bus is
//! given a hard deadline before it is blacklisted.

use std::collections::BTreeMap;
use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use tokio::sync::mpsc;
use zbus::connection;

mod baseboard;
mod blacklist;
mod dbus;
mod enumerate;
mod power;
mod publish;
mod scanner;
mod version;
mod watch;
mod writer;

use blacklist::Blacklist;

/// Raw FRU images on one bus, keyed by slave address.
pub type DeviceMap = BTreeMap<u8, Vec<u8>>;

/// Discovered buses, keyed by bus index. Index 0 is reserved for the
/// file-backed baseboard FRU.
pub type BusMap = BTreeMap<u32, DeviceMap>;

/// Wall-clock limit for one bus before it is abandoned and blacklisted.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Window during which bursts of rescan triggers coalesce into one scan.
pub const DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(about = "IPMI FRU EEPROM discovery daemon")]
pub struct Args {
    /// Directory holding the i2c-N device nodes.
    #[arg(long, default_value = "/dev")]
    pub dev_dir: PathBuf,

    /// Optional JSON file naming buses to skip.
    #[arg(long, default_value = "/usr/share/frud/blacklist.json")]
    pub blacklist: PathBuf,

    /// File-backed FRU published as bus 0, address 0.
    #[arg(long, default_value = baseboard::BASEBOARD_FRU_PATH)]
    pub baseboard: PathBuf,

    /// Directory for the firmware-version tracking file.
    #[arg(long, default_value = version::CONFIGURATION_DIR)]
    pub config_dir: PathBuf,

    /// First slave address probed on each bus.
    #[arg(long, default_value_t = fru_scan::FIRST_SCAN_ADDR)]
    pub first_address: u8,

    /// Last slave address probed on each bus.
    #[arg(long, default_value_t = fru_scan::LAST_SCAN_ADDR)]
    pub last_address: u8,
}

/// State shared between the D-Bus interfaces and the rescan orchestrator.
pub struct Shared {
    pub state: Mutex<State>,
    pub rescan: mpsc::UnboundedSender<()>,
    pub args: Args,
}

#[derive(Default)]
pub struct State {
    pub bus_map: BusMap,
    pub blacklist: Blacklist,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();
    let args = Args::parse();

    if enumerate::i2c_buses(&args.dev_dir).is_empty() {
        bail!("no i2c bus device nodes under {}", args.dev_dir.display());
    }

    let blacklist = Blacklist::load(&args.blacklist).with_context(|| {
        format!("loading blacklist {}", args.blacklist.display())
    })?;

    if version::fw_version_changed(
        &args.config_dir,
        Path::new(version::OS_RELEASE),
    ) {
        info!("firmware version changed since last run");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            bus_map: BusMap::new(),
            blacklist,
        }),
        rescan: tx.clone(),
        args,
    });

    let conn = connection::Builder::system()?
        .name(dbus::SERVICE_NAME)?
        .serve_at(
            dbus::MANAGER_PATH,
            dbus::FruDeviceManager::new(shared.clone()),
        )?
        .build()
        .await?;
    info!("claimed {} on the system bus", dbus::SERVICE_NAME);

    tokio::spawn(watch::watch_task(shared.args.dev_dir.clone(), tx.clone()));
    tokio::spawn(power::power_task(conn.clone(), tx.clone()));
    tokio::spawn(scanner::orchestrate(shared, conn, rx));

    // Kick off the initial scan.
    let _ = tx.send(());

    pending::<()>().await;
    Ok(())
}
