// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Chassis power signal subscription.
//!
//! Devices behind power-gated rails only answer once the chassis reports
//! power-good, so any `pgood` property change is worth a rescan.

use std::collections::HashMap;

use futures_util::StreamExt;
use log::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;
use zbus::zvariant::OwnedValue;
use zbus::{Connection, MatchRule, MessageStream};

const POWER_PATH: &str = "/xyz/openbmc_project/Chassis/Control/Power0";
const POWER_INTERFACE: &str = "xyz.openbmc_project.Chassis.Control.Power";

/// Feeds rescan triggers from chassis power transitions until the daemon
/// exits. Subscription failure is logged and tolerated; the rest of the
/// daemon works without the signal.
pub async fn power_task(conn: Connection, tx: UnboundedSender<()>) {
    if let Err(e) = watch_power(&conn, &tx).await {
        warn!("chassis power signal subscription failed: {e}");
    }
}

async fn watch_power(
    conn: &Connection,
    tx: &UnboundedSender<()>,
) -> zbus::Result<()> {
    let rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface("org.freedesktop.DBus.Properties")?
        .path(POWER_PATH)?
        .arg(0, POWER_INTERFACE)?
        .build();
    let mut stream = MessageStream::for_match_rule(rule, conn, None).await?;

    while let Some(msg) = stream.next().await {
        let msg = msg?;
        let body = msg.body();
        let Ok((_interface, changed, _invalidated)) = body.deserialize::<(
            String,
            HashMap<String, OwnedValue>,
            Vec<String>,
        )>() else {
            continue;
        };
        if changed.contains_key("pgood") {
            debug!("chassis pgood transition");
            if tx.send(()).is_err() {
                break;
            }
        }
    }
    Ok(())
}
