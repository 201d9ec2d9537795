// SPDX-License-Identifier: GPL-3.0-only

use libsystemd::daemon::{booted, notify, NotifyState};
use tracing::error;

/// Tells systemd the initial configuration has been applied.
pub fn ready() {
    if booted() {
        if let Err(err) = notify(false, &[NotifyState::Ready]) {
            error!(?err, "Failed to notify systemd");
        }
    }
}
