// SPDX-License-Identifier: GPL-3.0-only

#[cfg(feature = "systemd")]
pub mod login1_session;
