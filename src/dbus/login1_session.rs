// SPDX-License-Identifier: GPL-3.0-only

#[zbus::proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1/session/auto"
)]
pub trait Login1Session {
    /// Writes a backlight or LED device on behalf of the session, without
    /// needing write access to sysfs.
    fn set_brightness(&self, subsystem: &str, name: &str, brightness: u32) -> zbus::Result<()>;
}
