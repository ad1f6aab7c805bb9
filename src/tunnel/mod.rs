//! Allocation of virtual point-to-point tunnel interfaces.
//!
//! There is no atomic "give me any free unit" primitive, so units are claimed by trial over a small
//! contiguous range. Other processes (including other VPN clients) race for the same units, which makes a
//! failed candidate routine rather than an error.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;


use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use crate::config::TunnelConfig;
use crate::errors::TunnelCreateError;

#[cfg(target_os = "linux")]
pub use linux::SystemTunControl;
#[cfg(target_os = "macos")]
pub use macos::SystemTunControl;

/// Platform seam for everything the provisioner needs from the OS.
pub trait TunControl {
    /// Open a fresh close-on-exec descriptor and bind it to `unit`.
    fn connect(&self, unit: u32) -> io::Result<OwnedFd>;
    /// Interface name the platform assigns to `unit`.
    fn interface_name(&self, unit: u32) -> String;
    fn mtu(&self, fd: BorrowedFd<'_>, name: &str) -> io::Result<u32>;
    fn set_mtu(&self, fd: BorrowedFd<'_>, name: &str, mtu: u32) -> io::Result<()>;
}

/// Exclusive owner of one tunnel interface descriptor.
///
/// The descriptor is closed when the handle is dropped. An invalid handle carries no descriptor and all
/// interface operations on it fail.
#[derive(Debug)]
pub struct TunnelHandle {
    fd: Option<OwnedFd>,
    unit: u32,
    name: String,
    mtu: Option<u32>,
}

impl TunnelHandle {
    pub const fn invalid() -> Self {
        Self { fd: None, unit: 0, name: String::new(), mtu: None }
    }

    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last MTU successfully applied through [`TunnelProvisioner::set_mtu`].
    pub fn configured_mtu(&self) -> Option<u32> {
        self.mtu
    }

    /// Descriptor for the packet engine, `None` for an invalid handle.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd)
    }

    fn borrow_fd(&self) -> io::Result<BorrowedFd<'_>> {
        self.fd().ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "invalid tunnel handle"))
    }
}

pub struct TunnelProvisioner<C = SystemTunControl> {
    control: C,
    config: TunnelConfig,
}

impl TunnelProvisioner<SystemTunControl> {
    pub fn new() -> Self {
        Self::with_control(SystemTunControl, &TunnelConfig::default())
    }

    pub fn with_config(config: &TunnelConfig) -> Self {
        Self::with_control(SystemTunControl, config)
    }
}

impl Default for TunnelProvisioner<SystemTunControl> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: TunControl> TunnelProvisioner<C> {
    pub fn with_control(control: C, config: &TunnelConfig) -> Self {
        Self { control, config: config.clone() }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Claim the first free unit in the configured range.
    pub fn create(&self) -> Result<TunnelHandle, TunnelCreateError> {
        let TunnelConfig { first_unit, unit_count } = self.config;
        let units = (0..unit_count).map_while(|offset| first_unit.checked_add(offset));
        for unit in units {
            match self.control.connect(unit) {
                Ok(fd) => {
                    let name = self.control.interface_name(unit);
                    tracing::info!(message_id = "pV2rYc8d", unit, name = %name, "opened tunnel interface");
                    return Ok(TunnelHandle { fd: Some(fd), unit, name, mtu: None });
                }
                Err(error) => {
                    tracing::debug!(message_id = "e0HmTq4z", ?error, unit, "tunnel unit unavailable");
                }
            }
        }
        let last_unit = self.config.last_unit();
        tracing::warn!(message_id = "Qx7uKs1B", first_unit, last_unit, "could not open tunnel interface in unit range");
        Err(TunnelCreateError::Unavailable { first_unit, last_unit })
    }

    /// Current interface MTU, or `0` if it can not be determined.
    pub fn mtu(&self, handle: &TunnelHandle) -> u32 {
        match handle.borrow_fd().and_then(|fd| self.control.mtu(fd, handle.name())) {
            Ok(mtu) => mtu,
            Err(error) => {
                tracing::warn!(message_id = "Gd5oNw3f", ?error, name = handle.name(), "failed to get tunnel mtu");
                0
            }
        }
    }

    /// Set the interface MTU. Returns `mtu` on success and `0` on failure.
    pub fn set_mtu(&self, handle: &mut TunnelHandle, mtu: u32) -> u32 {
        let result = handle.borrow_fd().and_then(|fd| self.control.set_mtu(fd, handle.name(), mtu));
        match result {
            Ok(()) => {
                handle.mtu = Some(mtu);
                mtu
            }
            Err(error) => {
                tracing::warn!(message_id = "iL9bXe6k", ?error, name = handle.name(), mtu, "failed to set tunnel mtu");
                0
            }
        }
    }
}

/// Copy `name` into a NUL terminated `ifr_name` buffer.
fn ifr_name(name: &str) -> io::Result<[libc::c_char; libc::IFNAMSIZ]> {
    let mut ifr_name = [0 as libc::c_char; libc::IFNAMSIZ];
    if name.len() >= ifr_name.len() || name.as_bytes().contains(&0) {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid interface name {name:?}")));
    }
    for (dst, src) in ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr_name)
}
