use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use socket2::{Domain, Socket, Type};
use static_assertions::const_assert;

use super::{ifr_name, TunControl};

const TUN_DEVICE: &str = "/dev/net/tun";
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
// Fail with EBUSY instead of attaching to an existing device.
const IFF_TUN_EXCL: libc::c_short = 0x8000_u16 as libc::c_short;

// `struct ifreq` with the union narrowed to the member in use. Padded to the 64-bit size, the kernel only
// reads `sizeof(struct ifreq)` bytes.
#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfReqMtu {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 20],
}

const_assert!(std::mem::size_of::<IfReqFlags>() >= 32);
const_assert!(std::mem::size_of::<IfReqMtu>() >= 32);

/// `/dev/net/tun` with explicitly named, exclusive `tunN` interfaces.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTunControl;

impl TunControl for SystemTunControl {
    fn connect(&self, unit: u32) -> io::Result<OwnedFd> {
        let mut req = IfReqFlags { ifr_name: ifr_name(&self.interface_name(unit))?, ifr_flags: IFF_TUN | IFF_NO_PI | IFF_TUN_EXCL, _pad: [0; 22] };
        let fd: OwnedFd = OpenOptions::new().read(true).write(true).custom_flags(libc::O_CLOEXEC).open(TUN_DEVICE)?.into();
        // SAFETY: `req` is a valid `struct ifreq` for the duration of the call.
        if unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF as _, &mut req) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    fn interface_name(&self, unit: u32) -> String {
        format!("tun{unit}")
    }

    fn mtu(&self, _fd: BorrowedFd<'_>, name: &str) -> io::Result<u32> {
        let socket = ioctl_socket()?;
        let mut req = IfReqMtu { ifr_name: ifr_name(name)?, ifr_mtu: 0, _pad: [0; 20] };
        // SAFETY: see `connect`.
        if unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFMTU as _, &mut req) } < 0 {
            return Err(io::Error::last_os_error());
        }
        u32::try_from(req.ifr_mtu).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative mtu"))
    }

    fn set_mtu(&self, _fd: BorrowedFd<'_>, name: &str, mtu: u32) -> io::Result<()> {
        let ifr_mtu = libc::c_int::try_from(mtu).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mtu out of range"))?;
        let socket = ioctl_socket()?;
        let mut req = IfReqMtu { ifr_name: ifr_name(name)?, ifr_mtu, _pad: [0; 20] };
        // SAFETY: see `connect`.
        if unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCSIFMTU as _, &mut req) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

// The tun character device does not answer interface ioctls.
fn ioctl_socket() -> io::Result<Socket> {
    Socket::new(Domain::IPV4, Type::DGRAM, None)
}
