use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};

use socket2::{Domain, Protocol, Socket, Type};
use static_assertions::const_assert_eq;

use super::{ifr_name, TunControl};

// sys/sys_domain.h, sys/kern_control.h, net/if_utun.h
const PF_SYSTEM: libc::c_int = 32;
const AF_SYSTEM: u8 = 32;
const AF_SYS_CONTROL: u16 = 2;
const SYSPROTO_CONTROL: libc::c_int = 2;
const CTLIOCGINFO: libc::c_ulong = 0xc064_4e03;
const MAX_KCTL_NAME: usize = 96;
const UTUN_CONTROL_NAME: &[u8] = b"com.apple.net.utun_control";

// sys/sockio.h
const SIOCGIFMTU: libc::c_ulong = 0xc020_6933;
const SIOCSIFMTU: libc::c_ulong = 0x8020_6934;

#[repr(C)]
struct CtlInfo {
    ctl_id: u32,
    ctl_name: [u8; MAX_KCTL_NAME],
}

#[repr(C)]
struct SockaddrCtl {
    sc_len: u8,
    sc_family: u8,
    ss_sysaddr: u16,
    sc_id: u32,
    sc_unit: u32,
    sc_reserved: [u32; 5],
}

#[repr(C)]
struct IfReqMtu {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 12],
}

const_assert_eq!(size_of::<CtlInfo>(), 100);
const_assert_eq!(size_of::<SockaddrCtl>(), 32);
const_assert_eq!(size_of::<IfReqMtu>(), 32);

/// utun kernel control sockets. Unit `N` becomes `utun{N-1}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTunControl;

impl TunControl for SystemTunControl {
    fn connect(&self, unit: u32) -> io::Result<OwnedFd> {
        // Unit 0 lets the kernel pick any free utun, and the interface name would no longer be known.
        if unit == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "utun unit 0 is not a specific interface"));
        }
        let socket = Socket::new(Domain::from(PF_SYSTEM), Type::DGRAM, Some(Protocol::from(SYSPROTO_CONTROL)))?;
        // Helper processes spawned by the daemon must not inherit the tunnel.
        socket.set_cloexec(true)?;

        let mut info = CtlInfo { ctl_id: 0, ctl_name: [0; MAX_KCTL_NAME] };
        info.ctl_name[..UTUN_CONTROL_NAME.len()].copy_from_slice(UTUN_CONTROL_NAME);
        // SAFETY: `info` is a valid `struct ctl_info` for the duration of the call.
        if unsafe { libc::ioctl(socket.as_raw_fd(), CTLIOCGINFO, &mut info) } == -1 {
            return Err(io::Error::last_os_error());
        }

        let addr = SockaddrCtl {
            sc_len: size_of::<SockaddrCtl>() as u8,
            sc_family: AF_SYSTEM,
            ss_sysaddr: AF_SYS_CONTROL,
            sc_id: info.ctl_id,
            sc_unit: unit,
            sc_reserved: [0; 5],
        };
        // SAFETY: `addr` is a valid `struct sockaddr_ctl` of the given length.
        let ret = unsafe {
            libc::connect(
                socket.as_raw_fd(),
                &addr as *const SockaddrCtl as *const libc::sockaddr,
                size_of::<SockaddrCtl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(socket.into())
    }

    fn interface_name(&self, unit: u32) -> String {
        format!("utun{}", unit.saturating_sub(1))
    }

    fn mtu(&self, fd: BorrowedFd<'_>, name: &str) -> io::Result<u32> {
        let mut req = IfReqMtu { ifr_name: ifr_name(name)?, ifr_mtu: 0, _pad: [0; 12] };
        // SAFETY: `req` is a valid `struct ifreq` for the duration of the call.
        if unsafe { libc::ioctl(fd.as_raw_fd(), SIOCGIFMTU, &mut req) } != 0 {
            return Err(io::Error::last_os_error());
        }
        u32::try_from(req.ifr_mtu).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "negative mtu"))
    }

    fn set_mtu(&self, fd: BorrowedFd<'_>, name: &str, mtu: u32) -> io::Result<()> {
        let ifr_mtu = libc::c_int::try_from(mtu).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mtu out of range"))?;
        let mut req = IfReqMtu { ifr_name: ifr_name(name)?, ifr_mtu, _pad: [0; 12] };
        // SAFETY: see `mtu`.
        if unsafe { libc::ioctl(fd.as_raw_fd(), SIOCSIFMTU, &mut req) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
