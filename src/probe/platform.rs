//! The parts of raw ICMP probing which differ between platforms.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use socket2::Socket;

/// Width of each of the two `timeval` fields written at the start of the echo payload, mirroring what
/// the system `ping` does.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub type TimestampField = u32;
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub type TimestampField = u64;

pub const TIMESTAMP_LEN: usize = 2 * std::mem::size_of::<TimestampField>();

/// Seconds and microseconds since the epoch in native byte order.
pub fn timestamp(now: SystemTime) -> [u8; TIMESTAMP_LEN] {
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs() as TimestampField;
    let micros = TimestampField::from(since_epoch.subsec_micros());
    let mut out = [0u8; TIMESTAMP_LEN];
    let (secs_out, micros_out) = out.split_at_mut(TIMESTAMP_LEN / 2);
    secs_out.copy_from_slice(&secs.to_ne_bytes());
    micros_out.copy_from_slice(&micros.to_ne_bytes());
    out
}

/// Encode `ip_len`/`ip_off` for a header handed to the kernel with `IP_HDRINCL`.
///
/// BSD derived stacks expect these two fields in host byte order.
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn raw_ip_u16(value: u16) -> [u8; 2] {
    value.to_ne_bytes()
}
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
pub fn raw_ip_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Make the socket layer refuse to fragment, in addition to the DF bit in the crafted header.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn enforce_dont_fragment(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let val: libc::c_int = libc::IP_PMTUDISC_DO;
    // SAFETY: `val` outlives the call and the length matches its type.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// The DF bit in the header is sufficient here.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn enforce_dont_fragment(_socket: &Socket) -> io::Result<()> {
    Ok(())
}
