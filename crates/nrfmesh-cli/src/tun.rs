//! TUN device creation and interface configuration
//!
//! Opens `/dev/net/tun` in TUN mode (whole IP frames, no packet-info
//! header), brings the interface up, and assigns its address and netmask
//! through the classic `SIOCSIF*` ioctls. Everything here is fatal on
//! failure: a tunnel endpoint without its interface is useless.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: i16 = 0x0001;
const IFF_NO_PI: i16 = 0x1000;

const IFNAMSIZ: usize = 16;

#[repr(C)]
struct IfReqFlags {
    name: [u8; IFNAMSIZ],
    flags: i16,
    pad: [u8; 22],
}

#[repr(C)]
struct IfReqAddr {
    name: [u8; IFNAMSIZ],
    addr: libc::sockaddr_in,
    pad: [u8; 8],
}

fn ifname_bytes(name: &str) -> Result<[u8; IFNAMSIZ]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= IFNAMSIZ {
        bail!("interface name '{}' must be 1..{} bytes", name, IFNAMSIZ);
    }
    let mut buf = [0u8; IFNAMSIZ];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// Open the TUN device `name`, creating the interface.
pub fn open_tun(name: &str) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/net/tun")
        .context("opening /dev/net/tun")?;

    let req = IfReqFlags {
        name: ifname_bytes(name)?,
        flags: IFF_TUN | IFF_NO_PI,
        pad: [0; 22],
    };
    let status = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &req) };
    if status < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("creating tunnel interface '{}'", name));
    }
    Ok(file)
}

/// A control socket for interface ioctls, closed on drop.
struct ControlSocket(libc::c_int);

impl ControlSocket {
    fn open() -> Result<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error()).context("opening control socket");
        }
        Ok(Self(fd))
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn sockaddr_of(ip: Ipv4Addr) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_addr = libc::in_addr {
        s_addr: u32::from(ip).to_be(),
    };
    addr
}

/// Bring the interface up and assign its IPv4 address and netmask.
pub fn configure_interface(name: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> Result<()> {
    let socket = ControlSocket::open()?;
    let ifname = ifname_bytes(name)?;

    let mut flags_req = IfReqFlags {
        name: ifname,
        flags: (libc::IFF_UP | libc::IFF_RUNNING) as i16,
        pad: [0; 22],
    };
    let status = unsafe { libc::ioctl(socket.0, libc::SIOCSIFFLAGS, &mut flags_req) };
    if status < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("bringing '{}' up", name));
    }

    let mut addr_req = IfReqAddr {
        name: ifname,
        addr: sockaddr_of(ip),
        pad: [0; 8],
    };
    let status = unsafe { libc::ioctl(socket.0, libc::SIOCSIFADDR, &mut addr_req) };
    if status < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("assigning {} to '{}'", ip, name));
    }

    let mut mask_req = IfReqAddr {
        name: ifname,
        addr: sockaddr_of(netmask),
        pad: [0; 8],
    };
    let status = unsafe { libc::ioctl(socket.0, libc::SIOCSIFNETMASK, &mut mask_req) };
    if status < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("assigning netmask {} to '{}'", netmask, name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifname_bounds() {
        assert!(ifname_bytes("nrf0").is_ok());
        assert!(ifname_bytes("").is_err());
        assert!(ifname_bytes("a-name-that-is-much-too-long").is_err());
    }

    #[test]
    fn test_sockaddr_network_order() {
        let addr = sockaddr_of(Ipv4Addr::new(10, 42, 0, 1));
        assert_eq!(addr.sin_addr.s_addr.to_ne_bytes(), [10, 42, 0, 1]);
    }
}
