//! `/dev/net/tun` adapters.
#![allow(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use super::{TapConfig, TapIo};
use crate::BackendError;

const TUN_CLONE_DEVICE: &str = "/dev/net/tun";
const SYS_CLASS_NET: &str = "/sys/class/net";

// <linux/if_tun.h>
const TUNSETIFF: u64 = 0x4004_54ca;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

pub(super) fn list_tap_devices() -> Vec<String> {
    let Ok(entries) = fs::read_dir(SYS_CLASS_NET) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            fs::read_to_string(entry.path().join("tun_flags"))
                .ok()
                .and_then(|flags| {
                    let flags = flags.trim();
                    let hex = flags.strip_prefix("0x").unwrap_or(flags);
                    u32::from_str_radix(hex, 16).ok()
                })
                .is_some_and(|flags| flags & IFF_TAP as u32 != 0)
        })
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// A tap interface attached through the kernel tun/tap clone device.
#[derive(Debug)]
pub(super) struct HostTap {
    file: File,
    name: String,
    mac: Option<[u8; 6]>,
    /// Datagram socket used only as a handle for interface ioctls.
    control: Option<UdpSocket>,
}

impl HostTap {
    pub(super) fn open(config: &TapConfig) -> Result<Self, BackendError> {
        // An unnamed request makes the kernel allocate the next free `tapN`.
        let requested = match &config.device_name {
            Some(name) => name.clone(),
            None => list_tap_devices().into_iter().next().unwrap_or_default(),
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(TUN_CLONE_DEVICE)
            .map_err(|source| BackendError::Open {
                name: TUN_CLONE_DEVICE.to_string(),
                source,
            })?;

        let mut ifr = ifreq_for(&requested);
        ifr.ifr_ifru.ifru_flags = IFF_TAP | IFF_NO_PI;
        ioctl(file.as_raw_fd(), TUNSETIFF, &mut ifr).map_err(|source| BackendError::Open {
            name: requested.clone(),
            source,
        })?;
        let name = ifreq_name(&ifr);

        let control = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
            Ok(sock) => Some(sock),
            Err(err) => {
                tracing::warn!(tap = %name, error = %err, "no control socket; tap MAC and address are unavailable");
                None
            }
        };

        let mac = control
            .as_ref()
            .and_then(|sock| match read_hwaddr(sock.as_raw_fd(), &name) {
                Ok(mac) => Some(mac),
                Err(err) => {
                    tracing::warn!(tap = %name, error = %err, "failed to read tap hardware address");
                    None
                }
            });

        if let (Some(sock), Some(addr)) = (&control, config.address) {
            let netmask = config.netmask.unwrap_or(Ipv4Addr::new(255, 255, 255, 0));
            match configure_address(sock.as_raw_fd(), &name, addr, netmask) {
                Ok(()) => tracing::info!(tap = %name, %addr, %netmask, "tap address configured"),
                Err(err) => {
                    tracing::warn!(tap = %name, %addr, error = %err, "failed to configure tap address")
                }
            }
        }

        tracing::debug!(tap = %name, "opened tap adapter");
        Ok(Self {
            file,
            name,
            mac,
            control,
        })
    }
}

impl TapIo for HostTap {
    fn name(&self) -> &str {
        &self.name
    }

    fn mac_address(&self) -> Option<[u8; 6]> {
        self.mac
    }

    fn set_mac_address(&self, mac: [u8; 6]) -> io::Result<()> {
        let sock = self.control.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no interface control socket")
        })?;
        let mut ifr = ifreq_for(&self.name);
        let mut hwaddr = libc::sockaddr {
            sa_family: libc::ARPHRD_ETHER,
            sa_data: [0; 14],
        };
        for (dst, src) in hwaddr.sa_data.iter_mut().zip(mac) {
            *dst = src as libc::c_char;
        }
        ifr.ifr_ifru.ifru_hwaddr = hwaddr;
        ioctl(sock.as_raw_fd(), libc::SIOCSIFHWADDR as u64, &mut ifr)
    }

    fn recv_frame(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: `pfd` is a single valid `pollfd` that outlives the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(None);
        }
        if pfd.revents & libc::POLLIN == 0 {
            if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "tap adapter reported an error condition",
                ));
            }
            return Ok(None);
        }

        match (&self.file).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn send_frame(&self, frame: &[u8]) -> io::Result<usize> {
        (&self.file).write(frame)
    }
}

fn ioctl(fd: RawFd, request: u64, ifr: &mut libc::ifreq) -> io::Result<()> {
    // SAFETY: every request issued by this module takes a `struct ifreq *`, and `ifr` is a fully
    // initialized `ifreq` that outlives the call.
    let rc = unsafe { libc::ioctl(fd, request as _, ifr as *mut libc::ifreq) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn ifreq_for(name: &str) -> libc::ifreq {
    // SAFETY: `ifreq` is plain old data; all-zero is a valid value.
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr
        .ifr_name
        .iter_mut()
        .zip(name.bytes().take(libc::IFNAMSIZ - 1))
    {
        *dst = src as libc::c_char;
    }
    ifr
}

fn ifreq_name(ifr: &libc::ifreq) -> String {
    let bytes: Vec<u8> = ifr
        .ifr_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn read_hwaddr(sock: RawFd, name: &str) -> io::Result<[u8; 6]> {
    let mut ifr = ifreq_for(name);
    ioctl(sock, libc::SIOCGIFHWADDR as u64, &mut ifr)?;
    // SAFETY: SIOCGIFHWADDR fills the `ifru_hwaddr` member of the union.
    let hwaddr = unsafe { ifr.ifr_ifru.ifru_hwaddr };
    let mut mac = [0u8; 6];
    for (dst, src) in mac.iter_mut().zip(hwaddr.sa_data) {
        *dst = src as u8;
    }
    Ok(mac)
}

fn sockaddr_v4(addr: Ipv4Addr) -> libc::sockaddr {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.octets()),
        },
        sin_zero: [0; 8],
    };
    // SAFETY: `sockaddr_in` and `sockaddr` are both 16 bytes of plain data on Linux and the
    // kernel reinterprets the generic form by `sa_family`.
    unsafe { std::mem::transmute::<libc::sockaddr_in, libc::sockaddr>(sin) }
}

fn configure_address(
    sock: RawFd,
    name: &str,
    addr: Ipv4Addr,
    netmask: Ipv4Addr,
) -> io::Result<()> {
    let mut ifr = ifreq_for(name);
    ifr.ifr_ifru.ifru_addr = sockaddr_v4(addr);
    ioctl(sock, libc::SIOCSIFADDR as u64, &mut ifr)?;

    let mut ifr = ifreq_for(name);
    ifr.ifr_ifru.ifru_netmask = sockaddr_v4(netmask);
    ioctl(sock, libc::SIOCSIFNETMASK as u64, &mut ifr)?;

    let mut ifr = ifreq_for(name);
    ioctl(sock, libc::SIOCGIFFLAGS as u64, &mut ifr)?;
    // SAFETY: SIOCGIFFLAGS fills the `ifru_flags` member of the union.
    let flags = unsafe { ifr.ifr_ifru.ifru_flags };
    ifr.ifr_ifru.ifru_flags = flags | (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
    ioctl(sock, libc::SIOCSIFFLAGS as u64, &mut ifr)
}
