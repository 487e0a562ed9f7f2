use std::io::{Error, Result};
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::AsRawFd;

use tokio::net::{TcpSocket, TcpStream};
use tokio::time::{timeout, Duration};

const TCP_INIT_TIMEOUT_MS: u16 = 1000;

// Linux does not expose this one through libc yet
const IPV6_MINHOPCOUNT: libc::c_int = 73;

// FFI struct used to set the TCP_MD5SIG socket option
#[repr(C)]
struct TcpMd5Sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    __tcpm_pad: u32,
    tcpm_key: [u8; 108],
}

fn setsockopt(
    fd: &impl AsRawFd,
    level: libc::c_int,
    optname: libc::c_int,
    optval: *const libc::c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret = unsafe { libc::setsockopt(fd.as_raw_fd(), level, optname, optval, optlen) };
    if ret != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Set a TCP MD5 signature key (RFC 2385) for segments to/from `dst`
pub fn set_md5sig(fd: &impl AsRawFd, dst: &IpAddr, password: &str) -> Result<()> {
    let mut optval = TcpMd5Sig {
        tcpm_addr: unsafe { mem::zeroed() },
        tcpm_flags: 0,
        tcpm_prefixlen: 0,
        tcpm_keylen: password.len() as u16,
        __tcpm_pad: 0,
        tcpm_key: [0; 108],
    };
    let key_len = password.len().min(108);
    optval.tcpm_key[..key_len].copy_from_slice(&password.as_bytes()[..key_len]);
    match dst {
        IpAddr::V4(addr) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: 0,
                sin_addr: libc::in_addr {
                    s_addr: u32::from_be_bytes(addr.octets()).to_be(),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin as *const _ as *const u8,
                    &mut optval.tcpm_addr as *mut _ as *mut u8,
                    mem::size_of::<libc::sockaddr_in>(),
                );
            }
        }
        IpAddr::V6(addr) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: 0,
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr {
                    s6_addr: addr.octets(),
                },
                sin6_scope_id: 0,
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    &sin6 as *const _ as *const u8,
                    &mut optval.tcpm_addr as *mut _ as *mut u8,
                    mem::size_of::<libc::sockaddr_in6>(),
                );
            }
        }
    }
    setsockopt(
        fd,
        libc::IPPROTO_TCP,
        libc::TCP_MD5SIG,
        &optval as *const _ as *const libc::c_void,
        mem::size_of::<TcpMd5Sig>() as libc::socklen_t,
    )
}

/// GTSM (RFC 5082): require incoming TTL/hop-count >= `hops` and send
/// with TTL 255
pub fn set_ttl_security(fd: &impl AsRawFd, addr: &IpAddr, hops: u8) -> Result<()> {
    let min: libc::c_int = hops.into();
    let max: libc::c_int = 255;
    match addr {
        IpAddr::V4(_) => {
            setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_MINTTL,
                &min as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )?;
            setsockopt(
                fd,
                libc::IPPROTO_IP,
                libc::IP_TTL,
                &max as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        }
        IpAddr::V6(_) => {
            setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                IPV6_MINHOPCOUNT,
                &min as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )?;
            setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_UNICAST_HOPS,
                &max as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        }
    }
}

/// Outbound BGP connection: bind the configured source address, apply
/// MD5/TTL options, connect with a short timeout
pub async fn connect(
    peer_addr: SocketAddr,
    source_addr: SocketAddr,
    md5_password: Option<&str>,
    ttl_security: Option<u8>,
) -> Result<TcpStream> {
    let socket = match peer_addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    if let Some(password) = md5_password {
        set_md5sig(&socket, &peer_addr.ip(), password)?;
    }
    if let Some(hops) = ttl_security {
        set_ttl_security(&socket, &peer_addr.ip(), hops)?;
    }
    socket.bind(source_addr)?;
    timeout(
        Duration::from_millis(TCP_INIT_TIMEOUT_MS.into()),
        socket.connect(peer_addr),
    )
    .await
    .map_err(|_| Error::new(std::io::ErrorKind::TimedOut, "TCP connect timed out"))?
}
