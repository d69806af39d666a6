//! Transport Adapter: the capability the engine needs from whatever moves
//! bytes over the wire. The core imposes no address family; the adapter
//! resolves that itself.

use std::net::IpAddr;

/// Outcome of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    RouteError,
    Capacity,
    SocketError,
}

/// Outcome of a non-blocking receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    BytesReceived(Vec<u8>),
    WouldBlock,
    SocketError,
}

/// A send/receive capability over UDP, or a stand-in for it. Inbound
/// datagrams larger than 512 bytes MAY be dropped by the adapter.
pub trait Transport {
    fn send(&mut self, dst_ip: IpAddr, dst_port: u16, bytes: &[u8]) -> SendOutcome;
    fn recv_nonblocking(&mut self) -> RecvOutcome;
    fn recv_with_timeout(&mut self, timeout_ms: u32) -> RecvOutcome;
}

/// Reference implementation over `std::net::UdpSocket`, for hosted targets.
/// Not part of the protocol core; `no_std` embedded builds supply their own
/// [`Transport`] instead of this one.
#[cfg(feature = "std")]
pub mod udp {
    use std::io::ErrorKind;
    use std::net::{SocketAddr, UdpSocket};
    use std::time::Duration;

    use super::{RecvOutcome, SendOutcome, Transport};

    pub struct UdpTransport {
        socket: UdpSocket,
        buf: [u8; 1500],
    }

    impl UdpTransport {
        pub fn bind(local_addr: SocketAddr) -> std::io::Result<Self> {
            let socket = UdpSocket::bind(local_addr)?;
            socket.set_nonblocking(true)?;
            Ok(UdpTransport {
                socket,
                buf: [0u8; 1500],
            })
        }

        fn recv(&mut self) -> RecvOutcome {
            match self.socket.recv(&mut self.buf) {
                Ok(n) if n > 512 => {
                    // the adapter may drop oversized datagrams; treat as would-block
                    RecvOutcome::WouldBlock
                }
                Ok(n) => RecvOutcome::BytesReceived(self.buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => RecvOutcome::WouldBlock,
                Err(_) => RecvOutcome::SocketError,
            }
        }
    }

    impl Transport for UdpTransport {
        fn send(&mut self, dst_ip: std::net::IpAddr, dst_port: u16, bytes: &[u8]) -> SendOutcome {
            match self.socket.send_to(bytes, SocketAddr::new(dst_ip, dst_port)) {
                Ok(n) if n == bytes.len() => SendOutcome::Ok,
                Ok(_) => SendOutcome::Capacity,
                Err(e) if e.kind() == ErrorKind::AddrNotAvailable => SendOutcome::RouteError,
                Err(_) => SendOutcome::SocketError,
            }
        }

        fn recv_nonblocking(&mut self) -> RecvOutcome {
            self.recv()
        }

        fn recv_with_timeout(&mut self, timeout_ms: u32) -> RecvOutcome {
            let _ = self.socket.set_nonblocking(false);
            let _ = self
                .socket
                .set_read_timeout(Some(Duration::from_millis(u64::from(timeout_ms))));

            let outcome = match self.socket.recv(&mut self.buf) {
                Ok(n) if n > 512 => RecvOutcome::WouldBlock,
                Ok(n) => RecvOutcome::BytesReceived(self.buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    RecvOutcome::WouldBlock
                }
                Err(_) => RecvOutcome::SocketError,
            };

            let _ = self.socket.set_nonblocking(true);
            outcome
        }
    }
}
