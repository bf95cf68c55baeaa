use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

const RECV_BUF_SIZE: usize = 65_535;

/// Datagram transport for the control plane. One JSON message per
/// datagram; receives poll with a bounded timeout so workers can observe
/// the shutdown flag.
pub struct UdpTransport {
    sock: UdpSocket,
}

impl UdpTransport {
    pub fn bind(listen_ip: Ipv4Addr, listen_port: u16) -> io::Result<Self> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&SocketAddr::from((listen_ip, listen_port)).into())?;
        Ok(Self { sock: sock.into() })
    }

    pub fn recv(&self, timeout: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        self.sock.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0_u8; RECV_BUF_SIZE];
        match self.sock.recv_from(&mut buf) {
            Ok((n, addr)) => {
                buf.truncate(n);
                Ok(Some((buf, addr)))
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn send(&self, payload: &[u8], ip: Ipv4Addr, port: u16) -> io::Result<usize> {
        self.sock.send_to(payload, SocketAddr::from((ip, port)))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sock.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_send_and_timed_recv() {
        let loopback = Ipv4Addr::LOCALHOST;
        let receiver = UdpTransport::bind(loopback, 0).expect("bind receiver");
        let sender = UdpTransport::bind(loopback, 0).expect("bind sender");
        let port = receiver.local_addr().expect("local addr").port();

        sender.send(b"ping", loopback, port).expect("send");
        let (payload, _addr) = receiver
            .recv(Duration::from_secs(2))
            .expect("recv")
            .expect("datagram should arrive");
        assert_eq!(payload, b"ping");

        let idle = receiver.recv(Duration::from_millis(50)).expect("recv");
        assert!(idle.is_none());
    }
}
