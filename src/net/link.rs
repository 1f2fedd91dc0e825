use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Largest datagram the receiving side will read.
pub const MAX_DATAGRAM: usize = 65_507;

pub trait DatagramSink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;
}

pub trait DatagramSource {
    /// Read one pending datagram into `buf` without blocking. `Ok(None)` when
    /// nothing is waiting.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Non-blocking UDP socket, either sending to a fixed destination (which may
/// be a broadcast address) or receiving on a bound port.
pub struct UdpLink {
    socket: UdpSocket,
    destination: Option<SocketAddr>,
}

impl UdpLink {
    pub fn sender(bind: &str, destination: impl ToSocketAddrs) -> io::Result<Self> {
        let destination = destination.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "destination resolved to no address")
        })?;
        let socket = UdpSocket::bind((bind, 0))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        let link = Self {
            socket,
            destination: Some(destination),
        };
        log::info!("Sending state from {} to {}", link.local_addr()?, destination);
        Ok(link)
    }

    pub fn receiver(bind: &str, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind((bind, port))?;
        socket.set_nonblocking(true)?;
        let link = Self {
            socket,
            destination: None,
        };
        log::info!("Listening for state on {}", link.local_addr()?);
        Ok(link)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSink for UdpLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let destination = self.destination.ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "receiving link cannot send")
        })?;
        self.socket.send_to(datagram, destination)?;
        Ok(())
    }
}

impl DatagramSource for UdpLink {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv_from(buf) {
            Ok((len, _)) => Ok(Some(len)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn udp_loopback() {
        let mut rx = UdpLink::receiver("127.0.0.1", 0).unwrap();
        let port = rx.local_addr().unwrap().port();
        let mut tx = UdpLink::sender("127.0.0.1", ("127.0.0.1", port)).unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM];
        assert_eq!(rx.try_recv(&mut buf).unwrap(), None);

        tx.send(b"leaf").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let len = loop {
            if let Some(len) = rx.try_recv(&mut buf).unwrap() {
                break len;
            }
            assert!(Instant::now() < deadline, "datagram never arrived");
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(&buf[..len], b"leaf");
        assert!(rx.send(b"x").is_err());
    }

    #[test]
    fn memory_link_drops_by_index() {
        let (mut tx, mut rx) = memory::link(|i| i % 2 == 1);
        for d in [b"a", b"b", b"c"] {
            tx.send(d).unwrap();
        }
        let mut buf = [0u8; 4];
        assert_eq!(rx.try_recv(&mut buf).unwrap(), Some(1));
        assert_eq!(buf[0], b'a');
        assert_eq!(rx.try_recv(&mut buf).unwrap(), Some(1));
        assert_eq!(buf[0], b'c');
        assert_eq!(rx.try_recv(&mut buf).unwrap(), None);
    }
}
