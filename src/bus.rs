//! Byte-frame sources feeding the intake pool. The host message queue is
//! injected behind [`Bus`] so the pipeline can run against an in-process
//! queue, a datagram endpoint, or a test fake.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// One raw message off the bus.
pub type Frame = Vec<u8>;

/// Largest frame accepted at the datagram endpoint.
pub const MAX_FRAME_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum BusError {
    /// Bounded receive elapsed with nothing available. Normal; keep polling.
    #[error("receive timed out")]
    Timeout,
    /// The queue is gone; the consumer cannot recover.
    #[error("bus closed")]
    Closed,
    /// The endpoint refused the consumer; the consumer cannot recover.
    #[error("bus access denied")]
    AccessDenied,
    #[error("bus i/o error: {0}")]
    Io(#[from] io::Error),
}

impl BusError {
    /// Fatal errors terminate the consuming worker; everything else is
    /// logged and polling continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Closed | BusError::AccessDenied)
    }
}

/// A source of raw frames with a bounded receive.
pub trait Bus: Send {
    fn recv(&mut self, timeout: Duration) -> Result<Frame, BusError>;
}

/// Producer handle for a [`ChannelBus`].
pub type FramePublisher = Sender<Frame>;

/// In-process bus backed by a multi-consumer channel. Cloning yields
/// another competing consumer on the same queue, which is how the intake
/// pool shares one bus across N workers.
#[derive(Clone)]
pub struct ChannelBus {
    rx: Receiver<Frame>,
}

/// Create a connected publisher/consumer pair.
pub fn channel() -> (FramePublisher, ChannelBus) {
    let (tx, rx) = unbounded();
    (tx, ChannelBus { rx })
}

impl Bus for ChannelBus {
    fn recv(&mut self, timeout: Duration) -> Result<Frame, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(BusError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Closed),
        }
    }
}

/// Host bus endpoint: a bound UDP socket receiving one frame per datagram.
/// Each worker holds its own clone of the socket handle.
pub struct UdpBus {
    socket: UdpSocket,
    read_timeout: Option<Duration>,
    buf: Vec<u8>,
}

impl UdpBus {
    pub fn bind(addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self {
            socket,
            read_timeout: None,
            buf: vec![0u8; MAX_FRAME_BYTES],
        })
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        let socket = self.socket.try_clone()?;
        Ok(Self {
            socket,
            read_timeout: None,
            buf: vec![0u8; MAX_FRAME_BYTES],
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }
}

impl Bus for UdpBus {
    fn recv(&mut self, timeout: Duration) -> Result<Frame, BusError> {
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        match self.socket.recv(&mut self.buf) {
            Ok(n) => Ok(self.buf[..n].to_vec()),
            Err(err) => Err(classify_io(err)),
        }
    }
}

fn classify_io(err: io::Error) -> BusError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => BusError::Timeout,
        io::ErrorKind::PermissionDenied => BusError::AccessDenied,
        _ => BusError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_bus_times_out_when_idle() {
        let (_tx, mut bus) = channel();
        let err = bus.recv(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, BusError::Timeout));
        assert!(!err.is_fatal());
    }

    #[test]
    fn channel_bus_closes_when_publisher_drops() {
        let (tx, mut bus) = channel();
        drop(tx);
        let err = bus.recv(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, BusError::Closed));
        assert!(err.is_fatal());
    }

    #[test]
    fn channel_bus_delivers_frames() {
        let (tx, mut bus) = channel();
        tx.send(b"hello".to_vec()).unwrap();
        let frame = bus.recv(Duration::from_millis(100)).unwrap();
        assert_eq!(frame, b"hello");
    }

    #[test]
    fn timeout_io_errors_are_transient() {
        let err = classify_io(io::Error::new(io::ErrorKind::WouldBlock, "nope"));
        assert!(matches!(err, BusError::Timeout));
        let err = classify_io(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(err.is_fatal());
    }

    #[test]
    fn udp_bus_receives_datagrams() {
        let mut bus = UdpBus::bind("127.0.0.1:0").unwrap();
        let addr = bus.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"over the wire", addr).unwrap();

        let frame = bus.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(frame, b"over the wire");
    }

    #[test]
    fn udp_bus_times_out_when_idle() {
        let mut bus = UdpBus::bind("127.0.0.1:0").unwrap();
        let err = bus.recv(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, BusError::Timeout));
    }

    #[test]
    fn udp_bus_clones_share_the_endpoint() {
        let bus = UdpBus::bind("127.0.0.1:0").unwrap();
        let addr = bus.local_addr().unwrap();
        let mut clone = bus.try_clone().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"shared", addr).unwrap();

        let frame = clone.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(frame, b"shared");
    }
}
