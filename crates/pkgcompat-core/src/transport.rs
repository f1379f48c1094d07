use crate::wire::{Frame, WireError, MAX_REPLY_DATA};
use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

/// A bidirectional stream of whole frames.
///
/// `send_frame` and `recv_frame` may be called concurrently from different
/// threads; each `send_frame` delivers one frame atomically.
pub trait FrameTransport: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), WireError>;

    /// Block for the next frame. `Ok(None)` means the peer hung up or
    /// [`close`](Self::close) was called.
    fn recv_frame(&self) -> Result<Option<Vec<u8>>, WireError>;

    /// Stop sending and wake any blocked `recv_frame`.
    fn close(&self);
}

fn closed_error() -> WireError {
    WireError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"))
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// In-process transport built on a pair of channels.
pub struct MemoryTransport {
    tx: Mutex<Option<Sender<Vec<u8>>>>,
    rx: Mutex<Receiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Two connected ends: frames sent on one are received on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }
}

impl FrameTransport for MemoryTransport {
    fn send_frame(&self, frame: &[u8]) -> Result<(), WireError> {
        let tx = self.tx.lock().map_err(|_| closed_error())?;
        match tx.as_ref() {
            Some(tx) => tx.send(frame.to_vec()).map_err(|_| closed_error()),
            None => Err(closed_error()),
        }
    }

    fn recv_frame(&self) -> Result<Option<Vec<u8>>, WireError> {
        let rx = self.rx.lock().map_err(|_| closed_error())?;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => return Ok(Some(frame)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

/// Frames over a connected Unix-domain stream socket.
///
/// Incoming frames are bounded by `max_data`: the daemon side reads requests
/// under `MAX_PKG_DATA`, a client reads replies under `MAX_REPLY_DATA`.
pub struct UnixSocketTransport {
    writer: Mutex<UnixStream>,
    reader: Mutex<UnixStream>,
    max_data: usize,
}

impl UnixSocketTransport {
    /// Client end: connect to a daemon and read its replies.
    pub fn connect(path: &Path) -> Result<Self, WireError> {
        Self::from_stream(UnixStream::connect(path)?, MAX_REPLY_DATA)
    }

    pub fn from_stream(stream: UnixStream, max_data: usize) -> Result<Self, WireError> {
        let reader = stream.try_clone()?;
        Ok(Self {
            writer: Mutex::new(stream),
            reader: Mutex::new(reader),
            max_data,
        })
    }
}

impl FrameTransport for UnixSocketTransport {
    fn send_frame(&self, frame: &[u8]) -> Result<(), WireError> {
        let mut writer = self.writer.lock().map_err(|_| closed_error())?;
        io::Write::write_all(&mut *writer, frame)?;
        Ok(())
    }

    fn recv_frame(&self) -> Result<Option<Vec<u8>>, WireError> {
        let mut reader = self.reader.lock().map_err(|_| closed_error())?;
        Frame::read_raw(&mut *reader, self.max_data)
    }

    fn close(&self) {
        // Shutting down the writer's descriptor also wakes the blocked reader clone.
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{IpcMessage, HEADER_LEN, MAX_PKG_DATA};
    use pkgcompat_schema::OperationKind;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    fn sample(id: u64) -> Vec<u8> {
        Frame::new(id, IpcMessage::request(OperationKind::Install, b"alpine curl").unwrap())
            .encode()
    }

    #[test]
    fn memory_pair_is_bidirectional() {
        let (a, b) = MemoryTransport::pair();
        a.send_frame(&sample(1)).unwrap();
        b.send_frame(&sample(2)).unwrap();
        assert_eq!(b.recv_frame().unwrap().unwrap(), sample(1));
        assert_eq!(a.recv_frame().unwrap().unwrap(), sample(2));
    }

    #[test]
    fn memory_close_wakes_receiver() {
        let (a, b) = MemoryTransport::pair();
        let a = Arc::new(a);
        let waiter = {
            let a = Arc::clone(&a);
            thread::spawn(move || a.recv_frame().unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        a.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(a.send_frame(&sample(1)).is_err());
        drop(b);
    }

    #[test]
    fn memory_peer_drop_ends_stream() {
        let (a, b) = MemoryTransport::pair();
        drop(b);
        assert!(a.recv_frame().unwrap().is_none());
    }

    #[test]
    fn unix_socket_carries_frames() {
        let (left, right) = UnixStream::pair().unwrap();
        let client = UnixSocketTransport::from_stream(left, MAX_REPLY_DATA).unwrap();
        let server = UnixSocketTransport::from_stream(right, MAX_PKG_DATA).unwrap();

        client.send_frame(&sample(41)).unwrap();
        client.send_frame(&sample(42)).unwrap();
        let first = server.recv_frame().unwrap().unwrap();
        let second = server.recv_frame().unwrap().unwrap();
        assert_eq!(Frame::decode(&first, MAX_PKG_DATA).unwrap().correlation_id, 41);
        assert_eq!(Frame::decode(&second, MAX_PKG_DATA).unwrap().correlation_id, 42);

        client.close();
        assert!(server.recv_frame().unwrap().is_none());
    }

    #[test]
    fn unix_socket_bounds_incoming_frames() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw_client = left.try_clone().unwrap();
        let server = UnixSocketTransport::from_stream(right, MAX_PKG_DATA).unwrap();

        // Header declares 2000 bytes; the body follows in full.
        let mut oversized = 5u64.to_be_bytes().to_vec();
        oversized.push(1);
        oversized.extend_from_slice(&2000u16.to_be_bytes());
        oversized.extend_from_slice(&vec![b'a'; 2000]);
        oversized.extend_from_slice(&0i32.to_be_bytes());
        raw_client.write_all(&oversized).unwrap();
        raw_client.write_all(&sample(6)).unwrap();

        let first = server.recv_frame().unwrap().unwrap();
        assert_eq!(first.len(), HEADER_LEN);
        assert!(matches!(
            Frame::decode(&first, MAX_PKG_DATA),
            Err(WireError::Oversized { len: 2000, .. })
        ));
        assert_eq!(Frame::peek_header(&first), Some((5, 1)));
        let second = server.recv_frame().unwrap().unwrap();
        assert_eq!(second, sample(6));
        drop(left);
    }
}
