//! Buffered stream over a non-blocking transport.
//!
//! Every suspending operation follows the same discipline: attempt the
//! non-blocking transport call; if it would block, register the current
//! task for readiness on the transport's fd and suspend; retry on
//! resume until the call succeeds or reports EOF. Cancellation surfaces
//! at the readiness wait like at every other suspension point.
//!
//! Writes are best-effort non-blocking: whatever the transport does not
//! take immediately is buffered locally and flushed by [`Stream::drain`].

use crate::error::{Error, Result};
use crate::runtime::Runtime;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// A non-blocking byte transport.
///
/// `read` and `write` return `Ok(None)` when the operation would block;
/// `read` returns `Ok(Some(0))` at end of stream. Implementations retry
/// `Interrupted` internally.
pub trait Transport {
    /// The fd the scheduler polls for readiness.
    fn raw_fd(&self) -> RawFd;

    /// Reads into `buf`, `None` if the read would block.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Writes from `buf`, `None` if the write would block.
    fn write(&mut self, buf: &[u8]) -> io::Result<Option<usize>>;

    /// Closes the transport.
    fn close(&mut self) -> io::Result<()>;
}

/// A non-blocking connection acceptor.
pub trait ListenTransport {
    /// Transport type of accepted connections.
    type Conn: Transport;

    /// The fd the scheduler polls for incoming connections.
    fn raw_fd(&self) -> RawFd;

    /// Accepts one connection, `None` if none is pending.
    fn accept(&mut self) -> io::Result<Option<(Self::Conn, SocketAddr)>>;

    /// Closes the listener.
    fn close(&mut self) -> io::Result<()>;
}

/// Task-suspending reader/writer over a [`Transport`].
#[derive(Debug)]
pub struct Stream<T: Transport> {
    rt: Runtime,
    transport: T,
    wbuf: Vec<u8>,
}

impl<T: Transport> Stream<T> {
    /// Wraps a transport.
    pub fn new(rt: &Runtime, transport: T) -> Self {
        Self {
            rt: rt.clone(),
            transport,
            wbuf: Vec::new(),
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Reads into `buf`, suspending until at least one byte arrives.
    /// Returns 0 at end of stream.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.transport.read(buf)? {
                Some(n) => return Ok(n),
                None => {
                    let fd = self.transport.raw_fd();
                    self.rt.wait_readable(fd).await?;
                }
            }
        }
    }

    /// Reads up to `n` bytes, returning as soon as any data arrives.
    /// An empty vector means end of stream.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let got = self.read_into(&mut buf).await?;
        buf.truncate(got);
        Ok(buf)
    }

    /// Reads until end of stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let got = self.read_into(&mut chunk).await?;
            if got == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..got]);
        }
    }

    /// Reads exactly `n` bytes.
    ///
    /// Returns [`Error::UnexpectedEof`] if the transport closes early.
    pub async fn read_exactly(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.read_into(&mut out[filled..]).await?;
            if got == 0 {
                return Err(Error::UnexpectedEof);
            }
            filled += got;
        }
        Ok(out)
    }

    /// Reads one line, up to and including the `\n` terminator.
    ///
    /// At end of stream the partial line read so far is returned.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        // One byte at a time so nothing past the terminator is consumed.
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let got = self.read_into(&mut byte).await?;
            if got == 0 {
                return Ok(line);
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                return Ok(line);
            }
        }
    }

    /// Queues `data` for sending, pushing as much as the transport takes
    /// without blocking. Does not suspend; call [`Stream::drain`] to
    /// flush the remainder.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.wbuf.is_empty() {
            self.wbuf.extend_from_slice(data);
            return Ok(());
        }
        let mut offset = 0;
        while offset < data.len() {
            match self.transport.write(&data[offset..])? {
                Some(0) | None => break,
                Some(n) => offset += n,
            }
        }
        self.wbuf.extend_from_slice(&data[offset..]);
        Ok(())
    }

    /// Flushes the local write buffer to the transport.
    ///
    /// Always suspends at least once, even with an empty buffer, so a
    /// tight write+drain loop cannot starve the scheduler.
    pub async fn drain(&mut self) -> Result<()> {
        self.rt.sleep_ms(0).await?;
        while !self.wbuf.is_empty() {
            match self.transport.write(&self.wbuf)? {
                Some(0) | None => {
                    let fd = self.transport.raw_fd();
                    self.rt.wait_writable(fd).await?;
                }
                Some(n) => {
                    self.wbuf.drain(..n);
                }
            }
        }
        Ok(())
    }

    /// Flushes pending writes and closes the transport.
    pub async fn close(&mut self) -> Result<()> {
        self.drain().await?;
        self.transport.close()?;
        Ok(())
    }
}

/// Task-suspending acceptor over a [`ListenTransport`].
#[derive(Debug)]
pub struct Listener<L: ListenTransport> {
    rt: Runtime,
    transport: L,
}

impl<L: ListenTransport> Listener<L> {
    /// Wraps a listening transport.
    pub fn new(rt: &Runtime, transport: L) -> Self {
        Self {
            rt: rt.clone(),
            transport,
        }
    }

    /// Accepts the next incoming connection, suspending until one is
    /// pending.
    pub async fn accept(&mut self) -> Result<(Stream<L::Conn>, SocketAddr)> {
        loop {
            match self.transport.accept()? {
                Some((conn, addr)) => return Ok((Stream::new(&self.rt, conn), addr)),
                None => {
                    let fd = self.transport.raw_fd();
                    self.rt.wait_readable(fd).await?;
                }
            }
        }
    }

    /// Closes the listener.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()?;
        Ok(())
    }
}
