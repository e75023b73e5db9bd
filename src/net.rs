//! Reference TCP transports.
//!
//! Non-blocking `std::net` sockets behind the [`Transport`] traits.
//! Connecting follows the non-blocking handshake: an in-progress connect
//! suspends until the socket is writable, then checks the pending socket
//! error before handing the stream out.

use crate::error::Result;
use crate::runtime::Runtime;
use crate::stream::{ListenTransport, Listener, Stream, Transport};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{self, Shutdown, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};

/// Opens a TCP connection to `addr`.
///
/// Suspends while the non-blocking connect is in progress.
pub async fn connect(rt: &Runtime, addr: SocketAddr) -> Result<Stream<TcpTransport>> {
    let transport = TcpTransport::connect(rt, addr).await?;
    Ok(Stream::new(rt, transport))
}

/// Binds a TCP listener on `addr`.
pub fn listen(rt: &Runtime, addr: SocketAddr, backlog: i32) -> Result<Listener<TcpListenTransport>> {
    let transport = TcpListenTransport::bind(addr, backlog)?;
    Ok(Listener::new(rt, transport))
}

/// A non-blocking TCP connection.
#[derive(Debug)]
pub struct TcpTransport {
    inner: net::TcpStream,
}

impl TcpTransport {
    /// Connects to `addr` without blocking the scheduler.
    pub async fn connect(rt: &Runtime, addr: SocketAddr) -> Result<Self> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;

        let sock_addr = SockAddr::from(addr);
        match socket.connect(&sock_addr) {
            Ok(()) => {}
            Err(err) if connect_in_progress(&err) => {
                rt.wait_writable(socket.as_raw_fd()).await?;
                if let Some(err) = socket.take_error()? {
                    return Err(err.into());
                }
            }
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            inner: socket.into(),
        })
    }

    /// Wraps an already-connected stream, switching it to non-blocking.
    pub fn from_std(stream: net::TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self { inner: stream })
    }

    /// The local address of the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// The remote address of the socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl Transport for TcpTransport {
    fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
        loop {
            match self.inner.write(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A non-blocking TCP listener.
#[derive(Debug)]
pub struct TcpListenTransport {
    inner: net::TcpListener,
}

impl TcpListenTransport {
    /// Binds and starts listening on `addr`, with reuse-address set so
    /// restarts do not trip over lingering sockets.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            inner: socket.into(),
        })
    }

    /// The bound address, including the OS-assigned port for port 0
    /// binds.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl ListenTransport for TcpListenTransport {
    type Conn = TcpTransport;

    fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    fn accept(&mut self) -> io::Result<Option<(Self::Conn, SocketAddr)>> {
        loop {
            match self.inner.accept() {
                Ok((conn, addr)) => {
                    conn.set_nonblocking(true)?;
                    return Ok(Some((TcpTransport { inner: conn }, addr)));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::EINPROGRESS)
}
