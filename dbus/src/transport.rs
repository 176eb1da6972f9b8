//! Connects to one of a D-Bus address's transport alternatives.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

use crate::address::Address;
use crate::error::{Error, ErrorKind, Result};

/// A connected transport, abstracting over the concrete socket kind.
pub struct Transport {
    inner: Box<dyn AsyncReadWrite>,
}

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

impl Transport {
    fn new(inner: impl AsyncRead + AsyncWrite + Send + Unpin + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }

    /// An in-memory transport pair for tests: no real socket involved.
    pub fn test_pair() -> (Transport, Transport) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (Transport::new(a), Transport::new(b))
    }

    /// Try each address alternative in turn, connecting to the first one
    /// that succeeds.
    pub async fn connect(addresses: &[Address]) -> Result<Transport> {
        let mut last_error = Error::new(ErrorKind::MissingBus);

        for address in addresses {
            match Self::connect_one(address).await {
                Ok(transport) => return Ok(transport),
                Err(error) => last_error = error,
            }
        }

        Err(last_error)
    }

    async fn connect_one(address: &Address) -> Result<Transport> {
        match address.transport.as_str() {
            "unix" => Self::connect_unix(address).await,
            "tcp" => Self::connect_tcp(address).await,
            "nonce-tcp" => Self::connect_nonce_tcp(address).await,
            "autolaunch" => Err(Error::new(ErrorKind::AutolaunchUnsupported)),
            other => Err(Error::new(ErrorKind::InvalidAddress(format!(
                "unsupported transport {other:?}"
            )))),
        }
    }

    async fn connect_unix(address: &Address) -> Result<Transport> {
        if let Some(path) = address.get("path") {
            let stream = UnixStream::connect(path).await?;
            return Ok(Transport::new(stream));
        }

        if let Some(abstract_name) = address.get("abstract") {
            return Self::connect_unix_abstract(abstract_name).await;
        }

        if let Some(dir) = address.get("dir").or_else(|| address.get("tmpdir")) {
            return Err(Error::new(ErrorKind::InvalidAddress(format!(
                "unix transport with dir={dir} requires server-side allocation, unsupported"
            ))));
        }

        Err(Error::new(ErrorKind::InvalidAddress(
            "unix transport requires path= or abstract=".into(),
        )))
    }

    #[cfg(target_os = "linux")]
    async fn connect_unix_abstract(name: &str) -> Result<Transport> {
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::SocketAddr;

        let addr = SocketAddr::from_abstract_name(name.as_bytes())
            .map_err(|_| Error::new(ErrorKind::InvalidAddress(format!("abstract={name}"))))?;
        let std_stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
        std_stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(std_stream)?;
        Ok(Transport::new(stream))
    }

    #[cfg(not(target_os = "linux"))]
    async fn connect_unix_abstract(_name: &str) -> Result<Transport> {
        Err(Error::new(ErrorKind::InvalidAddress(
            "abstract unix sockets are only supported on linux".into(),
        )))
    }

    async fn connect_tcp(address: &Address) -> Result<Transport> {
        let host = address.get("host").unwrap_or("localhost");
        let port = address
            .get("port")
            .ok_or_else(|| Error::new(ErrorKind::InvalidAddress("tcp transport requires port=".into())))?;
        let stream = TcpStream::connect((host, port.parse::<u16>().map_err(|_| {
            Error::new(ErrorKind::InvalidAddress(format!("invalid port {port}")))
        })?)).await?;
        Ok(Transport::new(stream))
    }

    async fn connect_nonce_tcp(address: &Address) -> Result<Transport> {
        let mut transport = Self::connect_tcp(address).await?;

        let nonce_file = address
            .get("noncefile")
            .ok_or_else(|| Error::new(ErrorKind::InvalidAddress("nonce-tcp requires noncefile=".into())))?;
        let nonce = tokio::fs::read(nonce_file).await?;

        use tokio::io::AsyncWriteExt;
        transport.inner.write_all(&nonce).await?;

        Ok(transport)
    }
}

impl AsyncRead for Transport {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Transport {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
