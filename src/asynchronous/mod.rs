// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! Tokio frontend: drives the protocol state machines over real
//! connections.

use crate::{error::Error, options::SAMV3_TCP_PORT, proto::framing::LineFramer};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    net::TcpStream,
};

pub mod bob;
pub mod endpoint;
pub mod registry;
pub mod session;
pub mod stream;

/// Byte stream carrying a control or data connection.
pub trait SamConnection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SamConnection for T {}

/// Handle that opens new control connections to the SAM bridge.
///
/// Sessions keep the handle around because every derived dialogue — stream
/// connects, accepts, name lookups — runs on a fresh control connection.
/// The registry and the endpoints are generic over it so tests can
/// substitute an in-memory router.
pub trait SamEndpoint: Send + Sync {
    /// Open a new control connection.
    fn connect(&self) -> BoxFuture<'static, std::io::Result<Box<dyn SamConnection>>>;
}

/// [`SamEndpoint`] backed by a TCP connection to the local router.
#[derive(Debug, Clone)]
pub struct TcpSamEndpoint {
    /// Host of the SAMv3 bridge.
    host: String,

    /// TCP port of the SAMv3 bridge.
    port: u16,
}

impl TcpSamEndpoint {
    /// Create new [`TcpSamEndpoint`].
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for TcpSamEndpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", SAMV3_TCP_PORT)
    }
}

impl SamEndpoint for TcpSamEndpoint {
    fn connect(&self) -> BoxFuture<'static, std::io::Result<Box<dyn SamConnection>>> {
        let address = format!("{}:{}", self.host, self.port);

        Box::pin(async move {
            let stream = TcpStream::connect(address).await?;

            Ok(Box::new(stream) as Box<dyn SamConnection>)
        })
    }
}

/// Reads newline-terminated replies from a control connection.
pub(crate) struct LineReader {
    /// Framer holding partially received input.
    framer: LineFramer,
}

impl LineReader {
    /// Create new [`LineReader`].
    pub fn new() -> Self {
        Self {
            framer: LineFramer::new(),
        }
    }

    /// Read the next reply line.
    ///
    /// Loss of the connection before a full line arrives is an error.
    pub async fn next_line<S: AsyncRead + Unpin + ?Sized>(
        &mut self,
        io: &mut S,
    ) -> crate::Result<String> {
        loop {
            if let Some(line) = self.framer.next_line()? {
                return Ok(line);
            }

            let mut buffer = [0u8; 1024];
            let nread = io.read(&mut buffer).await?;
            if nread == 0 {
                return Err(Error::from(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }

            self.framer.feed(&buffer[..nread])?;
        }
    }

    /// Take the bytes received past the last consumed line, for handing
    /// the connection off as a data stream.
    pub fn take_remainder(mut self) -> Vec<u8> {
        self.framer.take_remainder()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn line_reader_reassembles_lines() {
        let (mut ours, mut theirs) = tokio::io::duplex(64);
        let mut reader = LineReader::new();

        tokio::io::AsyncWriteExt::write_all(&mut theirs, b"OK Listing ")
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut theirs, b"done\nOK\nleft")
            .await
            .unwrap();

        assert_eq!(reader.next_line(&mut ours).await.unwrap(), "OK Listing done");
        assert_eq!(reader.next_line(&mut ours).await.unwrap(), "OK");
        assert_eq!(reader.take_remainder(), b"left".to_vec());
    }

    #[tokio::test]
    async fn line_reader_detects_lost_transport() {
        let (mut ours, theirs) = tokio::io::duplex(64);
        let mut reader = LineReader::new();

        drop(theirs);

        match reader.next_line(&mut ours).await {
            Err(Error::Io(error)) => {
                assert_eq!(error.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            result => panic!("expected i/o error, got {result:?}"),
        }
    }
}
