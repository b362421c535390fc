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

use crate::asynchronous::{session::SamSession, SamConnection};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// I2P virtual stream.
///
/// The control connection the stream was negotiated on, now carrying the
/// stream's data. Dropping the stream releases it from its session; when
/// the session auto-closes, releasing the last stream closes the session.
pub struct Stream {
    /// Underlying connection.
    io: Box<dyn SamConnection>,

    /// Bytes the router sent before the connection was handed over.
    readahead: Vec<u8>,

    /// Destination of the remote peer.
    remote: String,

    /// Session the stream belongs to.
    session: Arc<SamSession>,

    /// Stream registration within the session.
    id: u64,
}

impl Stream {
    /// Create new [`Stream`] over an established connection.
    pub(crate) fn new(
        io: Box<dyn SamConnection>,
        readahead: Vec<u8>,
        remote: String,
        session: Arc<SamSession>,
        id: u64,
    ) -> Self {
        Self {
            io,
            readahead,
            remote,
            session,
            id,
        }
    }

    /// Destination of the remote peer.
    pub fn remote_destination(&self) -> &str {
        &self.remote
    }

    /// Session the stream belongs to.
    pub fn session(&self) -> &Arc<SamSession> {
        &self.session
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        // a closed session has already dropped its registrations
        let _ = self.session.remove_stream(self.id);
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.readahead.is_empty() {
            let amount = self.readahead.len().min(buf.remaining());
            let readahead: Vec<u8> = self.readahead.drain(..amount).collect();
            buf.put_slice(&readahead);

            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write_vectored(cx, bufs)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
