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

use crate::{
    asynchronous::LineReader,
    error::{Error, ProtocolError},
    options::{TunnelConfig, BOB_TCP_PORT},
    proto::bob::{
        creator::{TunnelCreator, TunnelInfo, TunnelSide},
        parser::Reply,
        remover::TunnelRemover,
        Step,
    },
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

use std::time::Duration;

/// Logging target for the file.
const LOG_TARGET: &str = "denali::bob";

/// How long tunnel removal may keep retrying `clear` while the router
/// reports the tunnel as still shutting down.
const REMOVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the router's BOB bridge.
///
/// BOB builds named tunnels that bridge a local `host:port` into I2P. The
/// tunnels outlive the control connection, so the handle is connectionless:
/// every operation runs its own dialogue.
#[derive(Debug, Clone)]
pub struct BobRouter {
    /// Host of the BOB bridge.
    host: String,

    /// TCP port of the BOB bridge.
    port: u16,
}

impl Default for BobRouter {
    fn default() -> Self {
        Self::new("127.0.0.1", BOB_TCP_PORT)
    }
}

impl BobRouter {
    /// Create new [`BobRouter`].
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build (or adopt) a client tunnel bridging local connections on
    /// `inhost:inport` into I2P.
    pub async fn build_client_tunnel(&self, config: TunnelConfig) -> crate::Result<TunnelInfo> {
        let mut io = TcpStream::connect((self.host.as_str(), self.port)).await?;

        build_tunnel(&mut io, config, TunnelSide::Client).await
    }

    /// Build (or adopt) a server tunnel forwarding inbound I2P streams to
    /// `outhost:outport`.
    pub async fn build_server_tunnel(&self, config: TunnelConfig) -> crate::Result<TunnelInfo> {
        let mut io = TcpStream::connect((self.host.as_str(), self.port)).await?;

        build_tunnel(&mut io, config, TunnelSide::Server).await
    }

    /// Stop and remove the tunnel named `nickname`.
    ///
    /// Removing a nickname the router doesn't know is a no-op.
    pub async fn remove_tunnel(&self, nickname: &str) -> crate::Result<()> {
        let mut io = TcpStream::connect((self.host.as_str(), self.port)).await?;

        tokio::time::timeout(REMOVE_TIMEOUT, remove_tunnel(&mut io, nickname))
            .await
            .map_err(|_| Error::from(std::io::Error::from(std::io::ErrorKind::TimedOut)))?
    }
}

/// Run a tunnel-creation dialogue on `io`, persisting the keypair through
/// the configured keyfile.
pub(crate) async fn build_tunnel<S: AsyncRead + AsyncWrite + Unpin>(
    io: &mut S,
    mut config: TunnelConfig,
    side: TunnelSide,
) -> crate::Result<TunnelInfo> {
    // an existing keyfile provides the keypair; a missing one is written
    // once the router has generated keys
    let write_pending = match (&config.keyfile_path, &config.keypair) {
        (Some(path), None) => match std::fs::read_to_string(path) {
            Ok(keypair) => {
                config.keypair = Some(keypair.trim_end().to_string());

                false
            }
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    path = %path.display(),
                    %error,
                    "could not load keypair",
                );

                true
            }
        },
        _ => false,
    };
    let keyfile_path = config.keyfile_path.clone();

    let mut creator = TunnelCreator::new(config, side)?;
    let mut reader = LineReader::new();

    loop {
        let line = reader.next_line(io).await?;
        let reply = Reply::parse(&line).ok_or(ProtocolError::InvalidMessage)?;

        match creator.handle_reply(reply)? {
            Step::Send(command) => io.write_all(&command).await?,
            Step::Wait => {}
            Step::Done(info) => {
                if write_pending {
                    if let (Some(path), Some(keypair)) = (&keyfile_path, &info.keypair) {
                        if let Err(error) = std::fs::write(path, keypair) {
                            tracing::warn!(
                                target: LOG_TARGET,
                                path = %path.display(),
                                %error,
                                "could not save keypair",
                            );
                        }
                    }
                }

                return Ok(info);
            }
        }
    }
}

/// Run a tunnel-removal dialogue on `io`.
pub(crate) async fn remove_tunnel<S: AsyncRead + AsyncWrite + Unpin>(
    io: &mut S,
    nickname: &str,
) -> crate::Result<()> {
    let mut remover = TunnelRemover::new(nickname)?;
    let mut reader = LineReader::new();

    loop {
        let line = reader.next_line(io).await?;
        let reply = Reply::parse(&line).ok_or(ProtocolError::InvalidMessage)?;

        match remover.handle_reply(reply)? {
            Step::Send(command) => io.write_all(&command).await?,
            Step::Wait => {}
            Step::Done(()) => return Ok(()),
        }
    }
}
