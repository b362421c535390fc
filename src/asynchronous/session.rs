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
    asynchronous::{registry::RegistryInner, LineReader, SamConnection, SamEndpoint},
    error::Error,
    options::{SessionConfig, SessionStyle},
    proto::sam::{session::SessionCreator, stream::StreamController},
};

use tokio::io::AsyncWriteExt;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, Weak},
};

/// Logging target for the file.
const LOG_TARGET: &str = "denali::session";

/// Mutable half of a session.
struct SessionInner {
    /// Control connection the session was created on.
    ///
    /// The router tears the session down when this connection closes, so
    /// it is held open for the session's whole life.
    control: Option<Box<dyn SamConnection>>,

    /// Live derived streams.
    streams: HashSet<u64>,

    /// Next stream id.
    next_stream: u64,

    /// Whether the session has been closed. Monotonic.
    closed: bool,
}

/// Active SAMv3 session.
///
/// Created through
/// [`SessionRegistry::get_session`](crate::SessionRegistry::get_session)
/// and shared between everything that asked for the same nickname.
pub struct SamSession {
    /// Session nickname, the registry key.
    nickname: String,

    /// Endpoint for opening derived control connections.
    endpoint: Arc<dyn SamEndpoint>,

    /// Negotiated SAM version.
    version: String,

    /// Session style.
    style: SessionStyle,

    /// Public destination the session speaks for.
    address: String,

    /// Whether the session closes itself when its last stream is released.
    auto_close: bool,

    /// Registry the session removes itself from on close.
    registry: Weak<RegistryInner>,

    /// Mutable state.
    inner: Mutex<SessionInner>,
}

impl SamSession {
    /// Create new [`SamSession`] from a finished creation dialogue.
    pub(crate) fn new(
        created: CreatedSession,
        endpoint: Arc<dyn SamEndpoint>,
        auto_close: bool,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            nickname: created.nickname,
            endpoint,
            version: created.version,
            style: created.style,
            address: created.address,
            auto_close,
            registry,
            inner: Mutex::new(SessionInner {
                control: Some(created.control),
                streams: HashSet::new(),
                next_stream: 0u64,
                closed: false,
            }),
        }
    }

    /// Session nickname. Also the SAM session id.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// SAM session id.
    pub fn id(&self) -> &str {
        &self.nickname
    }

    /// Negotiated SAM version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Session style.
    pub fn style(&self) -> SessionStyle {
        self.style
    }

    /// Public destination the session speaks for.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("lock poisoned").closed
    }

    /// How many derived streams are currently live.
    pub fn stream_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").streams.len()
    }

    /// Endpoint for opening derived control connections.
    pub(crate) fn endpoint(&self) -> Arc<dyn SamEndpoint> {
        self.endpoint.clone()
    }

    /// Register an established derived stream.
    ///
    /// Called only after the router has acknowledged the stream.
    pub(crate) fn add_stream(&self) -> crate::Result<u64> {
        let mut inner = self.inner.lock().expect("lock poisoned");

        if inner.closed {
            return Err(Error::ConnectionDone);
        }

        let stream = inner.next_stream;
        inner.next_stream += 1;
        inner.streams.insert(stream);

        Ok(stream)
    }

    /// Release a derived stream.
    ///
    /// When the last stream of an auto-closing session is released, the
    /// session closes.
    pub(crate) fn remove_stream(&self, stream: u64) -> crate::Result<()> {
        let close = {
            let mut inner = self.inner.lock().expect("lock poisoned");

            if inner.closed {
                return Err(Error::ConnectionDone);
            }

            inner.streams.remove(&stream);
            inner.streams.is_empty() && self.auto_close
        };

        if close {
            tracing::trace!(
                target: LOG_TARGET,
                nickname = %self.nickname,
                "last stream released, closing session",
            );
            self.close();
        }

        Ok(())
    }

    /// Close the session.
    ///
    /// Drops all stream registrations, closes the control connection and
    /// removes the session from its registry. Closing an already-closed
    /// session is a no-op.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");

            if inner.closed {
                return;
            }

            inner.closed = true;
            inner.streams.clear();
            inner.control = None;
        }

        tracing::info!(
            target: LOG_TARGET,
            nickname = %self.nickname,
            "session closed",
        );

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.nickname);
        }
    }

    /// Resolve `name` to a destination through this session's router.
    pub async fn lookup(&self, name: &str) -> crate::Result<String> {
        if self.is_closed() {
            return Err(Error::ConnectionDone);
        }

        let mut control = self.endpoint.connect().await?;
        let mut reader = LineReader::new();
        let mut controller = StreamController::new();

        let command = controller.handshake()?;
        control.write_all(&command).await?;
        let response = reader.next_line(&mut control).await?;
        controller.handle_response(&response)?;

        let command = controller.lookup(name)?;
        control.write_all(&command).await?;
        let response = reader.next_line(&mut control).await?;
        controller.handle_response(&response)?;

        Ok(controller.destination().to_string())
    }
}

/// Outcome of a successful session-creation dialogue.
pub(crate) struct CreatedSession {
    /// Session nickname.
    pub nickname: String,

    /// Negotiated SAM version.
    pub version: String,

    /// Session style.
    pub style: SessionStyle,

    /// Public destination of the session.
    pub address: String,

    /// Control connection the session was created on.
    pub control: Box<dyn SamConnection>,
}

/// Run the session-creation dialogue on a fresh control connection.
pub(crate) async fn create_session(
    endpoint: &Arc<dyn SamEndpoint>,
    config: &SessionConfig,
) -> crate::Result<CreatedSession> {
    // an existing keyfile provides the private key; a missing one is
    // written once the router has created the session
    let (private_key, write_pending) = match &config.keyfile_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(key) => (Some(key.trim_end().to_string()), false),
            Err(error) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    path = %path.display(),
                    %error,
                    "could not load private key",
                );

                (None, true)
            }
        },
        None => (None, false),
    };

    let mut creator = SessionCreator::new(config.clone(), private_key)?;
    let mut control = endpoint.connect().await?;
    let mut reader = LineReader::new();

    let command = creator.handshake()?;
    control.write_all(&command).await?;
    let response = reader.next_line(&mut control).await?;
    creator.handle_response(&response)?;

    let command = creator.create_session()?;
    control.write_all(&command).await?;
    let response = reader.next_line(&mut control).await?;
    creator.handle_response(&response)?;

    let command = creator.lookup_self()?;
    control.write_all(&command).await?;
    let response = reader.next_line(&mut control).await?;
    creator.handle_response(&response)?;

    if write_pending {
        if let Some(path) = &config.keyfile_path {
            if let Err(error) = std::fs::write(path, creator.destination()) {
                tracing::warn!(
                    target: LOG_TARGET,
                    path = %path.display(),
                    %error,
                    "could not save private key",
                );
            }
        }
    }

    Ok(CreatedSession {
        nickname: creator.nickname().to_string(),
        version: creator.version().to_string(),
        style: config.style,
        address: creator.address().to_string(),
        control,
    })
}
