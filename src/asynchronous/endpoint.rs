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
    asynchronous::{
        registry::SessionRegistry, session::SamSession, stream::Stream, LineReader, SamEndpoint,
    },
    error::{Error, ProtocolError},
    options::SessionConfig,
    proto::sam::stream::StreamController,
};

use tokio::io::AsyncWriteExt;

use std::sync::Arc;

/// Where an endpoint gets its session from.
enum SessionSource {
    /// Session that already exists.
    Existing(Arc<SamSession>),

    /// Session created (or joined) through the registry on first use.
    ///
    /// The configuration is captured at construction and never re-read,
    /// whether or not a connection attempt succeeds.
    New {
        /// Session registry.
        registry: SessionRegistry,

        /// SAM endpoint the session is created through.
        endpoint: Arc<dyn SamEndpoint>,

        /// Captured session configuration.
        config: SessionConfig,
    },
}

impl SessionSource {
    /// Get the endpoint's session.
    ///
    /// Endpoint-created sessions auto-close once their last stream is
    /// released.
    async fn acquire(&self) -> crate::Result<Arc<SamSession>> {
        match self {
            Self::Existing(session) => {
                if session.is_closed() {
                    return Err(Error::ConnectionDone);
                }

                Ok(session.clone())
            }
            Self::New {
                registry,
                endpoint,
                config,
            } => registry.get_session(Some(endpoint.clone()), true, config.clone()).await,
        }
    }

    /// Captured session configuration, when the endpoint self-creates.
    fn config(&self) -> Option<&SessionConfig> {
        match self {
            Self::New { config, .. } => Some(config),
            Self::Existing(_) => None,
        }
    }
}

/// Client endpoint: opens outbound virtual streams to one remote
/// destination.
pub struct StreamClientEndpoint {
    /// Session source.
    source: SessionSource,

    /// Remote destination streams are opened to.
    remote: String,
}

impl StreamClientEndpoint {
    /// Create new [`StreamClientEndpoint`] that creates (or joins) a
    /// session in `registry` on first use.
    pub fn new(
        registry: SessionRegistry,
        endpoint: Arc<dyn SamEndpoint>,
        remote: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            source: SessionSource::New {
                registry,
                endpoint,
                config,
            },
            remote: remote.into(),
        }
    }

    /// Create new [`StreamClientEndpoint`] on an existing session.
    pub fn from_session(session: Arc<SamSession>, remote: impl Into<String>) -> Self {
        Self {
            source: SessionSource::Existing(session),
            remote: remote.into(),
        }
    }

    /// Session configuration captured at construction, when the endpoint
    /// self-creates.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.source.config()
    }

    /// Open a virtual stream to the endpoint's remote destination.
    pub async fn connect(&self) -> crate::Result<Stream> {
        let session = self.source.acquire().await?;

        let mut control = session.endpoint().connect().await?;
        let mut reader = LineReader::new();
        let mut controller = StreamController::new();

        let command = controller.handshake()?;
        control.write_all(&command).await?;
        let response = reader.next_line(&mut control).await?;
        controller.handle_response(&response)?;

        let command = controller.connect(session.id(), &self.remote)?;
        control.write_all(&command).await?;
        let response = reader.next_line(&mut control).await?;
        controller.handle_response(&response)?;

        // registered only once the router has acknowledged the stream
        let id = session.add_stream()?;

        Ok(Stream::new(
            control,
            reader.take_remainder(),
            self.remote.clone(),
            session,
            id,
        ))
    }
}

/// Server endpoint: accepts inbound virtual streams on the session's
/// destination.
pub struct StreamServerEndpoint {
    /// Session source.
    source: SessionSource,
}

impl StreamServerEndpoint {
    /// Create new [`StreamServerEndpoint`] that creates (or joins) a
    /// session in `registry` on first use.
    pub fn new(
        registry: SessionRegistry,
        endpoint: Arc<dyn SamEndpoint>,
        config: SessionConfig,
    ) -> Self {
        Self {
            source: SessionSource::New {
                registry,
                endpoint,
                config,
            },
        }
    }

    /// Create new [`StreamServerEndpoint`] on an existing session.
    pub fn from_session(session: Arc<SamSession>) -> Self {
        Self {
            source: SessionSource::Existing(session),
        }
    }

    /// Session configuration captured at construction, when the endpoint
    /// self-creates.
    pub fn config(&self) -> Option<&SessionConfig> {
        self.source.config()
    }

    /// Acquire the session and start accepting inbound streams.
    pub async fn listen(&self) -> crate::Result<StreamListener> {
        let session = self.source.acquire().await?;

        Ok(StreamListener { session })
    }
}

/// Accepts inbound virtual streams.
///
/// Every accept runs on its own control connection, as SAMv3 requires.
pub struct StreamListener {
    /// Session inbound streams are accepted on.
    session: Arc<SamSession>,
}

impl StreamListener {
    /// Public destination inbound streams are accepted on.
    pub fn address(&self) -> &str {
        self.session.address()
    }

    /// Session the listener accepts on.
    pub fn session(&self) -> &Arc<SamSession> {
        &self.session
    }

    /// Accept one inbound virtual stream.
    pub async fn accept(&self) -> crate::Result<Stream> {
        let mut control = self.session.endpoint().connect().await?;
        let mut reader = LineReader::new();
        let mut controller = StreamController::new();

        let command = controller.handshake()?;
        control.write_all(&command).await?;
        let response = reader.next_line(&mut control).await?;
        controller.handle_response(&response)?;

        let command = controller.accept(self.session.id())?;
        control.write_all(&command).await?;
        let response = reader.next_line(&mut control).await?;
        controller.handle_response(&response)?;

        let id = self.session.add_stream()?;

        // once a peer connects, the first line on the stream carries its
        // destination
        let remote = match reader.next_line(&mut control).await {
            Ok(line) => match line.split_whitespace().next() {
                Some(remote) => remote.to_string(),
                None => {
                    let _ = self.session.remove_stream(id);
                    return Err(ProtocolError::InvalidMessage.into());
                }
            },
            Err(error) => {
                let _ = self.session.remove_stream(id);
                return Err(error);
            }
        };

        Ok(Stream::new(
            control,
            reader.take_remainder(),
            remote,
            self.session.clone(),
            id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asynchronous::testing::{read_command, session_script, ScriptedEndpoint};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use std::sync::Mutex;

    fn config_with_options(options: Vec<(String, String)>) -> SessionConfig {
        SessionConfig {
            nickname: Some("spam".to_string()),
            options,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn options_captured_even_when_transport_refused() {
        let options = vec![
            ("inbound.length".to_string(), "5".to_string()),
            ("outbound.length".to_string(), "5".to_string()),
        ];
        let endpoint = StreamClientEndpoint::new(
            SessionRegistry::new(),
            ScriptedEndpoint::refusing(),
            "remote",
            config_with_options(options.clone()),
        );

        match endpoint.connect().await {
            Err(Error::Io(error)) => {
                assert_eq!(error.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            result => panic!("expected i/o error, got {:?}", result.is_ok()),
        }

        // the captured configuration is unaffected by the failure
        assert_eq!(endpoint.config().unwrap().options, options);
    }

    #[tokio::test]
    async fn options_default_to_empty() {
        let endpoint = StreamServerEndpoint::new(
            SessionRegistry::new(),
            ScriptedEndpoint::refusing(),
            config_with_options(Vec::new()),
        );

        match endpoint.listen().await {
            Err(Error::Io(error)) => {
                assert_eq!(error.kind(), std::io::ErrorKind::ConnectionRefused);
            }
            result => panic!("expected i/o error, got {:?}", result.is_ok()),
        }

        assert!(endpoint.config().unwrap().options.is_empty());
    }

    #[tokio::test]
    async fn client_stream_opened_and_released() {
        let registry = SessionRegistry::new();
        let endpoint = ScriptedEndpoint::new();
        let commands = Arc::new(Mutex::new(Vec::new()));

        endpoint.push(session_script("privkey", "pubkey", commands.clone()));

        let stream_commands = commands.clone();
        endpoint.push(|mut io| async move {
            let mut reader = LineReader::new();

            let command = read_command(&mut reader, &mut io).await;
            stream_commands.lock().expect("lock poisoned").push(command);
            io.write_all(b"HELLO REPLY RESULT=OK VERSION=3.1\n").await.expect("write");

            let command = read_command(&mut reader, &mut io).await;
            stream_commands.lock().expect("lock poisoned").push(command);
            // data follows the acknowledgement immediately
            io.write_all(b"STREAM STATUS RESULT=OK\nping").await.expect("write");

            std::future::pending::<()>().await;
        });

        let client = StreamClientEndpoint::new(
            registry,
            endpoint,
            "remote",
            config_with_options(Vec::new()),
        );

        let mut stream = client.connect().await.unwrap();
        let session = stream.session().clone();

        assert_eq!(stream.remote_destination(), "remote");
        assert_eq!(session.stream_count(), 1);
        assert_eq!(
            commands.lock().expect("lock poisoned").last().unwrap(),
            "STREAM CONNECT ID=spam DESTINATION=remote"
        );

        let mut buffer = [0u8; 4];
        stream.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"ping");

        // endpoint-created sessions auto-close with their last stream
        drop(stream);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn inbound_stream_accepted_with_peer_destination() {
        let registry = SessionRegistry::new();
        let endpoint = ScriptedEndpoint::new();
        let commands = Arc::new(Mutex::new(Vec::new()));

        endpoint.push(session_script("privkey", "pubkey", commands.clone()));

        let accept_commands = commands.clone();
        endpoint.push(|mut io| async move {
            let mut reader = LineReader::new();

            let command = read_command(&mut reader, &mut io).await;
            accept_commands.lock().expect("lock poisoned").push(command);
            io.write_all(b"HELLO REPLY RESULT=OK VERSION=3.1\n").await.expect("write");

            let command = read_command(&mut reader, &mut io).await;
            accept_commands.lock().expect("lock poisoned").push(command);
            io.write_all(b"STREAM STATUS RESULT=OK\n").await.expect("write");

            // a peer connects
            io.write_all(b"remotepeer FROM_PORT=0 TO_PORT=0\nhello").await.expect("write");

            std::future::pending::<()>().await;
        });

        let server = StreamServerEndpoint::new(registry, endpoint, config_with_options(Vec::new()));

        let listener = server.listen().await.unwrap();
        assert_eq!(listener.address(), "pubkey");

        let mut stream = listener.accept().await.unwrap();
        assert_eq!(stream.remote_destination(), "remotepeer");
        assert_eq!(
            commands.lock().expect("lock poisoned").last().unwrap(),
            "STREAM ACCEPT ID=spam"
        );

        let mut buffer = [0u8; 5];
        stream.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"hello");
    }

    #[tokio::test]
    async fn endpoint_on_closed_session_is_rejected() {
        let registry = SessionRegistry::new();
        let endpoint = ScriptedEndpoint::new();
        endpoint.push(session_script(
            "privkey",
            "pubkey",
            Arc::new(Mutex::new(Vec::new())),
        ));

        let session = registry
            .get_session(
                Some(endpoint),
                false,
                SessionConfig {
                    nickname: Some("spam".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        session.close();

        let client = StreamClientEndpoint::from_session(session, "remote");

        match client.connect().await {
            Err(Error::ConnectionDone) => {}
            result => panic!("expected connection done, got {:?}", result.is_ok()),
        }
    }
}
