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
    error::{Error, ProtocolError},
    options::{default_nickname, SessionConfig, SessionStyle},
    proto::sam::{parser::Response, SAM_MAX, SAM_MIN},
};

/// Logging target for the file.
const LOG_TARGET: &str = "denali::sam::session";

/// Session creation state.
#[derive(Debug, PartialEq, Eq)]
enum SessionState {
    /// Session is uninitialized.
    Uninitialized,

    /// Handshake has been sent to the router.
    Handshaking,

    /// Session has been handshaked.
    Handshaked {
        /// Negotiated version.
        version: String,
    },

    /// `SESSION CREATE` has been sent.
    SessionCreatePending {
        /// Negotiated version.
        version: String,
    },

    /// Session has been created.
    Created {
        /// Negotiated version.
        version: String,

        /// Private key of the session destination, as echoed by the router.
        destination: String,
    },

    /// `NAMING LOOKUP NAME=ME` has been sent.
    NamingPending {
        /// Negotiated version.
        version: String,

        /// Private key of the session destination.
        destination: String,
    },

    /// Session is active.
    Active {
        /// Negotiated version.
        version: String,

        /// Private key of the session destination.
        destination: String,

        /// Public destination of the session.
        address: String,
    },

    /// Session state has been poisoned.
    Poisoned,
}

/// State machine for creating a SAMv3 session.
pub struct SessionCreator {
    /// Session nickname, synthesized from the process id when the caller
    /// didn't assign one.
    nickname: String,

    /// Private key to register the session with, when one is known.
    private_key: Option<String>,

    /// Session configuration.
    config: SessionConfig,

    /// Session state.
    state: SessionState,
}

impl SessionCreator {
    /// Create new [`SessionCreator`] from `config`.
    ///
    /// `private_key` registers the session under an existing destination;
    /// without it the router creates a transient one.
    pub fn new(config: SessionConfig, private_key: Option<String>) -> Result<Self, Error> {
        if config.style != SessionStyle::Stream {
            return Err(Error::UnsupportedStyle(config.style.as_str().to_string()));
        }

        let nickname = match &config.nickname {
            Some(nickname) if nickname.is_empty() =>
                return Err(Error::InvalidArgument("session nickname must not be empty")),
            Some(nickname) => nickname.clone(),
            None => default_nickname(),
        };

        Ok(Self {
            nickname,
            private_key,
            config,
            state: SessionState::Uninitialized,
        })
    }

    /// Nickname the session is created under.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Initialize the session by handshaking with the router.
    pub fn handshake(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, SessionState::Poisoned) {
            SessionState::Uninitialized => {
                tracing::trace!(
                    target: LOG_TARGET,
                    nickname = %self.nickname,
                    "send handshake for session",
                );
                self.state = SessionState::Handshaking;

                Ok(format!("HELLO VERSION MIN={SAM_MIN} MAX={SAM_MAX}\n").into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot handshake session, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Create new session with either a transient or a persistent
    /// destination, forwarding the configured options in order.
    pub fn create_session(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, SessionState::Poisoned) {
            SessionState::Handshaked { version } => {
                tracing::trace!(
                    target: LOG_TARGET,
                    nickname = %self.nickname,
                    persistent = self.private_key.is_some(),
                    "create new session",
                );

                let mut command = format!(
                    "SESSION CREATE STYLE={} ID={} DESTINATION={}",
                    self.config.style.as_str(),
                    self.nickname,
                    self.private_key.as_deref().unwrap_or("TRANSIENT"),
                );
                for (key, value) in &self.config.options {
                    command.push_str(&format!(" {key}={value}"));
                }
                command.push('\n');

                self.state = SessionState::SessionCreatePending { version };

                Ok(command.into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot create session, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Look up the public destination of the created session.
    pub fn lookup_self(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, SessionState::Poisoned) {
            SessionState::Created {
                version,
                destination,
            } => {
                self.state = SessionState::NamingPending {
                    version,
                    destination,
                };

                Ok(String::from("NAMING LOOKUP NAME=ME\n").into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot lookup own destination, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Handle response from the router.
    pub fn handle_response(&mut self, response: &str) -> Result<(), Error> {
        match std::mem::replace(&mut self.state, SessionState::Poisoned) {
            SessionState::Handshaking => match Response::parse(response) {
                Some(Response::Hello {
                    result: Ok(version),
                }) => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        %version,
                        "session handshake done",
                    );
                    self.state = SessionState::Handshaked { version };

                    Ok(())
                }
                Some(Response::Hello { result: Err(error) }) => Err(error.into()),
                None => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        ?response,
                        "invalid response from router to session `HELLO`",
                    );
                    Err(ProtocolError::InvalidMessage.into())
                }
                Some(response) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        ?response,
                        "unexpected response from router to session `HELLO`",
                    );
                    Err(ProtocolError::InvalidState.into())
                }
            },
            SessionState::SessionCreatePending { version } => match Response::parse(response) {
                Some(Response::Session {
                    result: Ok(destination),
                }) => {
                    tracing::info!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        "session created",
                    );

                    // whatever the reply carries is the canonical private
                    // key, whether the router generated it or echoed ours
                    self.state = SessionState::Created {
                        version,
                        destination,
                    };

                    Ok(())
                }
                Some(Response::Session { result: Err(error) }) => Err(error.into()),
                None => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        ?response,
                        "invalid response from router to `SESSION CREATE`",
                    );
                    Err(ProtocolError::InvalidMessage.into())
                }
                Some(response) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        ?response,
                        "unexpected response from router to `SESSION CREATE`",
                    );
                    Err(ProtocolError::InvalidState.into())
                }
            },
            SessionState::NamingPending {
                version,
                destination,
            } => match Response::parse(response) {
                Some(Response::Naming { result: Ok(entry) }) if entry.name == "ME" => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        "own destination resolved",
                    );

                    self.state = SessionState::Active {
                        version,
                        destination,
                        address: entry.value,
                    };

                    Ok(())
                }
                Some(Response::Naming { result: Err(error) }) => Err(error.into()),
                None => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        ?response,
                        "invalid response from router to `NAMING LOOKUP`",
                    );
                    Err(ProtocolError::InvalidMessage.into())
                }
                Some(response) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        ?response,
                        "unexpected response from router to `NAMING LOOKUP`",
                    );
                    Err(ProtocolError::InvalidState.into())
                }
            },
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot handle response, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState.into())
            }
        }
    }

    /// Negotiated SAM version.
    ///
    /// Panics if called before the handshake has completed.
    pub fn version(&self) -> &str {
        match &self.state {
            SessionState::Handshaked { version }
            | SessionState::SessionCreatePending { version }
            | SessionState::Created { version, .. }
            | SessionState::NamingPending { version, .. }
            | SessionState::Active { version, .. } => version,
            _ => panic!("invalid state"),
        }
    }

    /// Private key of the session destination, as returned by the router.
    ///
    /// Panics if called before the session has been created.
    pub fn destination(&self) -> &str {
        match &self.state {
            SessionState::Created { destination, .. }
            | SessionState::NamingPending { destination, .. }
            | SessionState::Active { destination, .. } => destination,
            _ => panic!("invalid state"),
        }
    }

    /// Public destination of the session.
    ///
    /// Panics if called before the session is active.
    pub fn address(&self) -> &str {
        let SessionState::Active { address, .. } = &self.state else {
            panic!("invalid state");
        };

        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nickname: &str) -> SessionConfig {
        SessionConfig {
            nickname: Some(nickname.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn create_transient_session() {
        let mut creator = SessionCreator::new(config("spam"), None).unwrap();

        assert_eq!(
            creator.handshake(),
            Ok(String::from("HELLO VERSION MIN=3.0 MAX=3.1\n").into_bytes())
        );
        assert!(creator.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());
        assert_eq!(creator.version(), "3.1");

        assert_eq!(
            creator.create_session(),
            Ok(String::from("SESSION CREATE STYLE=STREAM ID=spam DESTINATION=TRANSIENT\n")
                .into_bytes())
        );
        assert!(creator
            .handle_response("SESSION STATUS RESULT=OK DESTINATION=privkey\n")
            .is_ok());
        assert_eq!(creator.destination(), "privkey");

        assert_eq!(
            creator.lookup_self(),
            Ok(String::from("NAMING LOOKUP NAME=ME\n").into_bytes())
        );
        assert!(creator
            .handle_response("NAMING REPLY RESULT=OK NAME=ME VALUE=pubkey\n")
            .is_ok());
        assert_eq!(creator.address(), "pubkey");
    }

    #[test]
    fn create_persistent_session_with_options() {
        let mut creator = SessionCreator::new(
            SessionConfig {
                nickname: Some("spam".to_string()),
                options: vec![
                    ("inbound.length".to_string(), "5".to_string()),
                    ("outbound.length".to_string(), "5".to_string()),
                ],
                ..Default::default()
            },
            Some("eggs".to_string()),
        )
        .unwrap();

        assert!(creator.handshake().is_ok());
        assert!(creator.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());

        // options are forwarded verbatim, in the order they were given
        assert_eq!(
            creator.create_session(),
            Ok(String::from(
                "SESSION CREATE STYLE=STREAM ID=spam DESTINATION=eggs \
                 inbound.length=5 outbound.length=5\n"
            )
            .into_bytes())
        );
    }

    #[test]
    fn nickname_synthesized_when_absent() {
        let creator = SessionCreator::new(SessionConfig::default(), None).unwrap();

        assert_eq!(
            creator.nickname(),
            &format!("denali-{}", std::process::id())
        );
    }

    #[test]
    fn non_stream_style_rejected() {
        let result = SessionCreator::new(
            SessionConfig {
                style: SessionStyle::Datagram,
                ..Default::default()
            },
            None,
        );

        match result {
            Err(Error::UnsupportedStyle(style)) => assert_eq!(style, "DATAGRAM"),
            result => panic!("expected unsupported style, got {:?}", result.is_ok()),
        }
    }

    #[test]
    fn router_error_fails_creation() {
        let mut creator = SessionCreator::new(config("spam"), None).unwrap();

        assert!(creator.handshake().is_ok());
        assert!(creator.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());
        assert!(creator.create_session().is_ok());

        match creator.handle_response(
            "SESSION STATUS RESULT=DUPLICATED_ID MESSAGE=\"id in use\"\n",
        ) {
            Err(Error::Router(error)) => {
                assert_eq!(error.message(), Some("id in use"));
            }
            result => panic!("expected router error, got {result:?}"),
        }
    }
}
