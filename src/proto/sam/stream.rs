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
    proto::sam::{parser::Response, SAM_MAX, SAM_MIN},
};

/// Logging target for the file.
const LOG_TARGET: &str = "denali::sam::stream";

/// Derived-dialogue state.
///
/// Every dialogue derived from a session runs on its own control
/// connection: virtual stream connects, accepts and name lookups.
#[derive(Debug, PartialEq, Eq)]
enum StreamState {
    /// Stream state is uninitialized.
    Uninitialized,

    /// Handshake has been sent to the router.
    Handshaking,

    /// Connection has been handshaked.
    Handshaked,

    /// `STREAM CONNECT` has been sent.
    ConnectPending,

    /// `STREAM ACCEPT` has been sent.
    AcceptPending,

    /// `NAMING LOOKUP` has been sent.
    LookupPending {
        /// Name being resolved.
        name: String,
    },

    /// Virtual stream is open; the connection is now a data stream.
    Open,

    /// Name lookup has succeeded.
    Found {
        /// Resolved destination.
        destination: String,
    },

    /// State has been poisoned.
    Poisoned,
}

/// State machine for dialogues derived from an active session.
pub struct StreamController {
    /// Stream state.
    state: StreamState,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    /// Create new [`StreamController`].
    pub fn new() -> Self {
        Self {
            state: StreamState::Uninitialized,
        }
    }

    /// Initialize the connection by handshaking with the router.
    pub fn handshake(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, StreamState::Poisoned) {
            StreamState::Uninitialized => {
                self.state = StreamState::Handshaking;

                Ok(format!("HELLO VERSION MIN={SAM_MIN} MAX={SAM_MAX}\n").into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot handshake stream, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Open a virtual stream from session `id` to `destination`.
    pub fn connect(&mut self, id: &str, destination: &str) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, StreamState::Poisoned) {
            StreamState::Handshaked => {
                tracing::trace!(
                    target: LOG_TARGET,
                    %id,
                    "open stream to remote destination",
                );
                self.state = StreamState::ConnectPending;

                Ok(format!("STREAM CONNECT ID={id} DESTINATION={destination}\n").into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot open stream, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Start accepting one inbound virtual stream for session `id`.
    pub fn accept(&mut self, id: &str) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, StreamState::Poisoned) {
            StreamState::Handshaked => {
                tracing::trace!(
                    target: LOG_TARGET,
                    %id,
                    "start listening for virtual stream",
                );
                self.state = StreamState::AcceptPending;

                Ok(format!("STREAM ACCEPT ID={id}\n").into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot accept stream, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Resolve `name` to a destination.
    pub fn lookup(&mut self, name: &str) -> Result<Vec<u8>, ProtocolError> {
        match std::mem::replace(&mut self.state, StreamState::Poisoned) {
            StreamState::Handshaked => {
                tracing::trace!(
                    target: LOG_TARGET,
                    %name,
                    "lookup destination",
                );
                self.state = StreamState::LookupPending {
                    name: name.to_string(),
                };

                Ok(format!("NAMING LOOKUP NAME={name}\n").into_bytes())
            }
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot lookup name, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState)
            }
        }
    }

    /// Handle response from the router.
    pub fn handle_response(&mut self, response: &str) -> Result<(), Error> {
        match std::mem::replace(&mut self.state, StreamState::Poisoned) {
            StreamState::Handshaking => match Response::parse(response) {
                Some(Response::Hello { result: Ok(_) }) => {
                    self.state = StreamState::Handshaked;

                    Ok(())
                }
                Some(Response::Hello { result: Err(error) }) => Err(error.into()),
                None => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        ?response,
                        "invalid response from router to stream `HELLO`",
                    );
                    Err(ProtocolError::InvalidMessage.into())
                }
                Some(response) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        ?response,
                        "unexpected response from router to stream `HELLO`",
                    );
                    Err(ProtocolError::InvalidState.into())
                }
            },
            state @ (StreamState::ConnectPending | StreamState::AcceptPending) => {
                match Response::parse(response) {
                    Some(Response::Stream { result: Ok(()) }) => {
                        tracing::info!(
                            target: LOG_TARGET,
                            ?state,
                            "stream status ok",
                        );
                        self.state = StreamState::Open;

                        Ok(())
                    }
                    Some(Response::Stream { result: Err(error) }) => Err(error.into()),
                    None => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            ?response,
                            ?state,
                            "invalid response from router to stream request",
                        );
                        Err(ProtocolError::InvalidMessage.into())
                    }
                    Some(response) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            ?response,
                            ?state,
                            "unexpected response from router to stream request",
                        );
                        Err(ProtocolError::InvalidState.into())
                    }
                }
            }
            StreamState::LookupPending { name } => match Response::parse(response) {
                Some(Response::Naming { result: Ok(entry) }) if entry.name == name => {
                    self.state = StreamState::Found {
                        destination: entry.value,
                    };

                    Ok(())
                }
                Some(Response::Naming { result: Err(error) }) => Err(error.into()),
                None => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        ?response,
                        %name,
                        "invalid response from router to `NAMING LOOKUP`",
                    );
                    Err(ProtocolError::InvalidMessage.into())
                }
                Some(response) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        ?response,
                        %name,
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

    /// Get the destination a successful lookup resolved to.
    ///
    /// Panics if called before a lookup has succeeded.
    pub fn destination(&self) -> &str {
        let StreamState::Found { destination } = &self.state else {
            panic!("invalid state");
        };

        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;

    #[test]
    fn open_virtual_stream() {
        let mut controller = StreamController::new();

        assert_eq!(
            controller.handshake(),
            Ok(String::from("HELLO VERSION MIN=3.0 MAX=3.1\n").into_bytes())
        );
        assert!(controller.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());

        assert_eq!(
            controller.connect("spam", "remote"),
            Ok(String::from("STREAM CONNECT ID=spam DESTINATION=remote\n").into_bytes())
        );
        assert!(controller.handle_response("STREAM STATUS RESULT=OK\n").is_ok());
        assert_eq!(controller.state, StreamState::Open);
    }

    #[test]
    fn accept_virtual_stream() {
        let mut controller = StreamController::new();

        assert!(controller.handshake().is_ok());
        assert!(controller.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());

        assert_eq!(
            controller.accept("spam"),
            Ok(String::from("STREAM ACCEPT ID=spam\n").into_bytes())
        );
        assert!(controller.handle_response("STREAM STATUS RESULT=OK\n").is_ok());
        assert_eq!(controller.state, StreamState::Open);
    }

    #[test]
    fn lookup_name() {
        let mut controller = StreamController::new();

        assert!(controller.handshake().is_ok());
        assert!(controller.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());

        assert_eq!(
            controller.lookup("spam.i2p"),
            Ok(String::from("NAMING LOOKUP NAME=spam.i2p\n").into_bytes())
        );
        assert!(controller
            .handle_response("NAMING REPLY RESULT=OK NAME=spam.i2p VALUE=pubkey\n")
            .is_ok());
        assert_eq!(controller.destination(), "pubkey");
    }

    #[test]
    fn unreachable_peer_fails_connect() {
        let mut controller = StreamController::new();

        assert!(controller.handshake().is_ok());
        assert!(controller.handle_response("HELLO REPLY RESULT=OK VERSION=3.1\n").is_ok());
        assert!(controller.connect("spam", "remote").is_ok());

        match controller.handle_response("STREAM STATUS RESULT=CANT_REACH_PEER\n") {
            Err(Error::Router(RouterError::CantReachPeer(None))) => {}
            result => panic!("expected router error, got {result:?}"),
        }
    }
}
