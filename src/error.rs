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

use std::{fmt, sync::Arc};

/// `denali` error type.
///
/// The type is cheap to clone so a session-creation outcome can be shared
/// between every task waiting on the same nickname.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("i/o error: `{0}`")]
    Io(Arc<std::io::Error>),

    /// Protocol error.
    #[error("protocol error: `{0}`")]
    Protocol(#[from] ProtocolError),

    /// Error received from the router.
    #[error("router error: `{0}`")]
    Router(#[from] RouterError),

    /// Operation on a session that has already been closed.
    #[error("session has been closed")]
    ConnectionDone,

    /// Session creation was cancelled before it completed.
    #[error("session creation was cancelled")]
    Cancelled,

    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Session style other than `STREAM` was requested.
    #[error("unsupported session style: `{0}`")]
    UnsupportedStyle(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

/// Protocol error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// State machine was in an invalid state for the attempted operation.
    #[error("invalid state")]
    InvalidState,

    /// Router sent a message that couldn't be parsed.
    #[error("invalid message")]
    InvalidMessage,

    /// Reply line exceeded the maximum accepted length.
    #[error("line too long")]
    LineTooLong,
}

/// Error received from the I2P router.
///
/// SAM failures carry the taxonomy of the `RESULT=` token, BOB failures the
/// free text of the `ERROR` line. The router's own message is preserved
/// verbatim in both cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The peer exists, but cannot be reached.
    CantReachPeer(Option<String>),

    /// The specified destination is already in use.
    DuplicatedDest(Option<String>),

    /// The session id is already in use.
    DuplicatedId(Option<String>),

    /// A generic I2P error (e.g., I2CP disconnection).
    I2pError(Option<String>),

    /// The specified key is not valid (e.g., bad format).
    InvalidKey(Option<String>),

    /// The router rejected the session id.
    InvalidId(Option<String>),

    /// The naming system can't resolve the given name.
    KeyNotFound(Option<String>),

    /// The peer cannot be found on the network.
    PeerNotFound(Option<String>),

    /// Timeout while waiting for an event (e.g. peer answer).
    Timeout(Option<String>),

    /// No version in common with the router.
    NoVersion(Option<String>),

    /// `RESULT=` token this library doesn't recognize.
    Unrecognized(String, Option<String>),

    /// Free-text failure reported on a BOB `ERROR` line.
    Bob(String),
}

impl RouterError {
    /// Verbatim message carried with the error, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::CantReachPeer(message)
            | Self::DuplicatedDest(message)
            | Self::DuplicatedId(message)
            | Self::I2pError(message)
            | Self::InvalidKey(message)
            | Self::InvalidId(message)
            | Self::KeyNotFound(message)
            | Self::PeerNotFound(message)
            | Self::Timeout(message)
            | Self::NoVersion(message)
            | Self::Unrecognized(_, message) => message.as_deref(),
            Self::Bob(message) => Some(message),
        }
    }
}

impl From<(&str, Option<&str>)> for RouterError {
    fn from((result, message): (&str, Option<&str>)) -> Self {
        let message = message.map(|message| message.to_string());

        match result {
            "CANT_REACH_PEER" => Self::CantReachPeer(message),
            "DUPLICATED_DEST" => Self::DuplicatedDest(message),
            "DUPLICATED_ID" => Self::DuplicatedId(message),
            "I2P_ERROR" => Self::I2pError(message),
            "INVALID_KEY" => Self::InvalidKey(message),
            "INVALID_ID" => Self::InvalidId(message),
            "KEY_NOT_FOUND" => Self::KeyNotFound(message),
            "PEER_NOT_FOUND" => Self::PeerNotFound(message),
            "TIMEOUT" => Self::Timeout(message),
            "NOVERSION" => Self::NoVersion(message),
            result => Self::Unrecognized(result.to_string(), message),
        }
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CantReachPeer(_) => write!(f, "the peer exists, but cannot be reached")?,
            Self::DuplicatedDest(_) => write!(f, "the specified destination is already in use")?,
            Self::DuplicatedId(_) => write!(f, "the session id is already in use")?,
            Self::I2pError(_) => write!(f, "generic i2p error (e.g., i2cp disconnection)")?,
            Self::InvalidKey(_) => write!(f, "the specified key is not valid (e.g., bad format)")?,
            Self::InvalidId(_) => write!(f, "the router rejected the session id")?,
            Self::KeyNotFound(_) => write!(f, "the naming system can't resolve the given name")?,
            Self::PeerNotFound(_) => write!(f, "the peer cannot be found on the network")?,
            Self::Timeout(_) => write!(f, "timeout while waiting for an event")?,
            Self::NoVersion(_) => write!(f, "no version in common with the router")?,
            Self::Unrecognized(result, _) => write!(f, "unrecognized result `{result}`")?,
            Self::Bob(message) => return write!(f, "{message}"),
        }

        match self.message() {
            Some(message) => write!(f, ": `{message}`"),
            None => Ok(()),
        }
    }
}

impl std::error::Error for RouterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_token_taxonomy() {
        assert_eq!(
            RouterError::from(("CANT_REACH_PEER", None)),
            RouterError::CantReachPeer(None)
        );
        assert_eq!(
            RouterError::from(("I2P_ERROR", Some("router error"))),
            RouterError::I2pError(Some("router error".to_string()))
        );
        assert_eq!(
            RouterError::from(("EXPLODED", Some("boom"))),
            RouterError::Unrecognized("EXPLODED".to_string(), Some("boom".to_string()))
        );
    }

    #[test]
    fn message_preserved_verbatim() {
        let error = RouterError::from(("TIMEOUT", Some("Connection timed out")));
        assert_eq!(error.message(), Some("Connection timed out"));

        let error = RouterError::Bob("tunnel shutting down".to_string());
        assert_eq!(error.message(), Some("tunnel shutting down"));
        assert_eq!(error.to_string(), "tunnel shutting down");
    }
}
