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

use std::path::PathBuf;

/// Default TCP port of the SAMv3 bridge.
pub(crate) const SAMV3_TCP_PORT: u16 = 7656;

/// Default TCP port of the BOB bridge.
pub(crate) const BOB_TCP_PORT: u16 = 2827;

/// Default local port a client tunnel listens on.
pub(crate) const DEFAULT_INPORT: u16 = 9000;

/// Default local port a server tunnel forwards to.
pub(crate) const DEFAULT_OUTPORT: u16 = 9001;

/// Session style.
///
/// Only [`SessionStyle::Stream`] is supported; the other styles exist so
/// that requests for them can be rejected with a typed error instead of
/// being sent to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStyle {
    /// Virtual streams.
    Stream,

    /// Repliable datagrams.
    Datagram,

    /// Anonymous datagrams.
    Raw,
}

impl SessionStyle {
    /// Wire name of the style.
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "STREAM",
            Self::Datagram => "DATAGRAM",
            Self::Raw => "RAW",
        }
    }
}

/// SAM session configuration.
///
/// The configuration is captured when a session request is constructed and
/// is not re-read afterwards.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session nickname.
    ///
    /// Names the session in the registry and the router. Synthesized from
    /// the process id when absent.
    pub nickname: Option<String>,

    /// Session style. Only [`SessionStyle::Stream`] is supported.
    pub style: SessionStyle,

    /// Path used to persist the private key of the session's destination.
    ///
    /// When set and readable, its content is used as the destination's
    /// private key. When set and unreadable, the key the router returns is
    /// written back to it after the session has been created.
    pub keyfile_path: Option<PathBuf>,

    /// Router-specific tunnel options, sent verbatim and in order.
    pub options: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            nickname: None,
            style: SessionStyle::Stream,
            keyfile_path: None,
            options: Vec::new(),
        }
    }
}

/// BOB tunnel configuration.
///
/// Frozen once handed to a tunnel dialogue.
#[derive(Debug, Clone, Default)]
pub struct TunnelConfig {
    /// Tunnel nickname in the router's namespace. Must not be empty.
    pub nickname: String,

    /// Private keypair of the tunnel's destination.
    ///
    /// When absent the router generates a fresh one and the dialogue reads
    /// it back.
    pub keypair: Option<String>,

    /// Path used to persist a generated keypair.
    pub keyfile_path: Option<PathBuf>,

    /// Host a client tunnel listens on. Defaults to `localhost`.
    pub inhost: Option<String>,

    /// Port a client tunnel listens on. Defaults to `9000`.
    pub inport: Option<u16>,

    /// Host a server tunnel forwards inbound streams to. Defaults to
    /// `localhost`.
    pub outhost: Option<String>,

    /// Port a server tunnel forwards inbound streams to. Defaults to
    /// `9001`.
    pub outport: Option<u16>,
}

/// Nickname used when the caller didn't assign one.
///
/// All sessions in the same process share it, as the original deployments
/// expect. Reusing the process id across restarts can collide with a stale
/// router-side session.
pub(crate) fn default_nickname() -> String {
    format!("denali-{}", std::process::id())
}
