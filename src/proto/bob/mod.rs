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

//! State machines for the BOB bridge.
//!
//! BOB speaks first: the dialogue starts with the router's version banner,
//! so the machines are driven purely by received replies.

pub mod creator;
pub mod parser;
pub mod remover;

pub use creator::{TunnelCreator, TunnelInfo, TunnelSide};
pub use parser::{Reply, TunnelDescriptor};
pub use remover::TunnelRemover;

/// Next step demanded by a BOB state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum Step<T> {
    /// Write `command` to the control connection.
    Send(Vec<u8>),

    /// Keep reading; the reply did not complete a phase.
    Wait,

    /// Dialogue has finished.
    Done(T),
}
