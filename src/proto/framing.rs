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

use crate::error::ProtocolError;

/// Maximum accepted length for a single reply line.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Splits an inbound byte stream into LF-terminated lines.
///
/// Bytes past the last consumed line stay buffered so that a control
/// connection can be handed off to the caller as a data stream without
/// losing anything the router already sent.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create new [`LineFramer`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Append inbound bytes.
    ///
    /// Fails if the unterminated line grows past [`MAX_LINE_LEN`].
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.extend_from_slice(bytes);

        match self.buffer.iter().position(|byte| *byte == b'\n') {
            Some(position) if position > MAX_LINE_LEN => Err(ProtocolError::LineTooLong),
            None if self.buffer.len() > MAX_LINE_LEN => Err(ProtocolError::LineTooLong),
            _ => Ok(()),
        }
    }

    /// Pop the next complete line, with the trailing LF (and CR, if any)
    /// stripped and the text decoded as UTF-8.
    pub fn next_line(&mut self) -> Result<Option<String>, ProtocolError> {
        let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') else {
            return Ok(None);
        };

        let mut line: Vec<u8> = self.buffer.drain(..=position).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        String::from_utf8(line)
            .map(Some)
            .map_err(|_| ProtocolError::InvalidMessage)
    }

    /// Take the bytes received past the last consumed line.
    pub fn take_remainder(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}
