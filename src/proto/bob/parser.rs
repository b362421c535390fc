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

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::space1,
    combinator::{map, rest},
    error::{make_error, ErrorKind},
    multi::many1,
    sequence::{preceded, separated_pair},
    Err, IResult,
};

/// Tunnel descriptor, one row of the router's `list` output.
///
/// The router prints `not_set` for ports that haven't been assigned yet, so
/// the ports are optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TunnelDescriptor {
    /// Tunnel nickname.
    pub nickname: String,

    /// Tunnel is starting.
    pub starting: bool,

    /// Tunnel is running.
    pub running: bool,

    /// Tunnel is stopping.
    pub stopping: bool,

    /// Tunnel has a keypair assigned.
    pub has_keys: bool,

    /// Tunnel is in quiet mode.
    pub quiet: bool,

    /// Port the tunnel listens on.
    pub inport: Option<u16>,

    /// Host the tunnel listens on.
    pub inhost: Option<String>,

    /// Port the tunnel forwards to.
    pub outport: Option<u16>,

    /// Host the tunnel forwards to.
    pub outhost: Option<String>,
}

/// Reply received from the BOB bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Version banner, the first line the router sends.
    Version(String),

    /// Success acknowledgement of the last issued command, with optional
    /// free text.
    Ok(Option<String>),

    /// Failure of the last issued command.
    Error(String),

    /// Tunnel descriptor row emitted during `list`.
    Data(TunnelDescriptor),
}

impl Reply {
    /// Attempt to parse `input` into `Reply`.
    //
    // Non-public method returning `IResult` for cleaner error handling.
    fn parse_inner(input: &str) -> IResult<&str, Self> {
        alt((parse_version, parse_data, parse_ok, parse_error))(input)
    }

    /// Attempt to parse `input` into `Reply`.
    ///
    /// The whole line must be consumed for the parse to be accepted.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim_end_matches(['\r', '\n']);

        match Self::parse_inner(input) {
            Ok(("", reply)) => Some(reply),
            _ => None,
        }
    }
}

fn parse_version(input: &str) -> IResult<&str, Reply> {
    map(preceded(tag("BOB "), rest), |version: &str| {
        Reply::Version(version.to_string())
    })(input)
}

fn parse_ok(input: &str) -> IResult<&str, Reply> {
    let (rest_input, _) = tag("OK")(input)?;

    if rest_input.is_empty() {
        return Ok(("", Reply::Ok(None)));
    }

    let (rest_input, message) = preceded(tag(" "), rest)(rest_input)?;
    let message = (!message.is_empty()).then(|| message.to_string());

    Ok((rest_input, Reply::Ok(message)))
}

fn parse_error(input: &str) -> IResult<&str, Reply> {
    map(preceded(tag("ERROR "), rest), |message: &str| {
        Reply::Error(message.to_string())
    })(input)
}

fn parse_data(input: &str) -> IResult<&str, Reply> {
    let (rest_input, fields) = preceded(tag("DATA"), many1(preceded(space1, parse_field)))(input)?;

    let mut descriptor = TunnelDescriptor::default();
    let mut has_nickname = false;

    for (key, value) in fields {
        match key {
            "NICKNAME" => {
                descriptor.nickname = value.to_string();
                has_nickname = true;
            }
            "STARTING" => descriptor.starting = value == "true",
            "RUNNING" => descriptor.running = value == "true",
            "STOPPING" => descriptor.stopping = value == "true",
            "KEYS" => descriptor.has_keys = value == "true",
            "QUIET" => descriptor.quiet = value == "true",
            "INPORT" => descriptor.inport = value.parse().ok(),
            "INHOST" => descriptor.inhost = Some(value.to_string()),
            "OUTPORT" => descriptor.outport = value.parse().ok(),
            "OUTHOST" => descriptor.outhost = Some(value.to_string()),
            _ => {}
        }
    }

    if !has_nickname {
        return Err(Err::Error(make_error(input, ErrorKind::Fail)));
    }

    Ok((rest_input, Reply::Data(descriptor)))
}

fn parse_field(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_while1(|c: char| c.is_ascii_uppercase()),
        tag(": "),
        take_while1(|c: char| !c.is_whitespace()),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_banner() {
        assert_eq!(
            Reply::parse("BOB 00.00.10"),
            Some(Reply::Version("00.00.10".to_string()))
        );
    }

    #[test]
    fn parse_ok_with_and_without_message() {
        assert_eq!(Reply::parse("OK"), Some(Reply::Ok(None)));
        assert_eq!(
            Reply::parse("OK Listing done"),
            Some(Reply::Ok(Some("Listing done".to_string())))
        );
        assert_eq!(
            Reply::parse("OK HTTP 418"),
            Some(Reply::Ok(Some("HTTP 418".to_string())))
        );
    }

    #[test]
    fn parse_error_line() {
        assert_eq!(
            Reply::parse("ERROR tunnel shutting down"),
            Some(Reply::Error("tunnel shutting down".to_string()))
        );
    }

    #[test]
    fn parse_descriptor() {
        let reply = Reply::parse(
            "DATA NICKNAME: spam STARTING: false RUNNING: true STOPPING: false \
             KEYS: true QUIET: false INPORT: 12345 INHOST: localhost \
             OUTPORT: 23456 OUTHOST: localhost",
        );

        match reply {
            Some(Reply::Data(descriptor)) => {
                assert_eq!(descriptor.nickname, "spam");
                assert!(!descriptor.starting);
                assert!(descriptor.running);
                assert!(!descriptor.stopping);
                assert!(descriptor.has_keys);
                assert!(!descriptor.quiet);
                assert_eq!(descriptor.inport, Some(12345));
                assert_eq!(descriptor.inhost.as_deref(), Some("localhost"));
                assert_eq!(descriptor.outport, Some(23456));
                assert_eq!(descriptor.outhost.as_deref(), Some("localhost"));
            }
            reply => panic!("invalid reply: {reply:?}"),
        }
    }

    #[test]
    fn parse_descriptor_with_unset_ports() {
        let reply = Reply::parse(
            "DATA NICKNAME: spam STARTING: false RUNNING: false STOPPING: false \
             KEYS: false QUIET: false INPORT: not_set INHOST: not_set \
             OUTPORT: not_set OUTHOST: not_set",
        );

        match reply {
            Some(Reply::Data(descriptor)) => {
                assert_eq!(descriptor.inport, None);
                assert_eq!(descriptor.outport, None);
            }
            reply => panic!("invalid reply: {reply:?}"),
        }
    }

    #[test]
    fn invalid_lines_rejected() {
        assert!(Reply::parse("").is_none());
        assert!(Reply::parse("DATA").is_none());
        assert!(Reply::parse("DATA RUNNING: true").is_none());
        assert!(Reply::parse("NOPE what is this").is_none());
    }
}
