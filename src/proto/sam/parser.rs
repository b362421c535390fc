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

use crate::error::RouterError;

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_while1},
    character::complete::{alpha1, alphanumeric1, char, multispace0},
    combinator::{map, recognize},
    error::{make_error, ErrorKind},
    multi::{many0, many0_count},
    sequence::{delimited, pair, preceded, separated_pair, tuple},
    Err, IResult, Parser,
};

use std::collections::HashMap;

/// Parsed command.
///
/// Represents a line that had valid form but isn't necessarily a reply
/// `denali` recognizes.
struct ParsedCommand<'a> {
    /// Command.
    ///
    /// Supported values: `HELLO`, `SESSION`, `NAMING` and `STREAM`.
    command: &'a str,

    /// Subcommand.
    ///
    /// Supported values: `REPLY` for `HELLO`/`NAMING`, `STATUS` for
    /// `SESSION`/`STREAM`.
    subcommand: &'a str,

    /// Parsed key-value pairs.
    fields: HashMap<&'a str, &'a str>,
}

/// Successful naming lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingEntry {
    /// Name that was looked up.
    pub name: String,

    /// Destination the name resolves to.
    pub value: String,
}

/// Response received from the SAMv3 bridge.
#[derive(Debug)]
pub enum Response {
    /// Response to `HELLO VERSION`.
    Hello {
        /// Negotiated version or an error.
        result: Result<String, RouterError>,
    },

    /// Response to `SESSION CREATE`.
    Session {
        /// Private key of the created destination or an error.
        result: Result<String, RouterError>,
    },

    /// Response to `NAMING LOOKUP`.
    Naming {
        /// Resolved name or an error.
        result: Result<NamingEntry, RouterError>,
    },

    /// Response to `STREAM CONNECT`/`STREAM ACCEPT`.
    Stream {
        /// Success or an error.
        result: Result<(), RouterError>,
    },
}

impl<'a> TryFrom<ParsedCommand<'a>> for Response {
    type Error = ();

    fn try_from(value: ParsedCommand<'a>) -> Result<Self, Self::Error> {
        let result = value.fields.get("RESULT").copied();
        let message = value.fields.get("MESSAGE").copied();

        match (value.command, value.subcommand) {
            ("HELLO", "REPLY") => match (result, value.fields.get("VERSION")) {
                // the router always reports a version since a version range
                // is offered in the handshake
                (Some("OK"), Some(version)) => Ok(Response::Hello {
                    result: Ok(version.to_string()),
                }),
                (Some("OK"), None) | (None, _) => Err(()),
                (Some(result), _) => Ok(Response::Hello {
                    result: Err(RouterError::from((result, message))),
                }),
            },
            ("SESSION", "STATUS") => match (result, value.fields.get("DESTINATION")) {
                (Some("OK"), Some(destination)) => Ok(Response::Session {
                    result: Ok(destination.to_string()),
                }),
                (Some("OK"), None) | (None, _) => Err(()),
                (Some(result), _) => Ok(Response::Session {
                    result: Err(RouterError::from((result, message))),
                }),
            },
            ("NAMING", "REPLY") => {
                match (result, value.fields.get("NAME"), value.fields.get("VALUE")) {
                    (Some("OK"), Some(name), Some(entry)) => Ok(Response::Naming {
                        result: Ok(NamingEntry {
                            name: name.to_string(),
                            value: entry.to_string(),
                        }),
                    }),
                    (Some("OK"), _, _) | (None, _, _) => Err(()),
                    (Some(result), _, _) => Ok(Response::Naming {
                        result: Err(RouterError::from((result, message))),
                    }),
                }
            }
            ("STREAM", "STATUS") => match result {
                Some("OK") => Ok(Response::Stream { result: Ok(()) }),
                Some(result) => Ok(Response::Stream {
                    result: Err(RouterError::from((result, message))),
                }),
                None => Err(()),
            },
            _ => Err(()),
        }
    }
}

impl Response {
    /// Attempt to parse `input` into `Response`.
    //
    // Non-public method returning `IResult` for cleaner error handling.
    fn parse_inner(input: &str) -> IResult<&str, Self> {
        let (rest, (command, _, subcommand, fields)) = tuple((
            alt((tag("HELLO"), tag("SESSION"), tag("NAMING"), tag("STREAM"))),
            char(' '),
            alt((tag("REPLY"), tag("STATUS"))),
            parse_key_value_pairs,
        ))(input)?;

        Ok((
            rest,
            Response::try_from(ParsedCommand {
                command,
                subcommand,
                fields,
            })
            .map_err(|_| Err::Error(make_error(input, ErrorKind::Fail)))?,
        ))
    }

    /// Attempt to parse `input` into `Response`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim_end_matches(['\r', '\n']);

        Some(Self::parse_inner(input).ok()?.1)
    }
}

fn parse_key_value_pairs(input: &str) -> IResult<&str, HashMap<&str, &str>> {
    let (input, key_value_pairs) = many0(preceded(multispace0, parse_key_value))(input)?;
    Ok((input, key_value_pairs.into_iter().collect()))
}

fn parse_key_value(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(parse_key, char('='), parse_value)(input)
}

fn parse_key(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn parse_value(input: &str) -> IResult<&str, &str> {
    alt((
        parse_quoted_value,
        map(take_while1(|c: char| !c.is_whitespace()), |s: &str| s),
    ))(input)
}

fn parse_quoted_value(input: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        escaped(is_not("\\\""), '\\', alt((tag("\""), tag("\\")))),
        char('"'),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hello() {
        // success
        match Response::parse("HELLO REPLY RESULT=OK VERSION=3.1") {
            Some(Response::Hello {
                result: Ok(version),
            }) if version == *"3.1" => {}
            response => panic!("invalid response: {response:?}"),
        }

        // failure
        match Response::parse("HELLO REPLY RESULT=I2P_ERROR MESSAGE=\"router error\"") {
            Some(Response::Hello { result: Err(error) })
                if error == RouterError::I2pError(Some("router error".to_string())) => {}
            response => panic!("invalid response: {response:?}"),
        }

        // no version in common
        match Response::parse("HELLO REPLY RESULT=NOVERSION") {
            Some(Response::Hello { result: Err(error) })
                if error == RouterError::NoVersion(None) => {}
            response => panic!("invalid response: {response:?}"),
        }
    }

    #[test]
    fn parse_session_status() {
        match Response::parse("SESSION STATUS RESULT=OK DESTINATION=privkey") {
            Some(Response::Session {
                result: Ok(destination),
            }) if destination == *"privkey" => {}
            response => panic!("invalid response: {response:?}"),
        }

        match Response::parse("SESSION STATUS RESULT=DUPLICATED_ID") {
            Some(Response::Session { result: Err(error) })
                if error == RouterError::DuplicatedId(None) => {}
            response => panic!("invalid response: {response:?}"),
        }
    }

    #[test]
    fn parse_naming_reply() {
        match Response::parse("NAMING REPLY RESULT=OK NAME=ME VALUE=pubkey") {
            Some(Response::Naming { result: Ok(entry) })
                if entry
                    == NamingEntry {
                        name: "ME".to_string(),
                        value: "pubkey".to_string(),
                    } => {}
            response => panic!("invalid response: {response:?}"),
        }

        match Response::parse("NAMING REPLY RESULT=KEY_NOT_FOUND NAME=spam.i2p") {
            Some(Response::Naming { result: Err(error) })
                if error == RouterError::KeyNotFound(None) => {}
            response => panic!("invalid response: {response:?}"),
        }
    }

    #[test]
    fn parse_stream_status() {
        match Response::parse("STREAM STATUS RESULT=OK") {
            Some(Response::Stream { result: Ok(()) }) => {}
            response => panic!("invalid response: {response:?}"),
        }

        match Response::parse(
            "STREAM STATUS RESULT=CANT_REACH_PEER MESSAGE=\"Connection failed\"",
        ) {
            Some(Response::Stream { result: Err(error) })
                if error == RouterError::CantReachPeer(Some("Connection failed".to_string())) => {}
            response => panic!("invalid response: {response:?}"),
        }
    }

    #[test]
    fn invalid_responses() {
        assert!(Response::parse("HELLO REPLY").is_none());
        assert!(Response::parse("HELLO REPLY KEY=VALUE").is_none());
        assert!(Response::parse("HELLO REPLY RESULT=OK").is_none());
        assert!(Response::parse("SESSION STATUS RESULT=OK").is_none());
        assert!(Response::parse("NAMING REPLY RESULT=OK NAME=ME").is_none());
        assert!(Response::parse("TEST COMMAND KEY=VALUE").is_none());
    }
}
