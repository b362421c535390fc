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
    error::{Error, ProtocolError, RouterError},
    options::{TunnelConfig, DEFAULT_INPORT, DEFAULT_OUTPORT},
    proto::bob::{
        parser::{Reply, TunnelDescriptor},
        Step,
    },
};

/// Logging target for the file.
const LOG_TARGET: &str = "denali::bob::creator";

/// Which side of the tunnel the creator configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSide {
    /// Local listener bridging outbound connections into I2P.
    Client,

    /// Local forwarder bridging inbound I2P streams to a `host:port`.
    Server,
}

/// Outcome of a finished creation dialogue.
///
/// A tunnel adopted from the router's `list` output already has keys, so
/// the dialogue doesn't fetch them and both fields stay empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    /// Base64 destination of the tunnel.
    pub destination: Option<String>,

    /// Private keypair of the destination.
    pub keypair: Option<String>,
}

/// Tunnel creation state.
#[derive(Debug, PartialEq, Eq)]
enum CreatorState {
    /// Waiting for the router's version banner.
    AwaitingVersion,

    /// Banner seen, waiting for the `OK` that follows it.
    AwaitingBannerOk,

    /// `list` has been sent; descriptor rows are being collected.
    Listing {
        /// Descriptors received so far.
        tunnels: Vec<TunnelDescriptor>,
    },

    /// `setnick` has been sent.
    SettingNick,

    /// `setkeys` has been sent.
    SettingKeys,

    /// `newkeys` has been sent.
    GeneratingKeys,

    /// `getdest` has been sent.
    FetchingDest,

    /// `getkeys` has been sent.
    FetchingKeys,

    /// `getnick` has been sent for an existing tunnel.
    Adopting {
        /// Descriptor of the adopted tunnel.
        descriptor: TunnelDescriptor,
    },

    /// `stop` has been sent for a running adopted tunnel.
    Stopping,

    /// `inhost`/`outhost` has been sent.
    SettingHost,

    /// `inport`/`outport` has been sent.
    SettingPort,

    /// `start` has been sent.
    Starting,

    /// Dialogue has finished.
    Done,

    /// State has been poisoned.
    Poisoned,
}

/// State machine for building (or adopting) a BOB tunnel.
pub struct TunnelCreator {
    /// Tunnel configuration.
    config: TunnelConfig,

    /// Tunnel side.
    side: TunnelSide,

    /// Creation state.
    state: CreatorState,

    /// Destination captured during the dialogue.
    destination: Option<String>,

    /// Keypair, either supplied by the caller or captured during the
    /// dialogue. Its presence selects the key sub-path before any command
    /// is sent.
    keypair: Option<String>,
}

impl TunnelCreator {
    /// Create new [`TunnelCreator`] from `config`.
    pub fn new(config: TunnelConfig, side: TunnelSide) -> Result<Self, Error> {
        if config.nickname.is_empty() {
            return Err(Error::InvalidArgument("tunnel nickname must not be empty"));
        }

        let keypair = config.keypair.clone();

        Ok(Self {
            config,
            side,
            state: CreatorState::AwaitingVersion,
            destination: None,
            keypair,
        })
    }

    /// Handle a reply from the router and decide the next step.
    pub fn handle_reply(&mut self, reply: Reply) -> Result<Step<TunnelInfo>, Error> {
        if let Reply::Error(message) = reply {
            tracing::warn!(
                target: LOG_TARGET,
                nickname = %self.config.nickname,
                %message,
                "tunnel dialogue failed",
            );

            return Err(RouterError::Bob(message).into());
        }

        match std::mem::replace(&mut self.state, CreatorState::Poisoned) {
            CreatorState::AwaitingVersion => match reply {
                Reply::Version(version) => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        nickname = %self.config.nickname,
                        %version,
                        "connected to bob bridge",
                    );
                    self.state = CreatorState::AwaitingBannerOk;

                    Ok(Step::Wait)
                }
                reply => self.unexpected(reply),
            },
            CreatorState::AwaitingBannerOk => match reply {
                Reply::Ok(_) => {
                    self.state = CreatorState::Listing {
                        tunnels: Vec::new(),
                    };

                    Ok(Step::Send(String::from("list\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            CreatorState::Listing { mut tunnels } => match reply {
                Reply::Data(descriptor) => {
                    tunnels.push(descriptor);
                    self.state = CreatorState::Listing { tunnels };

                    Ok(Step::Wait)
                }
                Reply::Ok(_) => {
                    // an existing tunnel with this nickname is adopted,
                    // otherwise a fresh one is registered
                    match tunnels
                        .into_iter()
                        .find(|descriptor| descriptor.nickname == self.config.nickname)
                    {
                        Some(descriptor) => {
                            tracing::trace!(
                                target: LOG_TARGET,
                                nickname = %self.config.nickname,
                                running = descriptor.running,
                                "adopt existing tunnel",
                            );
                            let command = format!("getnick {}\n", self.config.nickname);
                            self.state = CreatorState::Adopting { descriptor };

                            Ok(Step::Send(command.into_bytes()))
                        }
                        None => {
                            let command = format!("setnick {}\n", self.config.nickname);
                            self.state = CreatorState::SettingNick;

                            Ok(Step::Send(command.into_bytes()))
                        }
                    }
                }
                reply => self.unexpected(reply),
            },
            CreatorState::SettingNick => match reply {
                Reply::Ok(_) => match &self.keypair {
                    Some(keypair) => {
                        let command = format!("setkeys {keypair}\n");
                        self.state = CreatorState::SettingKeys;

                        Ok(Step::Send(command.into_bytes()))
                    }
                    None => {
                        self.state = CreatorState::GeneratingKeys;

                        Ok(Step::Send(String::from("newkeys\n").into_bytes()))
                    }
                },
                reply => self.unexpected(reply),
            },
            CreatorState::SettingKeys => match reply {
                Reply::Ok(_) => {
                    self.state = CreatorState::FetchingDest;

                    Ok(Step::Send(String::from("getdest\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            CreatorState::FetchingDest => match reply {
                Reply::Ok(Some(destination)) => {
                    self.destination = Some(destination);
                    self.set_host()
                }
                reply => self.unexpected(reply),
            },
            CreatorState::GeneratingKeys => match reply {
                // the ack of `newkeys` carries the new destination
                Reply::Ok(Some(destination)) => {
                    self.destination = Some(destination);
                    self.state = CreatorState::FetchingKeys;

                    Ok(Step::Send(String::from("getkeys\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            CreatorState::FetchingKeys => match reply {
                Reply::Ok(Some(keypair)) => {
                    self.keypair = Some(keypair);
                    self.set_host()
                }
                reply => self.unexpected(reply),
            },
            CreatorState::Adopting { descriptor } => match reply {
                Reply::Ok(_) if descriptor.running => {
                    self.state = CreatorState::Stopping;

                    Ok(Step::Send(String::from("stop\n").into_bytes()))
                }
                Reply::Ok(_) => self.set_host(),
                reply => self.unexpected(reply),
            },
            CreatorState::Stopping => match reply {
                Reply::Ok(_) => self.set_host(),
                reply => self.unexpected(reply),
            },
            CreatorState::SettingHost => match reply {
                Reply::Ok(_) => {
                    let command = match self.side {
                        TunnelSide::Client => format!(
                            "inport {}\n",
                            self.config.inport.unwrap_or(DEFAULT_INPORT)
                        ),
                        TunnelSide::Server => format!(
                            "outport {}\n",
                            self.config.outport.unwrap_or(DEFAULT_OUTPORT)
                        ),
                    };
                    self.state = CreatorState::SettingPort;

                    Ok(Step::Send(command.into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            CreatorState::SettingPort => match reply {
                Reply::Ok(_) => {
                    self.state = CreatorState::Starting;

                    Ok(Step::Send(String::from("start\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            CreatorState::Starting => match reply {
                Reply::Ok(_) => {
                    tracing::info!(
                        target: LOG_TARGET,
                        nickname = %self.config.nickname,
                        "tunnel started",
                    );
                    self.state = CreatorState::Done;

                    Ok(Step::Done(TunnelInfo {
                        destination: self.destination.take(),
                        keypair: self.keypair.take(),
                    }))
                }
                reply => self.unexpected(reply),
            },
            state => {
                tracing::warn!(
                    target: LOG_TARGET,
                    ?state,
                    "cannot handle reply, invalid state",
                );

                debug_assert!(false);
                Err(ProtocolError::InvalidState.into())
            }
        }
    }

    /// Emit the host assignment for the configured side.
    fn set_host(&mut self) -> Result<Step<TunnelInfo>, Error> {
        let command = match self.side {
            TunnelSide::Client => format!(
                "inhost {}\n",
                self.config.inhost.as_deref().unwrap_or("localhost")
            ),
            TunnelSide::Server => format!(
                "outhost {}\n",
                self.config.outhost.as_deref().unwrap_or("localhost")
            ),
        };
        self.state = CreatorState::SettingHost;

        Ok(Step::Send(command.into_bytes()))
    }

    /// Fail the dialogue on a reply the current phase doesn't expect.
    fn unexpected(&self, reply: Reply) -> Result<Step<TunnelInfo>, Error> {
        tracing::warn!(
            target: LOG_TARGET,
            nickname = %self.config.nickname,
            ?reply,
            "unexpected reply from bob bridge",
        );

        Err(ProtocolError::InvalidMessage.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(creator: &mut TunnelCreator, line: &str) -> Step<TunnelInfo> {
        creator.handle_reply(Reply::parse(line).unwrap()).unwrap()
    }

    fn sent(step: Step<TunnelInfo>) -> Vec<u8> {
        match step {
            Step::Send(command) => command,
            step => panic!("expected command, got {step:?}"),
        }
    }

    #[test]
    fn banner_lists_tunnels() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
    }

    #[test]
    fn fresh_tunnel_with_generated_keys_and_default_inport() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                inhost: Some("camelot".to_string()),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"setnick spam\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"newkeys\n");
        assert_eq!(sent(drive(&mut creator, "OK shrubbery")), b"getkeys\n");
        assert_eq!(sent(drive(&mut creator, "OK rubberyeggs")), b"inhost camelot\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"inport 9000\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"start\n");

        match drive(&mut creator, "OK HTTP 418") {
            Step::Done(info) => {
                assert_eq!(info.destination.as_deref(), Some("shrubbery"));
                assert_eq!(info.keypair.as_deref(), Some("rubberyeggs"));
            }
            step => panic!("expected terminal step, got {step:?}"),
        }
    }

    #[test]
    fn fresh_tunnel_with_keypair_and_explicit_inport() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                keypair: Some("eggs".to_string()),
                inhost: Some("camelot".to_string()),
                inport: Some(1234),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"setnick spam\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"setkeys eggs\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"getdest\n");
        assert_eq!(sent(drive(&mut creator, "OK shrubbery")), b"inhost camelot\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"inport 1234\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"start\n");

        match drive(&mut creator, "OK HTTP 418") {
            Step::Done(info) => {
                assert_eq!(info.destination.as_deref(), Some("shrubbery"));
                assert_eq!(info.keypair.as_deref(), Some("eggs"));
            }
            step => panic!("expected terminal step, got {step:?}"),
        }
    }

    #[test]
    fn server_tunnel_configures_out_side() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                keypair: Some("eggs".to_string()),
                outhost: Some("camelot".to_string()),
                outport: Some(1234),
                ..Default::default()
            },
            TunnelSide::Server,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"setnick spam\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"setkeys eggs\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"getdest\n");
        assert_eq!(sent(drive(&mut creator, "OK shrubbery")), b"outhost camelot\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"outport 1234\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"start\n");
    }

    #[test]
    fn server_tunnel_default_outport() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                outhost: Some("camelot".to_string()),
                ..Default::default()
            },
            TunnelSide::Server,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"setnick spam\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"newkeys\n");
        assert_eq!(sent(drive(&mut creator, "OK shrubbery")), b"getkeys\n");
        assert_eq!(sent(drive(&mut creator, "OK rubberyeggs")), b"outhost camelot\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"outport 9001\n");
    }

    #[test]
    fn running_tunnel_adopted_and_stopped() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(
            drive(
                &mut creator,
                "DATA NICKNAME: spam STARTING: false RUNNING: true STOPPING: false \
                 KEYS: true QUIET: false INPORT: 12345 INHOST: localhost \
                 OUTPORT: 23456 OUTHOST: localhost",
            ),
            Step::Wait
        );
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"getnick spam\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"stop\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"inhost localhost\n");
    }

    #[test]
    fn stopped_tunnel_adopted_without_stop() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                inhost: Some("camelot".to_string()),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(
            drive(
                &mut creator,
                "DATA NICKNAME: spam STARTING: false RUNNING: false STOPPING: false \
                 KEYS: true QUIET: false INPORT: 12345 INHOST: localhost \
                 OUTPORT: 23456 OUTHOST: localhost",
            ),
            Step::Wait
        );
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"getnick spam\n");
        assert_eq!(sent(drive(&mut creator, "OK HTTP 418")), b"inhost camelot\n");
    }

    #[test]
    fn descriptor_for_other_nickname_ignored() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");
        assert_eq!(
            drive(
                &mut creator,
                "DATA NICKNAME: eggs STARTING: false RUNNING: true STOPPING: false \
                 KEYS: true QUIET: false INPORT: 12345 INHOST: localhost \
                 OUTPORT: 23456 OUTHOST: localhost",
            ),
            Step::Wait
        );
        assert_eq!(sent(drive(&mut creator, "OK Listing done")), b"setnick spam\n");
    }

    #[test]
    fn router_error_fails_dialogue() {
        let mut creator = TunnelCreator::new(
            TunnelConfig {
                nickname: "spam".to_string(),
                ..Default::default()
            },
            TunnelSide::Client,
        )
        .unwrap();

        assert_eq!(drive(&mut creator, "BOB 00.00.10"), Step::Wait);
        assert_eq!(sent(drive(&mut creator, "OK")), b"list\n");

        match creator.handle_reply(Reply::parse("ERROR no tunnels for you").unwrap()) {
            Err(Error::Router(RouterError::Bob(message))) => {
                assert_eq!(message, "no tunnels for you");
            }
            result => panic!("expected router error, got {result:?}"),
        }
    }

    #[test]
    fn empty_nickname_rejected() {
        match TunnelCreator::new(TunnelConfig::default(), TunnelSide::Client) {
            Err(Error::InvalidArgument(_)) => {}
            result => panic!("expected invalid argument, got {:?}", result.is_ok()),
        }
    }
}
