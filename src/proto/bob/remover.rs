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
    proto::bob::{
        parser::{Reply, TunnelDescriptor},
        Step,
    },
};

/// Logging target for the file.
const LOG_TARGET: &str = "denali::bob::remover";

/// Message the router emits while a stopped tunnel is still winding down.
/// `clear` is retried for as long as it keeps appearing.
const SHUTTING_DOWN: &str = "tunnel shutting down";

/// Tunnel removal state.
#[derive(Debug, PartialEq, Eq)]
enum RemoverState {
    /// Waiting for the router's version banner.
    AwaitingVersion,

    /// Banner seen, waiting for the `OK` that follows it.
    AwaitingBannerOk,

    /// `list` has been sent; descriptor rows are being collected.
    Listing {
        /// Descriptors received so far.
        tunnels: Vec<TunnelDescriptor>,
    },

    /// `getnick` has been sent.
    GettingNick {
        /// Descriptor of the tunnel being removed.
        descriptor: TunnelDescriptor,
    },

    /// `stop` has been sent.
    Stopping,

    /// `clear` has been sent.
    Clearing,

    /// Dialogue has finished.
    Done,

    /// State has been poisoned.
    Poisoned,
}

/// State machine for removing a BOB tunnel.
///
/// Removal of a nickname the router doesn't know is a no-op.
pub struct TunnelRemover {
    /// Nickname of the tunnel to remove.
    nickname: String,

    /// Removal state.
    state: RemoverState,
}

impl TunnelRemover {
    /// Create new [`TunnelRemover`] for `nickname`.
    pub fn new(nickname: impl Into<String>) -> Result<Self, Error> {
        let nickname = nickname.into();
        if nickname.is_empty() {
            return Err(Error::InvalidArgument("tunnel nickname must not be empty"));
        }

        Ok(Self {
            nickname,
            state: RemoverState::AwaitingVersion,
        })
    }

    /// Handle a reply from the router and decide the next step.
    pub fn handle_reply(&mut self, reply: Reply) -> Result<Step<()>, Error> {
        match std::mem::replace(&mut self.state, RemoverState::Poisoned) {
            RemoverState::AwaitingVersion => match reply {
                Reply::Version(version) => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        %version,
                        "connected to bob bridge",
                    );
                    self.state = RemoverState::AwaitingBannerOk;

                    Ok(Step::Wait)
                }
                reply => self.unexpected(reply),
            },
            RemoverState::AwaitingBannerOk => match reply {
                Reply::Ok(_) => {
                    self.state = RemoverState::Listing {
                        tunnels: Vec::new(),
                    };

                    Ok(Step::Send(String::from("list\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            RemoverState::Listing { mut tunnels } => match reply {
                Reply::Data(descriptor) => {
                    tunnels.push(descriptor);
                    self.state = RemoverState::Listing { tunnels };

                    Ok(Step::Wait)
                }
                Reply::Ok(_) => {
                    match tunnels
                        .into_iter()
                        .find(|descriptor| descriptor.nickname == self.nickname)
                    {
                        Some(descriptor) => {
                            let command = format!("getnick {}\n", self.nickname);
                            self.state = RemoverState::GettingNick { descriptor };

                            Ok(Step::Send(command.into_bytes()))
                        }
                        None => {
                            tracing::trace!(
                                target: LOG_TARGET,
                                nickname = %self.nickname,
                                "no tunnel with nickname, nothing to remove",
                            );
                            self.state = RemoverState::Done;

                            Ok(Step::Done(()))
                        }
                    }
                }
                reply => self.unexpected(reply),
            },
            RemoverState::GettingNick { descriptor } => match reply {
                Reply::Ok(_) if descriptor.running => {
                    self.state = RemoverState::Stopping;

                    Ok(Step::Send(String::from("stop\n").into_bytes()))
                }
                Reply::Ok(_) => {
                    self.state = RemoverState::Clearing;

                    Ok(Step::Send(String::from("clear\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            RemoverState::Stopping => match reply {
                Reply::Ok(_) => {
                    self.state = RemoverState::Clearing;

                    Ok(Step::Send(String::from("clear\n").into_bytes()))
                }
                reply => self.unexpected(reply),
            },
            RemoverState::Clearing => match reply {
                Reply::Ok(_) => {
                    tracing::info!(
                        target: LOG_TARGET,
                        nickname = %self.nickname,
                        "tunnel removed",
                    );
                    self.state = RemoverState::Done;

                    Ok(Step::Done(()))
                }
                // the tunnel is still winding down, ask again
                Reply::Error(message) if message == SHUTTING_DOWN => {
                    self.state = RemoverState::Clearing;

                    Ok(Step::Send(String::from("clear\n").into_bytes()))
                }
                Reply::Error(message) => Err(RouterError::Bob(message).into()),
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

    /// Fail the dialogue on a reply the current phase doesn't expect.
    fn unexpected(&self, reply: Reply) -> Result<Step<()>, Error> {
        if let Reply::Error(message) = reply {
            tracing::warn!(
                target: LOG_TARGET,
                nickname = %self.nickname,
                %message,
                "tunnel removal failed",
            );

            return Err(RouterError::Bob(message).into());
        }

        tracing::warn!(
            target: LOG_TARGET,
            nickname = %self.nickname,
            ?reply,
            "unexpected reply from bob bridge",
        );

        Err(ProtocolError::InvalidMessage.into())
    }
}
