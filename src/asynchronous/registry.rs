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
    asynchronous::{
        session::{self, SamSession},
        SamEndpoint,
    },
    error::Error,
    options::{default_nickname, SessionConfig},
};

use tokio::sync::watch;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

/// Logging target for the file.
const LOG_TARGET: &str = "denali::registry";

/// Outcome of a session-creation dialogue, shared between its waiters.
type Outcome = Option<Result<Arc<SamSession>, Error>>;

/// Registry entry for one nickname.
enum RegistryEntry {
    /// Session is live.
    Ready(Arc<SamSession>),

    /// Creation dialogue is in flight.
    ///
    /// Holding the sender weakly keeps the waiters themselves in charge of
    /// the dialogue's lifetime: when the last of them cancels, the sender
    /// is dropped and the dialogue is abandoned.
    Pending(Weak<watch::Sender<Outcome>>),
}

/// Shared state of a [`SessionRegistry`].
pub(crate) struct RegistryInner {
    /// Live and in-flight sessions by nickname.
    sessions: Mutex<HashMap<String, RegistryEntry>>,
}

impl RegistryInner {
    /// Remove the entry for `nickname`, if any.
    pub(crate) fn remove(&self, nickname: &str) {
        self.sessions.lock().expect("lock poisoned").remove(nickname);
    }
}

/// Registry of SAMv3 sessions.
///
/// At most one session exists per nickname: concurrent requests for the
/// same nickname share one creation dialogue and observe the same
/// [`SamSession`]. The registry is cheap to clone; clones share the same
/// session map. Applications typically keep a single registry for the
/// whole process.
#[derive(Clone)]
pub struct SessionRegistry {
    /// Shared state.
    inner: Arc<RegistryInner>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create new [`SessionRegistry`].
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the session named by `config.nickname`, creating it if needed.
    ///
    /// An existing session is returned as-is, however it was configured. A
    /// new session requires `endpoint`; requesting an unknown nickname
    /// without one is an error. `auto_close` makes a newly created session
    /// close itself once its last derived stream is released.
    ///
    /// Cancelling a waiter never cancels a dialogue other waiters still
    /// depend on; the dialogue is abandoned only when every waiter is
    /// gone.
    pub async fn get_session(
        &self,
        endpoint: Option<Arc<dyn SamEndpoint>>,
        auto_close: bool,
        mut config: SessionConfig,
    ) -> crate::Result<Arc<SamSession>> {
        let nickname = match &config.nickname {
            Some(nickname) if nickname.is_empty() =>
                return Err(Error::InvalidArgument("session nickname must not be empty")),
            Some(nickname) => nickname.clone(),
            None => default_nickname(),
        };
        config.nickname = Some(nickname.clone());

        let mut rx = loop {
            let mut sessions = self.inner.sessions.lock().expect("lock poisoned");

            let pending = match sessions.get(&nickname) {
                Some(RegistryEntry::Ready(session)) => return Ok(session.clone()),
                Some(RegistryEntry::Pending(sender)) => Some(sender.upgrade()),
                None => None,
            };

            match pending {
                Some(Some(sender)) => break sender.subscribe(),
                // the dialogue was abandoned between its teardown and the
                // removal of the entry
                Some(None) => {
                    sessions.remove(&nickname);
                }
                None => {
                    let Some(endpoint) = endpoint.clone() else {
                        return Err(Error::InvalidArgument(
                            "a new session cannot be created without a SAM endpoint",
                        ));
                    };

                    let (tx, rx) = watch::channel(None);
                    let tx = Arc::new(tx);
                    sessions
                        .insert(nickname.clone(), RegistryEntry::Pending(Arc::downgrade(&tx)));
                    drop(sessions);

                    tracing::trace!(
                        target: LOG_TARGET,
                        %nickname,
                        "start session creation dialogue",
                    );

                    tokio::spawn(create_task(
                        self.clone(),
                        tx,
                        endpoint,
                        auto_close,
                        config.clone(),
                        nickname.clone(),
                    ));

                    break rx;
                }
            }
        };

        let outcome = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| Error::Cancelled)?;

        outcome.clone().expect("outcome observed by wait_for")
    }
}

/// Run one session-creation dialogue and publish its outcome.
async fn create_task(
    registry: SessionRegistry,
    tx: Arc<watch::Sender<Outcome>>,
    endpoint: Arc<dyn SamEndpoint>,
    auto_close: bool,
    config: SessionConfig,
    nickname: String,
) {
    let outcome = tokio::select! {
        outcome = session::create_session(&endpoint, &config) => outcome,
        // every waiter has cancelled; drop the dialogue, closing its
        // control connection
        _ = tx.closed() => {
            tracing::debug!(
                target: LOG_TARGET,
                %nickname,
                "all waiters cancelled, abandoning session creation",
            );
            registry.inner.remove(&nickname);

            return;
        }
    };

    match outcome {
        Ok(created) => {
            let session = Arc::new(SamSession::new(
                created,
                endpoint,
                auto_close,
                Arc::downgrade(&registry.inner),
            ));

            registry
                .inner
                .sessions
                .lock()
                .expect("lock poisoned")
                .insert(nickname, RegistryEntry::Ready(session.clone()));

            let _ = tx.send(Some(Ok(session)));
        }
        Err(error) => {
            tracing::debug!(
                target: LOG_TARGET,
                %nickname,
                ?error,
                "session creation failed",
            );
            registry.inner.remove(&nickname);

            let _ = tx.send(Some(Err(error)));
        }
    }
}
