//! CCCP control connection state machine
//!
//! A control connection starts with `REGISTER`. Authenticated versions are
//! challenged first:
//!
//! ```text
//! Alien                              Proxy
//!   | REGISTER uri secret CCCP/0.3     |
//!   |--------------------------------->|
//!   |          CHALLENGE nonce CCCP/0.3|
//!   |<---------------------------------|
//!   | RESPONSE digest CCCP/0.3         |
//!   |--------------------------------->|   registry entry created
//!   |                   CCCP/0.3 200 OK|
//!   |<---------------------------------|
//!   |        INVITE id nonce CCCP/0.3  |   (for each waiting client)
//!   |<---------------------------------|
//!   | KEEPALIVE uri CCCP/0.3           |
//!   |--------------------------------->|   expiry timer restarted
//! ```
//!
//! `CCCP/0.1` Aliens skip the challenge and are answered `201` right away;
//! `CCCP/0.1` and `CCCP/0.2` renew by sending `REGISTER` again.

use std::sync::Arc;

use alien_core::{AlienUri, ProxyError};
use alien_protocol::{
    ControlMessage, Nonce, OutboundMessage, ProtocolError, ProtocolVersion, RegisterRequest,
};

use crate::auth;
use crate::connection::{ControlChannel, LineReader};
use crate::http::log_status;
use crate::registry::{BusyOutcome, Registration};
use crate::state::ProxyState;

/// Where a control connection stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No REGISTER handled yet
    AwaitingRequest,
    /// CHALLENGE sent, waiting for RESPONSE
    Challenged { nonce: Nonce },
    /// Registered (or registered before and re-authenticating)
    Authenticated,
}

/// Whether to keep reading after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// What the Alien claimed in its first REGISTER; renewals must match it
#[derive(Debug, Clone)]
struct Identity {
    uri: AlienUri,
    secret: String,
    version: ProtocolVersion,
    port: Option<u16>,
}

/// Drives one control connection until it closes
pub struct ControlSession {
    state: Arc<ProxyState>,
    channel: Arc<ControlChannel>,
    lines: LineReader,
    identity: Option<Identity>,
    phase: Phase,
}

impl ControlSession {
    /// Take over a classified control connection
    pub fn new(state: Arc<ProxyState>, channel: Arc<ControlChannel>, mut lines: LineReader) -> Self {
        lines.stop_recording();
        Self {
            state,
            channel,
            lines,
            identity: None,
            phase: Phase::AwaitingRequest,
        }
    }

    /// Handle the opening REGISTER, then serve the connection until the
    /// Alien hangs up, misbehaves, or is unregistered.
    pub async fn run(mut self, uri: AlienUri, request: RegisterRequest) {
        let id = self.channel.id();
        tracing::debug!("{} control connection from {}", id, self.channel.peer());

        let mut flow = match self.handle_register(uri, request, true).await {
            Ok(flow) => flow,
            Err(e) => self.handle_error(e).await,
        };

        // The opening REGISTER counts as a message for blank-line framing
        let mut got_message = true;
        let cancel = self.channel.cancel_token().clone();

        while flow == Flow::Continue {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("{} closed by registry", id);
                    break;
                }
                next = self.lines.next_line() => next,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("{} closed by peer", id);
                    break;
                }
                Err(ProtocolError::Io(e)) => {
                    tracing::debug!("{} read failed: {}", id, e);
                    break;
                }
                Err(e) => {
                    // The decoder cannot resynchronize after a framing error
                    self.handle_error(e.into()).await;
                    break;
                }
            };

            if line.is_empty() {
                if !got_message && self.reply("400 Empty request line").await.is_err() {
                    break;
                }
                got_message = false;
                continue;
            }
            got_message = true;
            tracing::trace!("{} -> {}", id, line);

            let result = match ControlMessage::parse(&line, self.version()) {
                Ok(message) => self.handle(message).await,
                Err(e) => Err(e.into()),
            };
            flow = match result {
                Ok(flow) => flow,
                Err(e) => self.handle_error(e).await,
            };
        }

        if let Some(identity) = &self.identity {
            self.state.registry.unregister_if_connection(&identity.uri, id);
        }
        self.channel.shutdown().await;
    }

    async fn handle(&mut self, message: ControlMessage) -> Result<Flow, ProxyError> {
        let id = self.channel.id();
        match message {
            ControlMessage::Keepalive => {
                let identity = self.registered_identity()?;
                self.state.registry.renew(&identity.uri, id)?;
                self.reply("200 Connection renewed").await?;
                Ok(Flow::Continue)
            }
            ControlMessage::Register(request) => {
                let uri = AlienUri::parse(&request.uri)?;
                self.handle_register(uri, request, false).await
            }
            ControlMessage::Response { digest } => self.handle_response(&digest).await,
            ControlMessage::ResponseOk => {
                tracing::trace!("{} acknowledged", id);
                Ok(Flow::Continue)
            }
            ControlMessage::ResponseBusy { key } => {
                match self.state.registry.signal_busy(key, id) {
                    BusyOutcome::Released => tracing::debug!("{} declined invite {}", id, key),
                    BusyOutcome::Unknown => tracing::debug!(
                        "got 503 for nonexistent client {}, perhaps the INVITE expired",
                        key
                    ),
                    BusyOutcome::Forged => {
                        return Err(ProxyError::ProtocolViolation(format!(
                            "bogus 503 attempt thwarted! ({} for invite {})",
                            id, key
                        )))
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// First REGISTER (`first_time`) or a renewal on a pre-0.3 connection
    async fn handle_register(
        &mut self,
        uri: AlienUri,
        request: RegisterRequest,
        first_time: bool,
    ) -> Result<Flow, ProxyError> {
        if let Some(identity) = &self.identity {
            if identity.uri != uri {
                return Err(malformed(format!(
                    "400 URI mismatch: expected {}, got {}",
                    identity.uri, uri
                )));
            }
            if identity.secret != request.secret {
                return Err(malformed("400 Auth string differs from the one last sent"));
            }
            if identity.version != request.version {
                return Err(malformed(format!(
                    "400 Protocol version mismatch: expected {}, got {}",
                    identity.version, request.version
                )));
            }
        }

        let already_registered = first_time && self.state.registry.contains(&uri);
        let version = request.version;
        self.identity = Some(Identity {
            uri,
            secret: request.secret,
            version,
            port: request.port,
        });
        if already_registered {
            self.reply("403 Already Registered").await?;
        }

        if version.requires_auth() {
            let nonce = auth::generate_nonce();
            self.phase = Phase::Challenged { nonce };
            self.channel
                .send(OutboundMessage::Challenge { nonce, version })
                .await?;
        } else {
            let registration = self.registration()?;
            self.state.registry.register(registration);
            self.phase = Phase::Authenticated;
            self.reply("201 Holepunching Failed").await?;
        }
        Ok(Flow::Continue)
    }

    async fn handle_response(&mut self, digest: &str) -> Result<Flow, ProxyError> {
        let Phase::Challenged { nonce } = self.phase else {
            return Err(malformed("400 Unexpected RESPONSE"));
        };
        let registration = self.registration()?;

        if auth::verify(digest, &registration.secret, nonce) {
            self.state.registry.register(registration);
            self.phase = Phase::Authenticated;
            self.reply("200 OK").await?;
            return Ok(Flow::Continue);
        }

        self.reply("401 Unauthorized").await?;
        if self
            .state
            .registry
            .is_registered_on(&registration.uri, self.channel.id())
        {
            // Still registered from before; let the expiry timer decide
            self.phase = Phase::Authenticated;
            Ok(Flow::Continue)
        } else {
            Ok(Flow::Close)
        }
    }

    /// Report an error to the Alien and decide whether to go on
    async fn handle_error(&self, error: ProxyError) -> Flow {
        let id = self.channel.id();
        match &error {
            ProxyError::ProtocolViolation(reason) => {
                tracing::info!("{}: {}", id, reason);
                return Flow::Continue;
            }
            ProxyError::Io(e) => {
                tracing::debug!("{}: {}", id, e);
                return Flow::Close;
            }
            _ => {}
        }

        let keep_open = matches!(error, ProxyError::Internal(_));
        let Some(status) = error.status() else {
            return Flow::Close;
        };
        if let ProxyError::Unauthorized(reason) = &error {
            tracing::info!("{}: {}", id, reason);
        }
        if self.reply(&status).await.is_err() || !keep_open {
            return Flow::Close;
        }
        Flow::Continue
    }

    async fn reply(&self, status: &str) -> Result<(), ProtocolError> {
        let version = self.version();
        log_status(version.as_str(), status);
        self.channel
            .send(OutboundMessage::status(version, status))
            .await
    }

    fn version(&self) -> ProtocolVersion {
        self.identity
            .as_ref()
            .map_or(ProtocolVersion::DEFAULT, |identity| identity.version)
    }

    fn registered_identity(&self) -> Result<&Identity, ProxyError> {
        match (&self.identity, self.phase) {
            (Some(identity), Phase::Authenticated) => Ok(identity),
            _ => Err(malformed("400 Not registered")),
        }
    }

    fn registration(&self) -> Result<Registration, ProxyError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| ProxyError::Internal("no REGISTER seen".to_string()))?;
        Ok(Registration {
            uri: identity.uri.clone(),
            channel: Arc::clone(&self.channel),
            secret: identity.secret.clone(),
            version: identity.version,
            port: identity.port,
        })
    }
}

fn malformed(status: impl Into<String>) -> ProxyError {
    ProxyError::MalformedRequest(status.into())
}
