//! Per-connection handler
//!
//! Classifies an accepted connection and hands it to whoever serves it:
//! the admin endpoints, the invite/relay path, the control loop, or the
//! rendezvous that resolves a waiting client.

use std::net::SocketAddr;
use std::sync::Arc;

use alien_core::{AlienUri, ConnectionId, ProxyError};
use alien_protocol::{LineCodec, OutboundMessage, ProtocolVersion, RegisterRequest, RsvpRequest};
use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedWrite;

use super::classifier::{self, HttpRequest, HttpTarget, Rejection, Request, Role};
use crate::admin;
use crate::connection::{BoxedReader, BoxedWriter, ControlChannel, Endpoint, LineReader};
use crate::control::ControlSession;
use crate::http::{log_status, HttpResponse};
use crate::invite;
use crate::relay;
use crate::state::ProxyState;

/// Serves one accepted connection
pub struct ConnectionHandler {
    state: Arc<ProxyState>,
    id: ConnectionId,
    peer: SocketAddr,
}

impl ConnectionHandler {
    /// Create a handler for a connection from `peer`
    pub fn new(state: Arc<ProxyState>, peer: SocketAddr) -> Self {
        Self {
            state,
            id: ConnectionId::next(),
            peer,
        }
    }

    /// Identifier used in logs and by the registry
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Serve the connection until it is done with
    pub async fn run(self, reader: BoxedReader, writer: BoxedWriter) {
        tracing::debug!("{} accepted from {}", self.id, self.peer);
        let mut lines = LineReader::new(reader, self.state.config.max_line_length);

        let request = match classifier::classify(&mut lines, &self.state.config).await {
            Ok(request) => request,
            Err(rejection) => {
                self.reject(rejection, writer).await;
                return;
            }
        };

        match request {
            Request::Http(http) => self.serve_http(http, lines, writer).await,
            Request::Register { uri, request } => self.serve_control(uri, request, lines, writer).await,
            Request::Rsvp { uri, request } => self.serve_rsvp(uri, request, lines, writer).await,
            Request::Drop => {
                tracing::info!("dropping connections");
                self.state.registry.unregister_all();
            }
            Request::Shutdown => {
                tracing::info!("shutting down");
                self.state.registry.unregister_all();
                self.state.shutdown.cancel();
            }
        }
    }

    async fn serve_http(&self, http: HttpRequest, lines: LineReader, mut writer: BoxedWriter) {
        tracing::debug!(
            "{} {} {} HTTP/{}.{} for {}",
            self.id,
            http.method,
            http.uri,
            http.version.0,
            http.version.1,
            http.host
        );

        match http.target {
            HttpTarget::Admin(action) => {
                if let Err(e) = admin::serve(action, &self.state, &mut writer).await {
                    tracing::debug!("{} admin response failed: {}", self.id, e);
                }
                let _ = writer.shutdown().await;
            }
            HttpTarget::Alien(uri) => self.proxy(uri, lines, writer).await,
        }
    }

    /// Invite the Alien, then relay the client's request and the response
    async fn proxy(&self, uri: AlienUri, lines: LineReader, mut writer: BoxedWriter) {
        let registry = self.state.registry();
        let alien = match invite::invite(registry, &uri, self.state.config.invite_timeout).await {
            Ok(alien) => alien,
            Err(e) => {
                if e.is_benign() {
                    tracing::debug!("{} {}", self.id, e);
                } else {
                    tracing::info!("{} {}", self.id, e);
                }
                if let Some(status) = e.status() {
                    if let Err(e) = HttpResponse::error(status).write_to(&mut writer).await {
                        tracing::debug!("{} error response failed: {}", self.id, e);
                    }
                }
                let _ = writer.shutdown().await;
                return;
            }
        };

        // The request lines already read go to the Alien first
        let (reader, replay) = lines.into_replay();
        let client = Endpoint::new(self.peer, reader, writer).with_pending(replay);

        registry.client_started();
        let outcome = relay::relay(client, alien, self.state.config.relay_buffer_size).await;
        registry.client_finished();
        tracing::debug!(
            "{} relay for {} ended ({} after {} bytes)",
            self.id,
            uri,
            outcome.finished,
            outcome.bytes
        );
    }

    async fn serve_control(
        &self,
        uri: AlienUri,
        request: RegisterRequest,
        lines: LineReader,
        writer: BoxedWriter,
    ) {
        let channel = Arc::new(ControlChannel::new(
            self.id,
            self.peer,
            writer,
            self.state.shutdown.child_token(),
        ));
        ControlSession::new(Arc::clone(&self.state), channel, lines)
            .run(uri, request)
            .await;
    }

    /// Verify an RSVP and hand the connection to the client it answers
    async fn serve_rsvp(
        &self,
        uri: AlienUri,
        request: RsvpRequest,
        mut lines: LineReader,
        mut writer: BoxedWriter,
    ) {
        let version = request.version;
        lines.stop_recording();

        let terminator =
            tokio::time::timeout(self.state.config.invite_timeout, lines.next_line()).await;
        if !matches!(&terminator, Ok(Ok(Some(line))) if line.is_empty()) {
            self.reply_cccp(
                &mut writer,
                version,
                "400 RSVP request not terminated by an empty line",
            )
            .await;
            return;
        }

        let rendezvous = match invite::authorize_rsvp(&self.state.registry, &uri, &request) {
            Ok(rendezvous) => rendezvous,
            Err(e) => {
                self.log_error(&e);
                if let Some(status) = e.status() {
                    self.reply_cccp(&mut writer, version, &status).await;
                }
                return;
            }
        };
        let key = rendezvous.key();
        tracing::debug!("{} RSVP {} from {}", self.id, key, uri);

        let (reader, pending) = lines.into_remainder();
        let endpoint = Endpoint::new(self.peer, reader, writer).with_pending(pending);
        if let Err(mut endpoint) = rendezvous.complete(endpoint) {
            let status = format!(
                "404 {} not found in clients table, perhaps the INVITE timed out",
                key
            );
            self.reply_cccp(&mut endpoint.writer, version, &status).await;
        }
    }

    /// Report a classification failure in the role the peer took on
    async fn reject(&self, rejection: Rejection, mut writer: BoxedWriter) {
        let Rejection { role, error } = rejection;
        self.log_error(&error);

        match (role, error.status()) {
            (Role::Unknown, _) | (_, None) => {}
            (Role::Http, Some(status)) => {
                if let Err(e) = HttpResponse::error(status).write_to(&mut writer).await {
                    tracing::debug!("{} error response failed: {}", self.id, e);
                }
            }
            (Role::Cccp(version), Some(status)) => {
                self.reply_cccp(&mut writer, version, &status).await;
                return;
            }
        }
        let _ = writer.shutdown().await;
    }

    /// Write one CCCP status line and close the connection
    async fn reply_cccp(&self, writer: &mut BoxedWriter, version: ProtocolVersion, status: &str) {
        log_status(version.as_str(), status);
        let mut framed = FramedWrite::new(writer, LineCodec::default());
        if let Err(e) = framed.send(OutboundMessage::status(version, status)).await {
            tracing::debug!("{} reply failed: {}", self.id, e);
        }
        let _ = framed.into_inner().shutdown().await;
    }

    fn log_error(&self, error: &ProxyError) {
        match error {
            ProxyError::NoRequest(_) => tracing::debug!("{} from {}: {}", self.id, self.peer, error),
            e if e.is_benign() => tracing::debug!("{}: {}", self.id, e),
            ProxyError::Internal(_) => tracing::error!("{}: {}", self.id, error),
            _ => tracing::info!("{}: {}", self.id, error),
        }
    }
}
