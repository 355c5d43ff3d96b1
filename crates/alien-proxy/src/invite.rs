//! Invite/rendezvous protocol
//!
//! A client request for a registered Alien blocks in [`invite`] until one
//! of three things happens:
//!
//! 1. The Alien dials back with `RSVP`, [`authorize_rsvp`] checks it, and
//!    the new data connection is handed to the client
//! 2. The Alien answers `503 <id>` on the control connection the INVITE
//!    went out on
//! 3. The invite timeout elapses
//!
//! Whatever the outcome, the waiter and its nonce are gone from the
//! registry by the time [`invite`] returns.

use std::sync::Arc;
use std::time::Duration;

use alien_core::{AlienUri, ProxyError};
use alien_protocol::{InviteKey, OutboundMessage, RsvpRequest};
use tokio::sync::oneshot;

use crate::connection::Endpoint;
use crate::registry::Registry;

/// Removes the invite from the registry on every exit path of [`invite`],
/// cancellation included
struct InviteGuard<'a> {
    registry: &'a Registry,
    key: InviteKey,
    uri: &'a AlienUri,
}

impl Drop for InviteGuard<'_> {
    fn drop(&mut self) {
        self.registry.close_invite(self.key, self.uri);
    }
}

/// Ask `uri` for a data connection and wait up to `timeout` for it
pub async fn invite(
    registry: &Arc<Registry>,
    uri: &AlienUri,
    timeout: Duration,
) -> Result<Endpoint, ProxyError> {
    let open = registry.open_invite(uri)?;
    let key = open.key;
    let _guard = InviteGuard {
        registry,
        key,
        uri,
    };

    tracing::debug!("INVITE {} to {} on {}", key, uri, open.channel.id());
    let message = OutboundMessage::Invite {
        key,
        nonce: open.nonce,
        version: open.version,
    };
    let channel = open.channel;
    let receiver = open.receiver;

    // Sending counts against the same deadline as waiting for the RSVP
    let exchange = async move {
        channel.send(message).await.map_err(|e| {
            ProxyError::Busy(format!("could not send INVITE {} to {}: {}", key, uri, e))
        })?;
        receiver
            .await
            .map_err(|_| ProxyError::Busy(format!("{} declined INVITE {}", uri, key)))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(endpoint)) => {
            tracing::debug!("INVITE {} accepted by {} from {}", key, uri, endpoint.peer);
            Ok(endpoint)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            tracing::info!("INVITE {} timed out after {:?}", key, timeout);
            Err(ProxyError::Busy(format!("INVITE {} to {} timed out", key, uri)))
        }
    }
}

/// An RSVP that passed verification, holding the waiter it resolves
#[derive(Debug)]
pub struct Rendezvous {
    key: InviteKey,
    sender: oneshot::Sender<Endpoint>,
}

impl Rendezvous {
    /// Invite being answered
    pub fn key(&self) -> InviteKey {
        self.key
    }

    /// Hand the Alien's data connection to the waiting client. Gives the
    /// connection back if the client stopped waiting in the meantime.
    pub fn complete(self, endpoint: Endpoint) -> Result<(), Endpoint> {
        self.sender.send(endpoint)
    }
}

/// Verify an RSVP from `uri`.
///
/// A failed check leaves the invite pending; the client keeps waiting until
/// a genuine answer arrives or its timeout elapses.
pub fn authorize_rsvp(
    registry: &Registry,
    uri: &AlienUri,
    rsvp: &RsvpRequest,
) -> Result<Rendezvous, ProxyError> {
    let sender = registry.authorize_rsvp(uri, rsvp)?;
    Ok(Rendezvous {
        key: rsvp.key,
        sender,
    })
}
