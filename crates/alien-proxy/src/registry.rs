//! Registry of live Aliens and of clients waiting for a rendezvous
//!
//! # Locking
//!
//! Both maps, the invite key cursor and the session counters live behind a
//! single `std::sync::Mutex`. Every check-then-act sequence (look up an
//! Alien and mint a nonce, find a waiter and verify who may resolve it,
//! replace an entry and release the old connection's waiters) runs inside
//! one critical section. Nothing awaits while the lock is held; socket
//! writes happen after the guard is dropped.
//!
//! # Waiters
//!
//! A waiter is created by [`Registry::open_invite`] and removed only by
//! [`Registry::close_invite`], which the invite path calls on every exit.
//! Resolving a waiter (RSVP, 503, unregistration) takes its sender out but
//! leaves the key reserved, so a key is never handed to a new client while
//! the previous holder is still on its way out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use alien_core::time::current_time_millis;
use alien_core::{AlienUri, ConnectionId, ProxyError};
use alien_protocol::{InviteKey, Nonce, ProtocolVersion, RsvpAuth, RsvpRequest};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::auth;
use crate::connection::{ControlChannel, Endpoint};

/// What a control connection proved about itself when registering
#[derive(Debug, Clone)]
pub struct Registration {
    /// Alien identity
    pub uri: AlienUri,
    /// Control connection to send INVITEs over
    pub channel: Arc<ControlChannel>,
    /// Shared secret
    pub secret: String,
    /// Protocol version spoken on `channel`
    pub version: ProtocolVersion,
    /// Port advertised by a `CCCP/0.1` Alien
    pub port: Option<u16>,
}

/// A registered Alien
struct AlienEntry {
    registration: Registration,
    /// Unix millis of the last registration or renewal
    registered_at: u64,
    /// Outstanding invite nonces
    nonces: HashMap<InviteKey, Nonce>,
    /// Bumped on every insert or renewal; expiry timers carry the value
    /// they were started with
    generation: u64,
    expiry: AbortHandle,
}

/// A client blocked on a rendezvous
struct Waiter {
    /// Alien the invite was addressed to
    alien: AlienUri,
    /// Control connection the INVITE went out on; only it may answer 503
    responder: ConnectionId,
    /// Taken when the waiter is resolved
    sender: Option<oneshot::Sender<Endpoint>>,
}

/// Session counters written to the stats file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Clients currently relaying
    pub active_clients: u64,
    /// Clients that reached the relay since startup
    pub total_clients: u64,
    /// Aliens currently registered
    pub active_servers: usize,
    /// Successful registrations since startup
    pub total_servers: u64,
}

/// Snapshot of a registered Alien for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlienInfo {
    pub uri: AlienUri,
    pub version: ProtocolVersion,
    pub connection: ConnectionId,
    pub registered_at: u64,
    pub port: Option<u16>,
}

/// A freshly opened invite, ready to be sent
#[derive(Debug)]
pub struct OpenInvite {
    /// Key the Alien must quote in its RSVP or 503
    pub key: InviteKey,
    /// Control connection to send the INVITE over
    pub channel: Arc<ControlChannel>,
    /// Version spoken on `channel`
    pub version: ProtocolVersion,
    /// Nonce to include, for authenticated versions
    pub nonce: Option<Nonce>,
    /// Resolves with the Alien's data connection; fails if the invite is
    /// declined or the Alien goes away
    pub receiver: oneshot::Receiver<Endpoint>,
}

/// Result of a `503 <id>` received on a control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyOutcome {
    /// The waiter was released without a data connection
    Released,
    /// No such outstanding invite, most likely already timed out
    Unknown,
    /// The invite was sent over another connection
    Forged,
}

#[derive(Default)]
struct RegistryInner {
    aliens: HashMap<AlienUri, AlienEntry>,
    waiters: HashMap<InviteKey, Waiter>,
    /// Last key handed out
    key_cursor: u32,
    generation: u64,
    active_clients: u64,
    total_clients: u64,
    total_servers: u64,
}

/// Shared registry of Aliens and waiters
pub struct Registry {
    inner: Mutex<RegistryInner>,
    /// Registrations not renewed within this period are dropped
    expiry: Duration,
    /// Largest invite key handed out
    key_limit: u32,
}

impl Registry {
    /// Create an empty registry
    pub fn new(expiry: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            expiry,
            key_limit: InviteKey::MAX,
        }
    }

    #[cfg(test)]
    fn with_key_limit(mut self, key_limit: u32) -> Self {
        self.key_limit = key_limit;
        self
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A panic while holding the lock leaves the maps consistent: every
        // mutation is a single insert or remove.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace the entry for `registration.uri` and restart its
    /// expiry timer.
    ///
    /// When the same connection re-registers, outstanding invite nonces
    /// carry over. When a different connection takes over the identity, the
    /// old connection is closed and the clients waiting on it are released.
    pub fn register(self: &Arc<Self>, registration: Registration) {
        let uri = registration.uri.clone();
        let channel_id = registration.channel.id();

        let replaced = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.total_servers += 1;
            let generation = inner.generation;

            let previous = inner.aliens.remove(&uri);
            let mut nonces = HashMap::new();
            let mut replaced = None;
            if let Some(previous) = previous {
                previous.expiry.abort();
                if previous.registration.channel.id() == channel_id {
                    nonces = previous.nonces;
                } else {
                    release_waiters(&mut inner, previous.registration.channel.id());
                    replaced = Some(previous.registration.channel);
                }
            }

            let expiry = self.spawn_expiry(uri.clone(), generation);
            inner.aliens.insert(
                uri.clone(),
                AlienEntry {
                    registration,
                    registered_at: current_time_millis(),
                    nonces,
                    generation,
                    expiry,
                },
            );
            replaced
        };

        match replaced {
            Some(old) => {
                tracing::warn!(
                    "{} re-registered on {}, dropping control channel {}",
                    uri,
                    channel_id,
                    old.id()
                );
                old.close();
            }
            None => tracing::info!("registered {} on {}", uri, channel_id),
        }
    }

    /// Renew a registration made on `connection` (KEEPALIVE)
    pub fn renew(self: &Arc<Self>, uri: &AlienUri, connection: ConnectionId) -> Result<(), ProxyError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(entry) = inner.aliens.get_mut(uri) else {
            return Err(ProxyError::MalformedRequest("400 Not registered".to_string()));
        };
        if entry.registration.channel.id() != connection {
            return Err(ProxyError::MalformedRequest("400 Not registered".to_string()));
        }

        inner.generation += 1;
        let generation = inner.generation;
        entry.expiry.abort();
        entry.expiry = self.spawn_expiry(uri.clone(), generation);
        entry.generation = generation;
        entry.registered_at = current_time_millis();
        tracing::debug!("renewed {} on {}", uri, connection);
        Ok(())
    }

    fn spawn_expiry(self: &Arc<Self>, uri: AlienUri, generation: u64) -> AbortHandle {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.expiry;
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&uri, generation);
            }
        })
        .abort_handle()
    }

    /// Drop `uri` if it has not been renewed since `generation`
    fn expire(&self, uri: &AlienUri, generation: u64) {
        let removed = {
            let mut inner = self.lock();
            let current = inner
                .aliens
                .get(uri)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                remove_alien(&mut inner, uri)
            } else {
                None
            }
        };
        if let Some(channel) = removed {
            tracing::info!("{} expired", uri);
            channel.close();
        }
    }

    /// Remove `uri`, close its control connection and release its waiters
    pub fn unregister(&self, uri: &AlienUri) -> bool {
        let removed = remove_alien(&mut self.lock(), uri);
        match removed {
            Some(channel) => {
                tracing::info!("unregistering {}", uri);
                channel.close();
                true
            }
            None => {
                tracing::warn!("{} not registered", uri);
                false
            }
        }
    }

    /// Remove `uri` only if it is registered on `connection`
    pub fn unregister_if_connection(&self, uri: &AlienUri, connection: ConnectionId) -> bool {
        let removed = {
            let mut inner = self.lock();
            let owned = inner
                .aliens
                .get(uri)
                .is_some_and(|entry| entry.registration.channel.id() == connection);
            if owned {
                remove_alien(&mut inner, uri)
            } else {
                None
            }
        };
        match removed {
            Some(channel) => {
                tracing::info!("unregistering {} after losing {}", uri, connection);
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Remove every Alien; returns how many were registered
    pub fn unregister_all(&self) -> usize {
        let removed: Vec<(AlienUri, Arc<ControlChannel>)> = {
            let mut inner = self.lock();
            let uris: Vec<AlienUri> = inner.aliens.keys().cloned().collect();
            uris.into_iter()
                .filter_map(|uri| remove_alien(&mut inner, &uri).map(|channel| (uri, channel)))
                .collect()
        };
        for (uri, channel) in &removed {
            channel.close();
            tracing::info!("forcibly expired {}", uri);
        }
        removed.len()
    }

    /// Whether `uri` is registered at all
    pub fn contains(&self, uri: &AlienUri) -> bool {
        self.lock().aliens.contains_key(uri)
    }

    /// Whether `uri` is registered on `connection`
    pub fn is_registered_on(&self, uri: &AlienUri, connection: ConnectionId) -> bool {
        self.lock()
            .aliens
            .get(uri)
            .is_some_and(|entry| entry.registration.channel.id() == connection)
    }

    /// Snapshot of one registered Alien
    pub fn get(&self, uri: &AlienUri) -> Option<AlienInfo> {
        self.lock().aliens.get(uri).map(AlienEntry::info)
    }

    /// Snapshot of every registered Alien, ordered by identity
    pub fn list(&self) -> Vec<AlienInfo> {
        let mut aliens: Vec<AlienInfo> = self.lock().aliens.values().map(AlienEntry::info).collect();
        aliens.sort_by(|a, b| a.uri.cmp(&b.uri));
        aliens
    }

    /// Number of registered Aliens
    pub fn len(&self) -> usize {
        self.lock().aliens.len()
    }

    /// Whether no Alien is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of outstanding invites
    pub fn pending_invites(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of nonces held for `uri`'s outstanding invites
    pub fn pending_nonces(&self, uri: &AlienUri) -> usize {
        self.lock()
            .aliens
            .get(uri)
            .map_or(0, |entry| entry.nonces.len())
    }

    /// Reserve a key for a client waiting on `uri` and mint its nonce
    pub fn open_invite(&self, uri: &AlienUri) -> Result<OpenInvite, ProxyError> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let Some(entry) = inner.aliens.get_mut(uri) else {
            return Err(ProxyError::NotFound(format!(
                "404 Unknown Host {}",
                uri.to_host()
            )));
        };

        let key = allocate_key(&mut inner.key_cursor, &inner.waiters, self.key_limit)
            .ok_or_else(|| ProxyError::Internal("clients table ran out of key space".to_string()))?;

        let version = entry.registration.version;
        let nonce = version.requires_auth().then(auth::generate_nonce);
        if let Some(nonce) = nonce {
            entry.nonces.insert(key, nonce);
        }

        let (sender, receiver) = oneshot::channel();
        let channel = Arc::clone(&entry.registration.channel);
        inner.waiters.insert(
            key,
            Waiter {
                alien: uri.clone(),
                responder: channel.id(),
                sender: Some(sender),
            },
        );

        Ok(OpenInvite {
            key,
            channel,
            version,
            nonce,
            receiver,
        })
    }

    /// Forget invite `key` and its nonce. Idempotent.
    pub fn close_invite(&self, key: InviteKey, uri: &AlienUri) {
        let mut inner = self.lock();
        inner.waiters.remove(&key);
        if let Some(entry) = inner.aliens.get_mut(uri) {
            entry.nonces.remove(&key);
        }
    }

    /// Handle `503 <key>` received on control connection `from`
    pub fn signal_busy(&self, key: InviteKey, from: ConnectionId) -> BusyOutcome {
        let mut inner = self.lock();
        let Some(waiter) = inner.waiters.get_mut(&key) else {
            return BusyOutcome::Unknown;
        };
        if waiter.sender.is_none() {
            return BusyOutcome::Unknown;
        }
        if waiter.responder != from {
            return BusyOutcome::Forged;
        }
        // Dropping the sender wakes the client with "declined"
        waiter.sender.take();
        BusyOutcome::Released
    }

    /// Check an RSVP against the invite it answers and claim the waiter.
    ///
    /// On success the returned sender delivers the Alien's data connection
    /// to the waiting client. On failure the waiter is left untouched.
    pub fn authorize_rsvp(
        &self,
        uri: &AlienUri,
        rsvp: &RsvpRequest,
    ) -> Result<oneshot::Sender<Endpoint>, ProxyError> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        let Some(entry) = inner.aliens.get(uri) else {
            return Err(ProxyError::MalformedRequest(format!(
                "400 URI not found: {}",
                uri
            )));
        };

        let waiter = match inner.waiters.get_mut(&rsvp.key) {
            Some(waiter) if waiter.sender.is_some() => waiter,
            _ => {
                return Err(ProxyError::NotFound(format!(
                    "404 {} not found in clients table, perhaps the INVITE timed out",
                    rsvp.key
                )))
            }
        };

        if waiter.alien != *uri || waiter.responder != entry.registration.channel.id() {
            return Err(ProxyError::Unauthorized(format!(
                "{} answered invite {} addressed to {}",
                uri, rsvp.key, waiter.alien
            )));
        }

        let registration = &entry.registration;
        match (&rsvp.auth, registration.version.requires_auth()) {
            (RsvpAuth::Digest(digest), true) => {
                let Some(nonce) = entry.nonces.get(&rsvp.key) else {
                    return Err(ProxyError::Unauthorized(format!(
                        "no nonce for invite {}",
                        rsvp.key
                    )));
                };
                if !auth::verify(digest, &registration.secret, *nonce) {
                    return Err(ProxyError::Unauthorized(format!(
                        "bad digest for invite {}",
                        rsvp.key
                    )));
                }
            }
            (RsvpAuth::None, false) => {}
            _ => {
                return Err(ProxyError::Unauthorized(format!(
                    "{} RSVP for an Alien registered with {}",
                    rsvp.version, registration.version
                )))
            }
        }

        waiter
            .sender
            .take()
            .ok_or_else(|| ProxyError::Internal("waiter already resolved".to_string()))
    }

    /// A client reached the relay
    pub fn client_started(&self) {
        let mut inner = self.lock();
        inner.active_clients += 1;
        inner.total_clients += 1;
    }

    /// A relayed client went away
    pub fn client_finished(&self) {
        let mut inner = self.lock();
        inner.active_clients = inner.active_clients.saturating_sub(1);
    }

    /// Current counters
    pub fn stats(&self) -> Stats {
        let inner = self.lock();
        Stats {
            active_clients: inner.active_clients,
            total_clients: inner.total_clients,
            active_servers: inner.aliens.len(),
            total_servers: inner.total_servers,
        }
    }
}

impl AlienEntry {
    fn info(&self) -> AlienInfo {
        AlienInfo {
            uri: self.registration.uri.clone(),
            version: self.registration.version,
            connection: self.registration.channel.id(),
            registered_at: self.registered_at,
            port: self.registration.port,
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for entry in inner.aliens.values() {
            entry.expiry.abort();
        }
    }
}

/// Remove an entry, stop its timer and release the clients waiting on its
/// connection. Returns the connection for the caller to close.
fn remove_alien(inner: &mut RegistryInner, uri: &AlienUri) -> Option<Arc<ControlChannel>> {
    let entry = inner.aliens.remove(uri)?;
    entry.expiry.abort();
    let channel = entry.registration.channel;
    release_waiters(inner, channel.id());
    Some(channel)
}

fn release_waiters(inner: &mut RegistryInner, connection: ConnectionId) {
    for waiter in inner.waiters.values_mut() {
        if waiter.responder == connection {
            waiter.sender.take();
        }
    }
}

/// Next key in `1..=limit` not held by a live waiter, scanning from the
/// cursor. Fails only when every key is taken.
fn allocate_key(
    cursor: &mut u32,
    waiters: &HashMap<InviteKey, Waiter>,
    limit: u32,
) -> Option<InviteKey> {
    if waiters.len() >= limit as usize {
        return None;
    }
    loop {
        *cursor = if *cursor >= limit { 1 } else { *cursor + 1 };
        let key = InviteKey::new(*cursor);
        if !waiters.contains_key(&key) {
            return Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio_util::sync::CancellationToken;

    fn channel() -> Arc<ControlChannel> {
        Arc::new(ControlChannel::new(
            ConnectionId::next(),
            "127.0.0.1:9".parse().unwrap(),
            Box::new(tokio::io::sink()),
            CancellationToken::new(),
        ))
    }

    fn registration(uri: &str, channel: &Arc<ControlChannel>, version: ProtocolVersion) -> Registration {
        Registration {
            uri: AlienUri::parse(uri).unwrap(),
            channel: Arc::clone(channel),
            secret: "secret".to_string(),
            version,
            port: None,
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(Duration::from_secs(660)))
    }

    fn rsvp(uri: &str, key: InviteKey, auth: RsvpAuth, version: ProtocolVersion) -> RsvpRequest {
        RsvpRequest {
            uri: uri.to_string(),
            key,
            auth,
            version,
        }
    }

    #[tokio::test]
    async fn test_register_and_replace() {
        let registry = registry();
        let uri = AlienUri::parse("dev1@user.alien.opera.com").unwrap();
        let first = channel();
        let second = channel();

        registry.register(registration(uri.as_str(), &first, ProtocolVersion::V03));
        assert!(registry.is_registered_on(&uri, first.id()));

        registry.register(registration(uri.as_str(), &second, ProtocolVersion::V03));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered_on(&uri, second.id()));
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.stats().total_servers, 2);
    }

    #[tokio::test]
    async fn test_renew_requires_same_connection() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V03));

        assert!(registry.renew(&uri, owner.id()).is_ok());
        let generation = registry.lock().generation;

        assert!(matches!(
            registry.renew(&uri, channel().id()),
            Err(ProxyError::MalformedRequest(_))
        ));
        assert!(registry.renew(&AlienUri::parse("x@y").unwrap(), owner.id()).is_err());

        // Refused renewals leave the counter alone
        assert_eq!(registry.lock().generation, generation);
        assert_eq!(registry.lock().aliens[&uri].generation, generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_removes_stale_entry() {
        let registry = Arc::new(Registry::new(Duration::from_secs(10)));
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V03));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!registry.contains(&uri));
        assert!(owner.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_outlives_old_timer() {
        let registry = Arc::new(Registry::new(Duration::from_secs(10)));
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V03));

        tokio::time::sleep(Duration::from_secs(6)).await;
        registry.renew(&uri, owner.id()).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.contains(&uri));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!registry.contains(&uri));
    }

    #[tokio::test]
    async fn test_open_invite_unknown_alien() {
        let registry = registry();
        let err = registry
            .open_invite(&AlienUri::parse("a@b.c.d.e").unwrap())
            .unwrap_err();
        assert_eq!(err.status().as_deref(), Some("404 Unknown Host a.b.c.d.e"));
    }

    #[tokio::test]
    async fn test_invite_keys_distinct_while_outstanding() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        registry.register(registration("a@b", &channel(), ProtocolVersion::V03));

        let invites: Vec<OpenInvite> = (0..500).map(|_| registry.open_invite(&uri).unwrap()).collect();
        let keys: HashSet<InviteKey> = invites.iter().map(|i| i.key).collect();
        assert_eq!(keys.len(), 500);
        assert_eq!(registry.pending_nonces(&uri), 500);

        for invite in &invites {
            registry.close_invite(invite.key, &uri);
        }
        assert_eq!(registry.pending_invites(), 0);
        assert_eq!(registry.pending_nonces(&uri), 0);
    }

    #[tokio::test]
    async fn test_key_space_exhaustion_and_reuse() {
        let registry = Arc::new(Registry::new(Duration::from_secs(660)).with_key_limit(3));
        let uri = AlienUri::parse("a@b").unwrap();
        registry.register(registration("a@b", &channel(), ProtocolVersion::V01));

        let a = registry.open_invite(&uri).unwrap();
        let b = registry.open_invite(&uri).unwrap();
        let c = registry.open_invite(&uri).unwrap();
        assert!(a.nonce.is_none());
        assert!(matches!(
            registry.open_invite(&uri),
            Err(ProxyError::Internal(_))
        ));

        registry.close_invite(b.key, &uri);
        let d = registry.open_invite(&uri).unwrap();
        assert_eq!(d.key, b.key);
        assert_ne!(d.key, a.key);
        assert_ne!(d.key, c.key);
    }

    #[tokio::test]
    async fn test_busy_only_from_inviting_connection() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V03));

        let mut invite = registry.open_invite(&uri).unwrap();
        assert_eq!(registry.signal_busy(invite.key, channel().id()), BusyOutcome::Forged);
        assert!(invite.receiver.try_recv().is_err());
        assert_eq!(registry.pending_invites(), 1);

        assert_eq!(registry.signal_busy(invite.key, owner.id()), BusyOutcome::Released);
        assert!(matches!(
            invite.receiver.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert_eq!(registry.signal_busy(invite.key, owner.id()), BusyOutcome::Unknown);
        assert_eq!(registry.signal_busy(InviteKey::new(999), owner.id()), BusyOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_rsvp_requires_matching_digest() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        registry.register(registration("a@b", &channel(), ProtocolVersion::V03));
        let invite = registry.open_invite(&uri).unwrap();
        let nonce = invite.nonce.unwrap();

        let forged = rsvp("a@b", invite.key, RsvpAuth::Digest("00".repeat(32)), ProtocolVersion::V03);
        assert!(matches!(
            registry.authorize_rsvp(&uri, &forged),
            Err(ProxyError::Unauthorized(_))
        ));

        let missing = rsvp("a@b", invite.key, RsvpAuth::None, ProtocolVersion::V01);
        assert!(matches!(
            registry.authorize_rsvp(&uri, &missing),
            Err(ProxyError::Unauthorized(_))
        ));

        let digest = auth::challenge("secret", nonce);
        let genuine = rsvp("a@b", invite.key, RsvpAuth::Digest(digest), ProtocolVersion::V03);
        assert!(registry.authorize_rsvp(&uri, &genuine).is_ok());

        // Claimed once only
        assert!(matches!(
            registry.authorize_rsvp(&uri, &genuine),
            Err(ProxyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rsvp_for_another_aliens_invite() {
        let registry = registry();
        let a = AlienUri::parse("a@b").unwrap();
        let x = AlienUri::parse("x@y").unwrap();
        registry.register(registration("a@b", &channel(), ProtocolVersion::V01));
        registry.register(registration("x@y", &channel(), ProtocolVersion::V01));

        let invite = registry.open_invite(&a).unwrap();
        let stolen = rsvp("x@y", invite.key, RsvpAuth::None, ProtocolVersion::V01);
        assert!(matches!(
            registry.authorize_rsvp(&x, &stolen),
            Err(ProxyError::Unauthorized(_))
        ));

        let unknown = AlienUri::parse("q@r").unwrap();
        assert!(matches!(
            registry.authorize_rsvp(&unknown, &stolen),
            Err(ProxyError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister_releases_waiters() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V02));
        let mut invite = registry.open_invite(&uri).unwrap();

        assert!(registry.unregister(&uri));
        assert!(owner.is_closed());
        assert!(matches!(
            invite.receiver.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(!registry.unregister(&uri));

        registry.close_invite(invite.key, &uri);
        assert_eq!(registry.pending_invites(), 0);
    }

    #[tokio::test]
    async fn test_unregister_if_connection() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V03));

        assert!(!registry.unregister_if_connection(&uri, channel().id()));
        assert!(registry.contains(&uri));
        assert!(registry.unregister_if_connection(&uri, owner.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_same_connection_reregistration_keeps_nonces() {
        let registry = registry();
        let uri = AlienUri::parse("a@b").unwrap();
        let owner = channel();
        registry.register(registration("a@b", &owner, ProtocolVersion::V02));
        let _invite = registry.open_invite(&uri).unwrap();

        registry.register(registration("a@b", &owner, ProtocolVersion::V02));
        assert_eq!(registry.pending_nonces(&uri), 1);
        assert!(!owner.is_closed());
    }

    #[tokio::test]
    async fn test_unregister_all_and_stats() {
        let registry = registry();
        registry.register(registration("a@b", &channel(), ProtocolVersion::V03));
        registry.register(registration("c@d", &channel(), ProtocolVersion::V01));
        registry.client_started();
        registry.client_started();
        registry.client_finished();

        assert_eq!(
            registry.stats(),
            Stats {
                active_clients: 1,
                total_clients: 2,
                active_servers: 2,
                total_servers: 2,
            }
        );
        assert_eq!(
            registry.list().iter().map(|a| a.uri.as_str()).collect::<Vec<_>>(),
            vec!["a@b", "c@d"]
        );

        assert_eq!(registry.unregister_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.stats().total_servers, 2);
    }
}
