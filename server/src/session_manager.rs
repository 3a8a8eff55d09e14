//! Session registry for connected TCP clients
//!
//! This module tracks every open session on the server side:
//! - Session lifecycle (connect, join, heartbeat, disconnect)
//! - The outbound line queue each connection's writer task drains
//! - The player bound to a session once it has joined
//! - Per-session UDP credentials (token, replay counter, rate limiter)
//!
//! Sessions are shared between the TCP handlers, the UDP reader, the
//! heartbeat checker and the state broadcaster, so the registry sits behind a
//! single lock and every accessor copies out what it needs before returning.

use crate::game::PlayerHandle;
use crate::udp::UdpChannel;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

pub type Outbound = mpsc::UnboundedSender<Arc<str>>;

/// A connected client and everything the server knows about it
#[derive(Debug)]
pub struct Session {
    /// Transient id assigned by the server, valid while the TCP connection is open
    pub peer_id: u32,
    /// Remote address of the TCP connection
    pub addr: SocketAddr,
    /// Last time any valid message arrived from this client
    pub last_seen: Instant,
    outbound: Outbound,
    /// Set once the client has joined
    pub player: Option<PlayerHandle>,
    /// Set once a UDP token has been issued
    pub udp: Option<UdpChannel>,
    /// Dropping this closes the connection's reader
    _close: Option<oneshot::Sender<()>>,
}

impl Session {
    pub fn new(
        peer_id: u32,
        addr: SocketAddr,
        outbound: Outbound,
        close: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            peer_id,
            addr,
            last_seen: Instant::now(),
            outbound,
            player: None,
            udp: None,
            _close: close,
        }
    }

    /// Checks if the client has been silent for longer than the timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Queues a line for the connection's writer; false once the writer is gone
    pub fn send(&self, line: Arc<str>) -> bool {
        self.outbound.send(line).is_ok()
    }
}

/// Manages all open sessions
///
/// Peer ids start from 1 and are never reused during the server's lifetime.
pub struct SessionManager {
    sessions: RwLock<HashMap<u32, Session>>,
    next_peer_id: AtomicU32,
    max_sessions: usize,
}

impl SessionManager {
    /// Creates an empty registry that accepts at most `max_sessions` connections
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_peer_id: AtomicU32::new(1),
            max_sessions,
        }
    }

    /// Registers a new connection
    ///
    /// Returns the assigned peer id, or None if the server is full.
    pub fn add_session(
        &self,
        addr: SocketAddr,
        outbound: Outbound,
        close: Option<oneshot::Sender<()>>,
    ) -> Option<u32> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return None;
        }

        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(peer_id, Session::new(peer_id, addr, outbound, close));
        info!("Session {} connected from {}", peer_id, addr);
        Some(peer_id)
    }

    /// Removes a session, returning it so the caller can clean up its player.
    /// Dropping the returned session closes the connection.
    pub fn remove_session(&self, peer_id: u32) -> Option<Session> {
        let removed = self.sessions.write().remove(&peer_id);
        if removed.is_some() {
            info!("Session {} disconnected", peer_id);
        }
        removed
    }

    /// Refreshes the heartbeat timestamp; false for unknown sessions
    pub fn touch(&self, peer_id: u32) -> bool {
        match self.sessions.write().get_mut(&peer_id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, peer_id: u32) -> bool {
        self.sessions.read().contains_key(&peer_id)
    }

    /// Binds a joined player to its session
    pub fn attach_player(&self, peer_id: u32, player: PlayerHandle) -> bool {
        match self.sessions.write().get_mut(&peer_id) {
            Some(session) => {
                session.player = Some(player);
                true
            }
            None => false,
        }
    }

    pub fn player(&self, peer_id: u32) -> Option<PlayerHandle> {
        self.sessions
            .read()
            .get(&peer_id)
            .and_then(|s| s.player.clone())
    }

    /// Installs freshly issued UDP credentials, replacing any earlier UDP state
    pub fn bind_udp(&self, peer_id: u32, channel: UdpChannel) -> bool {
        match self.sessions.write().get_mut(&peer_id) {
            Some(session) => {
                debug!("Issued UDP token for session {}", peer_id);
                session.udp = Some(channel);
                true
            }
            None => false,
        }
    }

    /// Runs `f` against the session's UDP state under the registry lock.
    /// `f` must not block.
    pub fn with_udp<R>(&self, peer_id: u32, f: impl FnOnce(&mut UdpChannel) -> R) -> Option<R> {
        self.sessions
            .write()
            .get_mut(&peer_id)
            .and_then(|s| s.udp.as_mut())
            .map(f)
    }

    /// Queues a line for one session
    pub fn send(&self, peer_id: u32, line: Arc<str>) -> bool {
        self.sessions
            .read()
            .get(&peer_id)
            .map(|s| s.send(line))
            .unwrap_or(false)
    }

    /// Queues a line for every joined session whose player is on `map_id`.
    /// Returns how many sessions it was queued for.
    pub fn broadcast_to_map(&self, map_id: &str, line: Arc<str>) -> usize {
        let targets: Vec<(Outbound, PlayerHandle)> = self
            .sessions
            .read()
            .values()
            .filter_map(|s| s.player.clone().map(|p| (s.outbound.clone(), p)))
            .collect();

        let mut sent = 0;
        for (outbound, player) in targets {
            let on_map = player.lock().map_id == map_id;
            if on_map && outbound.send(Arc::clone(&line)).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Ids of sessions silent for longer than `timeout`
    pub fn timed_out(&self, timeout: Duration) -> Vec<u32> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_timed_out(timeout))
            .map(|s| s.peer_id)
            .collect()
    }

    /// Returns the number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if nobody is connected
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, peer_id: u32, at: Instant) {
        if let Some(session) = self.sessions.write().get_mut(&peer_id) {
            session.last_seen = at;
        }
    }
}
