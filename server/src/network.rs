//! Server network layer: TCP sessions, the UDP input socket and heartbeats
//!
//! Every TCP connection gets a reader task parsing one JSON message per line
//! and a writer task draining the session's outbound queue. A single task
//! reads the UDP socket and runs each datagram through `udp::admit`, and a
//! heartbeat task evicts silent sessions. Store calls run on the blocking
//! pool so no session ever stalls a map loop.

use crate::config::ServerConfig;
use crate::entity::Player;
use crate::error::{Result, ServerError};
use crate::game::PlayerHandle;
use crate::jobs::StorageJob;
use crate::map_manager::MapManager;
use crate::persistence::{PlayerRecord, StoreResult, Stores};
use crate::session_manager::SessionManager;
use crate::udp::{self, Admitted, UdpChannel};
use crate::utils::{generate_token, now_millis};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use raiders_shared::{clamp_direction, distance, ClientMessage, ServerMessage, PICKUP_RADIUS};
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Duration};

/// Addresses the server actually bound, useful when port 0 was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub tcp: SocketAddr,
    pub udp: SocketAddr,
}

/// Outcome of checking a join's credentials against the player store
enum Login {
    Rejected,
    Returning(PlayerRecord),
    Created(PlayerRecord),
}

fn authenticate(stores: &Stores, username: &str, password: &str) -> StoreResult<Login> {
    if stores.players.account_exists(username)? {
        if !stores.players.validate_credentials(username, password)? {
            return Ok(Login::Rejected);
        }
        return match stores.players.load(username)? {
            Some(record) => Ok(Login::Returning(record)),
            None => Ok(Login::Rejected),
        };
    }
    stores.players.create(username, password).map(Login::Created)
}

pub struct NetworkManager {
    config: Arc<ServerConfig>,
    sessions: Arc<SessionManager>,
    maps: Arc<MapManager>,
    stores: Stores,
    /// Accounts with a player in the world, from join until the disconnect save lands
    online: Mutex<HashSet<i64>>,
    shutdown_tx: watch::Sender<bool>,
}

impl NetworkManager {
    pub fn new(
        config: Arc<ServerConfig>,
        sessions: Arc<SessionManager>,
        maps: Arc<MapManager>,
        stores: Stores,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            sessions,
            maps,
            stores,
            online: Mutex::new(HashSet::new()),
            shutdown_tx,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Binds both sockets and spawns the acceptor, UDP reader and heartbeat
    /// checker
    pub async fn start(self: &Arc<Self>) -> Result<BoundAddrs> {
        let tcp_addr = self.config.tcp_addr();
        let listener = TcpListener::bind(&tcp_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: tcp_addr.clone(),
                source,
            })?;

        let udp_addr = self.config.udp_addr();
        let socket = UdpSocket::bind(&udp_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: udp_addr.clone(),
                source,
            })?;

        let bound = BoundAddrs {
            tcp: listener.local_addr()?,
            udp: socket.local_addr()?,
        };
        info!("TCP listening on {}, UDP on {}", bound.tcp, bound.udp);

        tokio::spawn(Arc::clone(self).accept_loop(listener));
        tokio::spawn(Arc::clone(self).udp_loop(Arc::new(socket)));
        tokio::spawn(Arc::clone(self).heartbeat_loop());

        Ok(bound)
    }

    /// Stops accepting and closes every open connection
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(Arc::clone(&self).handle_connection(stream, addr));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("Acceptor stopped");
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Arc<str>>();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let Some(peer_id) = self.sessions.add_session(addr, outbound_tx, Some(close_tx)) else {
            warn!("Server full, rejecting connection from {}", addr);
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }
        let (reader, mut writer) = stream.into_split();

        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
        });

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut lines = BufReader::new(reader).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(peer_id, &line).await,
                    Ok(None) => break,
                    Err(e) => {
                        if !self.is_shutting_down() {
                            error!("Read error on session {}: {}", peer_id, e);
                        }
                        break;
                    }
                },
                // Session was evicted elsewhere
                _ = &mut close_rx => break,
                _ = shutdown.changed() => break,
            }
        }

        self.disconnect(peer_id).await;
    }

    async fn handle_line(&self, peer_id: u32, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.sessions.touch(peer_id);

        match serde_json::from_str::<ClientMessage>(line) {
            Ok(message) => self.handle_message(peer_id, message).await,
            Err(e) => debug!("Malformed message from session {}: {}", peer_id, e),
        }
    }

    /// Dispatches one parsed client message
    pub async fn handle_message(&self, peer_id: u32, message: ClientMessage) {
        match message {
            ClientMessage::PlayerJoin { username, password } => {
                self.handle_join(peer_id, username, password.unwrap_or_default())
                    .await;
            }
            ClientMessage::PlayerInput { dir_x, dir_y } => {
                let Some(player) = self.sessions.player(peer_id) else {
                    return;
                };
                match clamp_direction(dir_x, dir_y) {
                    Some((dx, dy)) => player.lock().set_direction(dx, dy),
                    None => debug!("Non-finite input from session {}", peer_id),
                }
            }
            ClientMessage::PlayerAction { action } => {
                debug!("Player {} performed action: {}", peer_id, action);
            }
            ClientMessage::PickupItem { world_item_id } => {
                self.handle_pickup(peer_id, world_item_id).await;
            }
            ClientMessage::GetInventory => self.send_inventory(peer_id).await,
            ClientMessage::MoveInventoryItem {
                inventory_id,
                slot_x,
                slot_y,
            } => {
                let Some((_, account)) = self.account_of(peer_id) else {
                    return;
                };
                let moved = self
                    .run_store(move |s| s.inventory.move_item(account, inventory_id, slot_x, slot_y))
                    .await;
                match moved {
                    Ok(()) => self.send_inventory(peer_id).await,
                    Err(e) => debug!("Move of item {} failed: {}", inventory_id, e),
                }
            }
            ClientMessage::DropInventoryItem { inventory_id } => {
                self.handle_drop(peer_id, inventory_id).await;
            }
            ClientMessage::EquipItem {
                inventory_id,
                slot_type,
            } => {
                let Some((player, account)) = self.account_of(peer_id) else {
                    return;
                };
                let equipped = self
                    .run_store(move |s| s.inventory.equip(account, inventory_id, &slot_type))
                    .await;
                match equipped {
                    Ok(()) => {
                        self.refresh_stats(&player, account).await;
                        self.send_inventory(peer_id).await;
                    }
                    Err(e) => debug!("Equip of item {} failed: {}", inventory_id, e),
                }
            }
            ClientMessage::UnequipItem { slot_type, .. } => {
                let Some((player, account)) = self.account_of(peer_id) else {
                    return;
                };
                let unequipped = self
                    .run_store(move |s| s.inventory.unequip(account, &slot_type))
                    .await;
                match unequipped {
                    Ok(()) => {
                        self.refresh_stats(&player, account).await;
                        self.send_inventory(peer_id).await;
                    }
                    Err(e) => debug!("Unequip for session {} failed: {}", peer_id, e),
                }
            }
            ClientMessage::Heartbeat => {}
            ClientMessage::Ping { client_time_ms } => {
                self.reply_pong(peer_id, client_time_ms);
            }
        }
    }

    async fn handle_join(&self, peer_id: u32, username: String, password: String) {
        if self.sessions.player(peer_id).is_some() {
            debug!("Session {} already joined, ignoring join", peer_id);
            return;
        }

        let name = username.clone();
        let login = self
            .run_store(move |s| authenticate(s, &name, &password))
            .await;
        let (record, returning) = match login {
            Ok(Login::Returning(record)) => (record, true),
            Ok(Login::Created(record)) => {
                info!("Created account {} for {}", record.account_id, username);
                (record, false)
            }
            Ok(Login::Rejected) => {
                warn!("Invalid credentials for user {}", username);
                self.send(
                    peer_id,
                    &ServerMessage::AuthError {
                        message: "Invalid username or password".to_string(),
                    },
                );
                return;
            }
            Err(e) => {
                error!("Join for {} failed: {}", username, e);
                return;
            }
        };

        let account = record.account_id;
        if !self.online.lock().insert(account) {
            warn!("{} is already logged in", username);
            self.send(
                peer_id,
                &ServerMessage::AuthError {
                    message: "Account is already logged in".to_string(),
                },
            );
            return;
        }
        if !self.place_player(peer_id, record, returning).await {
            self.online.lock().remove(&account);
        }
    }

    /// Puts an authenticated account into the world and binds it to the
    /// session. False if the player could not be placed.
    async fn place_player(&self, peer_id: u32, record: PlayerRecord, returning: bool) -> bool {
        let username = record.username.clone();
        let saved_map = record
            .map_id
            .clone()
            .filter(|id| returning && self.maps.world(id).is_some());
        let on_saved_map = saved_map.is_some();
        let map_id = saved_map.unwrap_or_else(|| self.config.default_map.clone());
        let Some(world) = self.maps.world(&map_id) else {
            error!("Default map {} is not loaded", map_id);
            return false;
        };

        let account = record.account_id;
        let stats = match self.run_store(move |s| s.inventory.combat_stats(account)).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Could not load combat stats for {}: {}", username, e);
                Default::default()
            }
        };

        let (cx, cy) = world.tilemap().safe_zone_centroid();
        let mut player = Player::new(peer_id, &record.username, &map_id, cx, cy);
        player.account_id = Some(account);
        player.level = record.level.max(1);
        player.xp = record.xp;
        player.stats = stats;
        if returning {
            player.restore_vitals(record.health, record.max_health);
            if !player.is_alive() {
                player.heal_full();
            } else if on_saved_map && world.tilemap().is_walkable(record.x, record.y) {
                player.x = record.x;
                player.y = record.y;
            }
        }
        let (level, xp) = (player.level, player.xp);

        let handle = match self.maps.add_player(player) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not place {} on {}: {}", username, map_id, e);
                return false;
            }
        };
        if !self.sessions.attach_player(peer_id, Arc::clone(&handle)) {
            // Connection closed while authenticating
            self.maps.remove_player(&handle);
            return false;
        }

        let token = generate_token();
        self.sessions.bind_udp(
            peer_id,
            UdpChannel::new(
                token.clone(),
                self.config.udp_bucket_capacity,
                self.config.udp_refill_per_sec,
            ),
        );

        info!(
            "Player joined: {} (session {}, account {}) level {} on {}",
            username, peer_id, account, level, map_id
        );
        self.send(
            peer_id,
            &ServerMessage::PlayerJoined {
                peer_id,
                username,
                db_id: account,
                level,
                xp,
                udp_token: token,
                map_id,
            },
        );
        self.send_inventory(peer_id).await;
        true
    }

    async fn handle_pickup(&self, peer_id: u32, world_item_id: u64) {
        let Some((player, account)) = self.account_of(peer_id) else {
            return;
        };
        let (map_id, px, py) = {
            let p = player.lock();
            (p.map_id.clone(), p.x, p.y)
        };
        let Some(state) = self.maps.state(&map_id) else {
            return;
        };

        let Some(item) = state.world_item(world_item_id) else {
            debug!("Pickup of unknown item {} by {}", world_item_id, peer_id);
            return;
        };
        let dist = distance(px, py, item.x, item.y);
        if dist > PICKUP_RADIUS {
            debug!(
                "Pickup rejected: player {} too far ({:.0}) from item {}",
                peer_id, dist, world_item_id
            );
            return;
        }

        let Some(claimed) = state.claim_world_item(world_item_id, account) else {
            debug!("Item {} already claimed", world_item_id);
            return;
        };

        match self
            .run_store(move |s| s.inventory.pickup(account, &claimed))
            .await
        {
            Ok(()) => {
                state.remove_world_item(world_item_id);
                self.send_inventory(peer_id).await;
            }
            Err(e) => {
                state.unclaim_world_item(world_item_id);
                debug!("Pickup of {} by {} failed: {}", world_item_id, peer_id, e);
            }
        }
    }

    async fn handle_drop(&self, peer_id: u32, inventory_id: u64) {
        let Some((player, account)) = self.account_of(peer_id) else {
            return;
        };
        let (map_id, x, y) = {
            let p = player.lock();
            (p.map_id.clone(), p.x, p.y)
        };
        let Some(state) = self.maps.state(&map_id) else {
            return;
        };

        let now = now_millis();
        match self
            .run_store(move |s| s.inventory.drop_item(account, inventory_id, x, y, now))
            .await
        {
            Ok(item) => {
                state.add_world_item(item);
                self.refresh_stats(&player, account).await;
                self.send_inventory(peer_id).await;
            }
            Err(e) => debug!("Drop of item {} failed: {}", inventory_id, e),
        }
    }

    /// Pushes the session's carried and equipped items
    async fn send_inventory(&self, peer_id: u32) {
        let Some((_, account)) = self.account_of(peer_id) else {
            return;
        };
        let listing = self
            .run_store(move |s| {
                Ok((s.inventory.inventory(account)?, s.inventory.equipped(account)?))
            })
            .await;
        match listing {
            Ok((items, equipped)) => self.send(peer_id, &ServerMessage::Inventory { items, equipped }),
            Err(e) => warn!("Inventory for account {} unavailable: {}", account, e),
        }
    }

    async fn refresh_stats(&self, player: &PlayerHandle, account: i64) {
        match self.run_store(move |s| s.inventory.combat_stats(account)).await {
            Ok(stats) => player.lock().stats = stats,
            Err(e) => warn!("Could not refresh combat stats for account {}: {}", account, e),
        }
    }

    fn reply_pong(&self, peer_id: u32, client_time_ms: Option<Value>) {
        self.send(
            peer_id,
            &ServerMessage::Pong {
                client_time_ms,
                server_time_ms: now_millis(),
            },
        );
    }

    /// The joined player of a session and its account id
    fn account_of(&self, peer_id: u32) -> Option<(PlayerHandle, i64)> {
        let player = self.sessions.player(peer_id)?;
        let account = player.lock().account_id?;
        Some((player, account))
    }

    fn send(&self, peer_id: u32, message: &ServerMessage) {
        match message.to_line() {
            Ok(line) => {
                self.sessions.send(peer_id, Arc::from(line));
            }
            Err(e) => error!("Failed to encode message for session {}: {}", peer_id, e),
        }
    }

    /// Runs a store call on the blocking pool
    async fn run_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Stores) -> StoreResult<T> + Send + 'static,
    {
        let stores = self.stores.clone();
        let outcome = tokio::task::spawn_blocking(move || f(&stores))
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?;
        Ok(outcome?)
    }

    async fn udp_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buffer) => match received {
                    Ok((len, from)) => self.handle_datagram(&buffer[..len], from),
                    Err(e) => {
                        if !self.is_shutting_down() {
                            error!("Error receiving datagram: {}", e);
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("UDP reader stopped");
    }

    /// Applies an admitted datagram; everything else is dropped silently
    pub fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let message = match udp::parse(datagram) {
            Ok(message) => message,
            Err(reject) => {
                debug!("Dropped datagram from {}: {}", from, reject);
                return;
            }
        };

        match udp::admit(&self.sessions, &message, from) {
            Ok(Admitted::Registered { peer_id, addr }) => {
                self.sessions.touch(peer_id);
                debug!("UDP registered for session {} at {}", peer_id, addr);
            }
            Ok(Admitted::Input {
                peer_id,
                dir_x,
                dir_y,
            }) => {
                if let Some(player) = self.sessions.player(peer_id) {
                    player.lock().set_direction(dir_x, dir_y);
                }
                self.sessions.touch(peer_id);
            }
            Err(reject) => debug!(
                "Dropped {} from {} for session {}: {}",
                message.kind(),
                from,
                message.peer_id(),
                reject
            ),
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = interval(self.config.heartbeat_check_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for peer_id in self.sessions.timed_out(self.config.heartbeat_timeout) {
                        info!("Session {} timed out", peer_id);
                        self.disconnect(peer_id).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Heartbeat checker stopped");
    }

    /// Drops a session, takes its player off the map and saves it
    pub async fn disconnect(&self, peer_id: u32) {
        let Some(session) = self.sessions.remove_session(peer_id) else {
            return;
        };
        let Some(player) = session.player.clone() else {
            return;
        };
        drop(session);

        self.maps.remove_player(&player);
        let record = PlayerRecord::from_player(&player.lock());
        let Some(record) = record else {
            return;
        };
        let (account, username) = (record.account_id, record.username.clone());

        // Through the storage queue, so periodic saves queued earlier land first
        let jobs = self.maps.jobs();
        let (done_tx, done_rx) = oneshot::channel();
        if jobs.send(StorageJob::SavePlayer(record)) && jobs.send(StorageJob::Flush(done_tx)) {
            match tokio::time::timeout(Duration::from_secs(5), done_rx).await {
                Ok(Ok(())) => debug!("Saved {} on disconnect", username),
                _ => warn!("Disconnect save of {} did not complete", username),
            }
        } else {
            warn!("Storage worker stopped, {} was not saved", username);
        }
        self.online.lock().remove(&account);
    }
}
