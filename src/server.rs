use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, OwnedMutexGuard, RwLock};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::config::Limits;
use crate::error::GatewayError;
use crate::messages::{ClientMessage, ServerMessage};
use crate::persistence::{RoomRecord, RoomStore};
use crate::rate_limit::RateLimiter;
use crate::registry::RoomRegistry;
use crate::room::{
    ConnectionId, ContentWrite, CreateOutcome, JoinOutcome, LeaveOutcome, NewFile, PostOutcome,
    Room,
};

type Connections = RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>;

/// Who in a room receives a broadcast.
#[derive(Clone, Copy)]
enum Scope<'a> {
    All,
    Others(&'a str),
}

struct Limiters {
    code: RateLimiter,
    chat: RateLimiter,
    file: RateLimiter,
}

impl Limiters {
    fn new(limits: &Limits) -> Self {
        Limiters {
            code: RateLimiter::new(limits.code),
            chat: RateLimiter::new(limits.chat),
            file: RateLimiter::new(limits.file),
        }
    }

    fn forget(&self, connection_id: &str) {
        self.code.forget(connection_id);
        self.chat.forget(connection_id);
        self.file.forget(connection_id);
    }
}

/// Routes client events to rooms and fans the results back out.
pub struct Server {
    registry: Arc<RoomRegistry>,
    connections: Connections,
    memberships: RwLock<HashMap<ConnectionId, String>>,
    limiters: Limiters,
    store: Arc<dyn RoomStore>,
}

impl Server {
    pub fn new(registry: Arc<RoomRegistry>, limits: &Limits, store: Arc<dyn RoomStore>) -> Self {
        Server {
            registry,
            connections: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
            limiters: Limiters::new(limits),
            store,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Allocates a connection id and the channel its events are delivered on.
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let connection_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), tx);
        (connection_id, rx)
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let (connection_id, mut rx) = self.register().await;
        info!("User connected: {}", connection_id);
        let (mut ws_tx, mut ws_rx) = ws.split();

        let writer_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode event for {}: {}", writer_id, e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::text(text)).await {
                    debug!("Failed to send WebSocket message to {}: {}", writer_id, e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) => {
                    if let Ok(text) = msg.to_str() {
                        self.handle_text(&connection_id, text).await;
                    }
                }
                Err(e) => {
                    debug!("WebSocket error on {}: {}", connection_id, e);
                    break;
                }
            }
        }

        self.disconnect(&connection_id).await;
    }

    pub async fn handle_text(&self, connection_id: &str, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(connection_id, message).await,
            Err(e) => self.reject(connection_id, e.into()).await,
        }
    }

    pub async fn handle_message(&self, connection_id: &str, message: ClientMessage) {
        if let Err(e) = self.dispatch(connection_id, message).await {
            self.reject(connection_id, e).await;
        }
    }

    pub async fn disconnect(&self, connection_id: &str) {
        self.leave_current(connection_id).await;
        self.connections.write().await.remove(connection_id);
        self.limiters.forget(connection_id);
        info!("User disconnected: {}", connection_id);
    }

    async fn dispatch(&self, id: &str, message: ClientMessage) -> Result<(), GatewayError> {
        match message {
            ClientMessage::JoinRoom { room_id, username } => {
                self.join(id, room_id, username).await
            }
            ClientMessage::LeaveRoom { room_id } => {
                self.leave(id, &room_id).await;
                Ok(())
            }
            ClientMessage::SendCodeChange {
                room_id,
                code,
                file_id,
            } => self.code_change(id, &room_id, code, file_id).await,
            ClientMessage::CreateFile { room_id, file } => {
                self.create_file(id, &room_id, file).await
            }
            ClientMessage::DeleteFile { room_id, file_id } => {
                self.delete_file(id, &room_id, file_id).await
            }
            ClientMessage::RenameFile {
                room_id,
                file_id,
                new_name,
            } => self.rename_file(id, &room_id, file_id, new_name).await,
            ClientMessage::SendSelection {
                room_id,
                selection,
                cursor,
                file_id,
            } => {
                let room = self.lock_joined(id, &room_id).await?;
                let username = room.username_of(id).map(str::to_string).unwrap_or_default();
                let event = ServerMessage::SelectionChange {
                    id: id.to_string(),
                    username,
                    selection,
                    cursor,
                    file_id,
                };
                self.broadcast(&room, Scope::Others(id), event).await;
                Ok(())
            }
            ClientMessage::SendChatMessage { room_id, message } => {
                self.chat(id, &room_id, message).await
            }
            ClientMessage::SaveRoom { room_id } => self.save_room(id, &room_id).await,
            ClientMessage::LoadRoom { room_id } => self.load_room(id, &room_id).await,
        }
    }

    async fn join(&self, id: &str, room_id: String, username: String) -> Result<(), GatewayError> {
        if room_id.is_empty() || username.is_empty() {
            return Err(GatewayError::MissingJoinFields);
        }

        let current = self.current_room(id).await;
        if current.is_some_and(|current| current != room_id) {
            self.leave_current(id).await;
        }

        let mut room = self.registry.lock_live(&room_id).await;

        let users = match room.add_user(id, &username) {
            JoinOutcome::Joined { users } => users,
            JoinOutcome::AlreadyMember => {
                debug!("{} already in room {}, skipping join", username, room_id);
                return Ok(());
            }
        };
        self.memberships
            .write()
            .await
            .insert(id.to_string(), room_id.clone());

        self.send_to(id, ServerMessage::RoomJoined(room.snapshot())).await;
        let event = ServerMessage::UserJoined {
            username: username.clone(),
            id: id.to_string(),
            users,
        };
        self.broadcast(&room, Scope::Others(id), event).await;
        info!(
            "{} joined room {} ({} users total)",
            username,
            room_id,
            room.user_count()
        );
        Ok(())
    }

    async fn leave(&self, id: &str, room_id: &str) {
        if self.current_room(id).await.as_deref() == Some(room_id) {
            self.leave_current(id).await;
        } else {
            debug!("{} asked to leave room {} it is not in", id, room_id);
        }
    }

    /// Removes the connection from whatever room it is in, tells the rest of
    /// that room, and drops the room once it is empty.
    async fn leave_current(&self, id: &str) {
        let Some(room_id) = self.memberships.write().await.remove(id) else {
            return;
        };
        let Some(room) = self.registry.get(&room_id).await else {
            return;
        };

        {
            let mut room = room.lock().await;
            if let LeaveOutcome::Left { user, remaining } = room.remove_user(id) {
                info!(
                    "{} left room {} ({} users remaining)",
                    user.username,
                    room_id,
                    remaining.len()
                );
                let event = ServerMessage::UserLeft {
                    username: user.username,
                    id: user.id,
                    users: remaining,
                };
                self.broadcast(&room, Scope::All, event).await;
            }
        }

        self.registry.remove_if_empty(&room_id).await;
    }

    async fn code_change(
        &self,
        id: &str,
        room_id: &str,
        code: String,
        file_id: Option<String>,
    ) -> Result<(), GatewayError> {
        if !self.limiters.code.is_allowed(id) {
            return Err(GatewayError::RateLimited(
                "Too many code changes, please slow down",
            ));
        }
        let mut room = self.lock_joined(id, room_id).await?;

        // An empty file id addresses the legacy buffer. Edits to files the
        // room does not hold (such as a client-local default tab) still reach
        // the other members; only the stored content is left alone.
        let file_id = file_id.filter(|f| !f.is_empty());
        if room.set_content(file_id.as_deref(), code.clone()) == ContentWrite::UnknownFile {
            debug!("Relaying edit to unstored file {:?} in room {}", file_id, room_id);
        }
        let event = ServerMessage::CodeChange { code, file_id };
        self.broadcast(&room, Scope::Others(id), event).await;
        Ok(())
    }

    async fn create_file(
        &self,
        id: &str,
        room_id: &str,
        file: NewFile,
    ) -> Result<(), GatewayError> {
        self.check_file_limit(id)?;
        let mut room = self.lock_joined(id, room_id).await?;

        let file_id = file.id.clone();
        match room.create_file(id, file) {
            CreateOutcome::Created(file) => {
                info!(
                    "File created: {} by {} in room {}",
                    file.name, file.created_by, room_id
                );
                self.broadcast(&room, Scope::All, ServerMessage::FileCreated { file })
                    .await;
            }
            CreateOutcome::DuplicateId => {
                debug!("File {} already exists in room {}", file_id, room_id);
            }
        }
        Ok(())
    }

    async fn delete_file(
        &self,
        id: &str,
        room_id: &str,
        file_id: String,
    ) -> Result<(), GatewayError> {
        self.check_file_limit(id)?;
        let mut room = self.lock_joined(id, room_id).await?;

        if room.delete_file(&file_id).is_some() {
            info!("File deleted: {} in room {}", file_id, room_id);
            self.broadcast(&room, Scope::All, ServerMessage::FileDeleted { file_id })
                .await;
        }
        Ok(())
    }

    async fn rename_file(
        &self,
        id: &str,
        room_id: &str,
        file_id: String,
        new_name: String,
    ) -> Result<(), GatewayError> {
        self.check_file_limit(id)?;
        let mut room = self.lock_joined(id, room_id).await?;

        if room.rename_file(&file_id, &new_name) {
            info!("File renamed: {} to {} in room {}", file_id, new_name, room_id);
            let event = ServerMessage::FileRenamed { file_id, new_name };
            self.broadcast(&room, Scope::All, event).await;
        }
        Ok(())
    }

    async fn chat(&self, id: &str, room_id: &str, message: String) -> Result<(), GatewayError> {
        if message.trim().is_empty() {
            return Err(GatewayError::EmptyMessage);
        }
        if !self.limiters.chat.is_allowed(id) {
            return Err(GatewayError::RateLimited(
                "Too many messages, please slow down",
            ));
        }
        let mut room = self.lock_joined(id, room_id).await?;

        match room.append_message(id, &message) {
            PostOutcome::Posted(message) => {
                self.broadcast(&room, Scope::All, ServerMessage::Chat(message))
                    .await;
                Ok(())
            }
            PostOutcome::NotMember => Err(GatewayError::NotMember(room_id.to_string())),
        }
    }

    async fn save_room(&self, id: &str, room_id: &str) -> Result<(), GatewayError> {
        self.check_file_limit(id)?;
        let snapshot = self.lock_joined(id, room_id).await?.snapshot();

        let record = RoomRecord::new(room_id, snapshot);
        self.store.save(&record).await.map_err(GatewayError::Save)?;
        info!("Room {} saved by {}", room_id, id);

        let event = ServerMessage::RoomSaved {
            room_id: room_id.to_string(),
            saved_at: record.saved_at,
        };
        self.send_to(id, event).await;
        Ok(())
    }

    async fn load_room(&self, id: &str, room_id: &str) -> Result<(), GatewayError> {
        self.check_file_limit(id)?;
        drop(self.lock_joined(id, room_id).await?);

        let record = self
            .store
            .load(room_id)
            .await
            .map_err(GatewayError::Load)?
            .ok_or_else(|| GatewayError::NothingSaved(room_id.to_string()))?;

        let mut room = self.lock_joined(id, room_id).await?;
        room.restore(record.state);
        info!("Room {} restored from save of {} by {}", room_id, record.saved_at, id);

        let event = ServerMessage::RoomRestored(room.snapshot());
        self.broadcast(&room, Scope::All, event).await;
        Ok(())
    }

    fn check_file_limit(&self, id: &str) -> Result<(), GatewayError> {
        if self.limiters.file.is_allowed(id) {
            Ok(())
        } else {
            Err(GatewayError::RateLimited(
                "Too many file operations, please slow down",
            ))
        }
    }

    async fn current_room(&self, id: &str) -> Option<String> {
        self.memberships.read().await.get(id).cloned()
    }

    /// Locks `room_id` on behalf of a connection that must currently be a
    /// member of it.
    async fn lock_joined(
        &self,
        id: &str,
        room_id: &str,
    ) -> Result<OwnedMutexGuard<Room>, GatewayError> {
        let not_member = || GatewayError::NotMember(room_id.to_string());

        if self.current_room(id).await.as_deref() != Some(room_id) {
            return Err(not_member());
        }
        let room = self.registry.get(room_id).await.ok_or_else(not_member)?;
        let room = room.lock_owned().await;
        if room.contains(id) {
            Ok(room)
        } else {
            Err(not_member())
        }
    }

    async fn reject(&self, id: &str, err: GatewayError) {
        warn!("Rejected event from {}: {}", id, err);
        self.send_to(id, ServerMessage::error(err.to_string())).await;
    }

    async fn send_to(&self, id: &str, message: ServerMessage) {
        let connections = self.connections.read().await;
        if let Some(sender) = connections.get(id) {
            let _ = sender.send(message);
        }
    }

    /// Called with the room lock held so every member sees one room's events
    /// in the order they were applied.
    async fn broadcast(&self, room: &Room, scope: Scope<'_>, message: ServerMessage) {
        let connections = self.connections.read().await;
        for member in room.member_ids() {
            if let Scope::Others(sender) = scope {
                if member == sender {
                    continue;
                }
            }
            if let Some(tx) = connections.get(member) {
                if tx.send(message.clone()).is_err() {
                    debug!("Dropping event for closed connection {}", member);
                }
            }
        }
    }
}
