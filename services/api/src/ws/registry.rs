//! The in-memory table of live WebSocket sessions.
//!
//! Every lock here is synchronous and never held across an `.await`, which
//! lets teardown run from `Drop` (see [`SessionGuard`]).

use super::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use worldsense_core::ImageFrame;

pub type SessionId = String;

/// The sending half of a client connection. A writer task drains the other
/// half into the socket; dropping every sender closes the socket.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// The most recent camera frame of a session.
#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub image: ImageFrame,
    pub received_at: DateTime<Utc>,
}

/// Ownership handle of a running monitoring task.
struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

/// Server-side state of one connected client.
pub struct Session {
    id: SessionId,
    connected_at: DateTime<Utc>,
    outbound: Mutex<Option<Outbound>>,
    last_frame: RwLock<Option<StoredFrame>>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl Session {
    fn new(id: SessionId, outbound: Outbound) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            outbound: Mutex::new(Some(outbound)),
            last_frame: RwLock::new(None),
            monitor: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queues a message for the client. Returns `false` once the connection
    /// is closed or its writer has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub fn last_frame(&self) -> Option<StoredFrame> {
        self.last_frame.read().clone()
    }

    /// Replaces the stored frame; the previous one is discarded.
    pub fn store_frame(&self, image: ImageFrame) {
        *self.last_frame.write() = Some(StoredFrame {
            image,
            received_at: Utc::now(),
        });
    }

    /// True while a monitoring task is running for this session.
    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(MonitorHandle::is_active)
    }

    /// Starts a monitoring task unless one is already running.
    ///
    /// `spawn` receives the task's cancellation token and is only called when
    /// no active task exists. The check and the spawn happen under one lock,
    /// so two racing starts cannot both spawn. Returns whether a task was
    /// started.
    pub fn start_monitor(&self, spawn: impl FnOnce(CancellationToken) -> JoinHandle<()>) -> bool {
        let mut slot = self.monitor.lock();
        if slot.as_ref().is_some_and(MonitorHandle::is_active) {
            return false;
        }
        let token = CancellationToken::new();
        let task = spawn(token.clone());
        *slot = Some(MonitorHandle { token, task });
        true
    }

    /// Cancels the monitoring task, if any. Returns whether one was running.
    pub fn stop_monitor(&self) -> bool {
        match self.monitor.lock().take() {
            Some(handle) => {
                let was_active = handle.is_active();
                handle.token.cancel();
                was_active
            }
            None => false,
        }
    }

    /// Sends on behalf of the monitoring task that owns `token`.
    ///
    /// Runs under the monitor lock, which `stop_monitor` also takes to cancel,
    /// so nothing from a stopped task can be queued after its cancellation.
    pub fn send_from_monitor(&self, token: &CancellationToken, message: ServerMessage) -> bool {
        let _slot = self.monitor.lock();
        if token.is_cancelled() {
            return false;
        }
        self.send(message)
    }

    /// Ends the monitoring task that owns `token` from inside that task.
    ///
    /// The token is cancelled before `final_messages` are queued, both under
    /// the monitor lock, so the session reports no active monitor by the
    /// time the client sees the last status and a new start is accepted
    /// right away. Returns `false` if the task had already been stopped.
    pub fn finish_monitor(
        &self,
        token: &CancellationToken,
        final_messages: impl IntoIterator<Item = ServerMessage>,
    ) -> bool {
        let _slot = self.monitor.lock();
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        for message in final_messages {
            self.send(message);
        }
        true
    }

    /// Drops the outbound sender, letting the writer task close the socket.
    fn close(&self) {
        self.outbound.lock().take();
    }
}

/// Thread-safe table of all live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for an accepted connection.
    pub fn connect(&self, outbound: Outbound) -> SessionId {
        let id = format!("client_{}", Uuid::new_v4().simple());
        let session = Arc::new(Session::new(id.clone(), outbound));
        self.sessions.write().insert(id.clone(), session);
        info!(session_id = %id, "Client connected.");
        id
    }

    /// Tears a session down: cancels its monitoring task, removes it from the
    /// table and closes its connection. Unknown ids are ignored.
    pub fn disconnect(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        if session.stop_monitor() {
            debug!(session_id = %id, "Cancelled monitoring task on disconnect.");
        }
        session.close();
        let connected_secs = (Utc::now() - session.connected_at()).num_seconds();
        info!(session_id = %id, connected_secs, "Client disconnected.");
        true
    }

    /// Sends a message to a session. A missing session is not an error: the
    /// client may have disconnected while the message was being produced.
    pub fn send(&self, id: &str, message: ServerMessage) -> bool {
        match self.get(id) {
            Some(session) => session.send(message),
            None => {
                debug!(session_id = %id, kind = message.kind(), "Dropping message for closed session.");
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn latest_frame(&self, id: &str) -> Option<StoredFrame> {
        self.get(id).and_then(|session| session.last_frame())
    }

    /// Replaces a session's stored frame. Returns `false` for unknown ids.
    pub fn store_frame(&self, id: &str, image: ImageFrame) -> bool {
        match self.get(id) {
            Some(session) => {
                session.store_frame(image);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Ties a registered session to a scope: dropping the guard disconnects the
/// session, whichever way the scope is left.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, id: SessionId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.disconnect(&self.id);
    }
}
