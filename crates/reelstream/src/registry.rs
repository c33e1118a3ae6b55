//! Session lifetimes, keyed by owner.
//!
//! The registry enforces the one-stream-per-owner rule, owns every
//! [`SessionHandle`], relays owner commands into the session tasks, and
//! persists the serializable slice of a session so it can be restored after
//! a restart (the restored session re-enters `Resolving` with fresh
//! non-persistable parts: cache, pipeline, estimator, controller).
//!
//! Persistence is best-effort JSON files under the configured state
//! directory; a failed write never breaks playback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use url::Url;

use crate::consumer::{MediaSink, Transmuxer};
use crate::error::{EngineError, EngineResult};
use crate::events::SessionEvent;
use crate::model::{OwnerId, SessionId, SessionState};
use crate::proxy::{RequestHeaders, RequestProxy};
use crate::session::{
    SessionCommand, SessionHandle, SessionParams, SessionStats, spawn_session,
};
use crate::settings::Settings;

/// Serializable slice of a session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct PersistedSession {
    id: SessionId,
    owner_id: OwnerId,
    manifest_url: String,
    current_variant_ix: usize,
    state_tag: String,
    resume_epoch: u64,
}

/// Owns all sessions and maps owners onto them.
pub struct SessionRegistry {
    settings: Arc<Settings>,
    proxy: Arc<dyn RequestProxy>,
    owners: HashMap<OwnerId, SessionId>,
    sessions: HashMap<SessionId, SessionHandle>,
    /// Headers supplied at `open`, keyed by manifest URL. First write wins;
    /// entries are copied into each request, never mutated.
    header_cache: HashMap<String, RequestHeaders>,
    next_id: u64,
}

impl SessionRegistry {
    /// Create a registry using `proxy` for all network access.
    pub fn new(settings: Settings, proxy: Arc<dyn RequestProxy>) -> Self {
        Self {
            settings: Arc::new(settings),
            proxy,
            owners: HashMap::new(),
            sessions: HashMap::new(),
            header_cache: HashMap::new(),
            next_id: 1,
        }
    }

    /// Open a stream for `owner`.
    ///
    /// If the owner already has a live session, the detection is dropped and
    /// the existing id is returned. A finished session (ended, failed, or
    /// whose task exited) is replaced.
    pub fn open(
        &mut self,
        owner: OwnerId,
        manifest_url: &str,
        headers: Option<RequestHeaders>,
        sink: Box<dyn MediaSink>,
        transmuxer: Option<Box<dyn Transmuxer>>,
    ) -> EngineResult<SessionId> {
        if let Some(&existing) = self.owners.get(&owner) {
            if let Some(handle) = self.sessions.get(&existing) {
                if !handle.state().is_terminal() && !handle.join.is_finished() {
                    debug!(%owner, session = %existing, "duplicate detection dropped");
                    return Ok(existing);
                }
            }
            // Stale mapping; fall through and replace it.
            self.forget(existing);
        }

        let url =
            Url::parse(manifest_url).map_err(|e| EngineError::invalid_url(manifest_url, e))?;

        if let Some(headers) = headers {
            // Immutable after first write; copies are handed to sessions.
            self.header_cache
                .entry(url.to_string())
                .or_insert(headers);
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.spawn(id, owner, url, sink, transmuxer)
    }

    fn spawn(
        &mut self,
        id: SessionId,
        owner: OwnerId,
        url: Url,
        sink: Box<dyn MediaSink>,
        transmuxer: Option<Box<dyn Transmuxer>>,
    ) -> EngineResult<SessionId> {
        let headers = self.header_cache.get(&url.to_string()).cloned();
        let handle = spawn_session(SessionParams {
            id,
            owner_id: owner.clone(),
            manifest_url: url,
            headers,
            settings: self.settings.clone(),
            proxy: self.proxy.clone(),
            sink,
            transmuxer,
        });

        self.owners.insert(owner, id);
        self.sessions.insert(id, handle);

        if let Err(e) = self.save(id) {
            trace!(session = %id, error = %e, "initial session persist skipped");
        }
        Ok(id)
    }

    fn handle(&self, id: SessionId) -> EngineResult<&SessionHandle> {
        self.sessions
            .get(&id)
            .ok_or(EngineError::SessionNotFound(id))
    }

    async fn send(&self, id: SessionId, cmd: SessionCommand) -> EngineResult<()> {
        let handle = self.handle(id)?;
        handle
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::SessionStopped(id))
    }

    /// Suspend the download loop.
    pub async fn pause(&self, id: SessionId) -> EngineResult<()> {
        self.send(id, SessionCommand::Pause).await
    }

    /// Resume a paused session.
    pub async fn resume(&self, id: SessionId) -> EngineResult<()> {
        self.send(id, SessionCommand::Resume).await
    }

    /// Jump to `t_seconds`.
    pub async fn seek(&self, id: SessionId, t_seconds: f64) -> EngineResult<()> {
        self.send(id, SessionCommand::Seek(t_seconds)).await
    }

    /// Pin the rendition (`Some(ix)`) or return to automatic selection.
    pub async fn set_quality(&self, id: SessionId, variant_ix: Option<usize>) -> EngineResult<()> {
        self.send(id, SessionCommand::SetQuality(variant_ix)).await
    }

    /// Subscribe to a session's events.
    pub fn events(&self, id: SessionId) -> EngineResult<broadcast::Receiver<SessionEvent>> {
        Ok(self.handle(id)?.subscribe())
    }

    /// A session's current lifecycle state.
    pub fn state(&self, id: SessionId) -> EngineResult<SessionState> {
        Ok(self.handle(id)?.state())
    }

    /// A session's current transfer counters.
    pub fn stats(&self, id: SessionId) -> EngineResult<SessionStats> {
        Ok(self.handle(id)?.stats())
    }

    /// The active session for `owner`, if any.
    pub fn session_for_owner(&self, owner: &OwnerId) -> Option<SessionId> {
        self.owners.get(owner).copied()
    }

    /// Ids of all registered sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Tear a session down: abort its fetches, stop its task, release its
    /// cache, and erase any persisted state.
    pub async fn close(&mut self, id: SessionId) -> EngineResult<()> {
        let handle = self
            .sessions
            .remove(&id)
            .ok_or(EngineError::SessionNotFound(id))?;
        self.owners.retain(|_, v| *v != id);

        handle.fetch.abort_all();
        handle.cancel.cancel();
        if let Err(e) = handle.join.await {
            if !e.is_cancelled() {
                warn!(session = %id, error = %e, "session task ended abnormally");
            }
        }

        self.erase_persisted(handle.id, &handle.owner_id);
        debug!(session = %handle.id, owner = %handle.owner_id, "session closed");
        Ok(())
    }

    /// Tear down whatever session `owner` holds. No-op without one.
    pub async fn close_owner(&mut self, owner: &OwnerId) -> EngineResult<()> {
        match self.owners.get(owner).copied() {
            Some(id) => self.close(id).await,
            None => Ok(()),
        }
    }

    fn forget(&mut self, id: SessionId) {
        if let Some(handle) = self.sessions.remove(&id) {
            handle.fetch.abort_all();
            handle.cancel.cancel();
        }
        self.owners.retain(|_, v| *v != id);
    }

    // ----------------------------
    // Persistence
    // ----------------------------

    fn state_dir(&self) -> EngineResult<&PathBuf> {
        self.settings
            .state_dir
            .as_ref()
            .ok_or(EngineError::PersistenceDisabled)
    }

    fn session_path(dir: &Path, id: SessionId) -> PathBuf {
        dir.join(format!("session_{id}.json"))
    }

    fn owner_path(dir: &Path, owner: &OwnerId) -> PathBuf {
        dir.join(format!("owner_{}.json", sanitize_component(&owner.0)))
    }

    /// Persist the serializable slice of a session.
    pub fn save(&self, id: SessionId) -> EngineResult<()> {
        let dir = self.state_dir()?.clone();
        let handle = self.handle(id)?;

        let record = PersistedSession {
            id,
            owner_id: handle.owner_id.clone(),
            manifest_url: handle.manifest_url.to_string(),
            current_variant_ix: handle.stats().current_variant_ix,
            state_tag: handle.state().tag().to_string(),
            resume_epoch: handle.resume_epoch,
        };

        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            Self::session_path(&dir, id),
            serde_json::to_vec_pretty(&record)?,
        )?;
        std::fs::write(
            Self::owner_path(&dir, &record.owner_id),
            serde_json::to_vec(&id)?,
        )?;
        trace!(session = %id, "session state persisted");
        Ok(())
    }

    /// Recreate a previously persisted session.
    ///
    /// Only the serializable slice survives; the cache, pipeline, estimator
    /// and controller are rebuilt and the session re-enters `Resolving`. The
    /// caller provides the consumer-side parts.
    pub fn restore(
        &mut self,
        id: SessionId,
        sink: Box<dyn MediaSink>,
        transmuxer: Option<Box<dyn Transmuxer>>,
    ) -> EngineResult<SessionId> {
        let dir = self.state_dir()?.clone();
        let path = Self::session_path(&dir, id);
        let raw = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::NoPersistedState(id),
            _ => EngineError::Io(e),
        })?;
        let record: PersistedSession = serde_json::from_slice(&raw)?;

        let url = Url::parse(&record.manifest_url)
            .map_err(|e| EngineError::invalid_url(&record.manifest_url, e))?;

        // Keep the id space ahead of everything we restore.
        self.next_id = self.next_id.max(record.id.0 + 1);

        if let Some(existing) = self.owners.get(&record.owner_id).copied() {
            self.forget(existing);
        }

        debug!(session = %id, owner = %record.owner_id, "restoring session");
        self.spawn(record.id, record.owner_id, url, sink, transmuxer)
    }

    fn erase_persisted(&self, id: SessionId, owner: &OwnerId) {
        let Some(dir) = self.settings.state_dir.as_ref() else {
            return;
        };
        for path in [Self::session_path(dir, id), Self::owner_path(dir, owner)] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    trace!(path = %path.display(), error = %e, "persisted state removal failed");
                }
            }
        }
    }
}

/// Make an owner id safe as a file name component.
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
