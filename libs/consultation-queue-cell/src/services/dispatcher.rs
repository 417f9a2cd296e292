use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{event_types, Audience, Notification, NotificationHub};
use shared_config::DispatchPolicy;
use shared_models::{auth::UserRole, error::AppError};
use video_conferencing_cell::{
    CapabilityResolver, MediaProvider, MediaToken, ProviderEvent, ProviderEventSink, RecordingFile,
};

use crate::error::DispatchError;
use crate::models::{
    CallSession, PriorityTier, QueueEntry, QueueListing, QueueStatus, RankedEntry, Recording,
    SessionStatus,
};
use crate::services::queue::QueueStore;
use crate::services::repository::ConsultationRepository;
use crate::services::sessions::SessionRegistry;

const RECORDING_LIST_LIMIT: usize = 100;

struct DispatchState {
    queue: QueueStore,
    sessions: SessionRegistry,
}

/// The caller of an operation, as far as dispatch authorization cares.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub identity: Uuid,
    pub role: UserRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrationSummary {
    pub waiting_entries: usize,
    pub active_sessions: usize,
}

/// Sole owner of the queue and the session registry.
///
/// Every state change runs inside one critical section: take the lock
/// (bounded wait, else `Busy`), persist, apply to memory, publish. Events go
/// out through the hub's non-blocking publish, so holding the lock while
/// publishing keeps per-patient events in causal order without ever waiting
/// on a client. Repository reads and provider room calls happen with the
/// lock released.
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    repository: Arc<dyn ConsultationRepository>,
    media: Arc<dyn MediaProvider>,
    hub: NotificationHub,
    capabilities: CapabilityResolver,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        repository: Arc<dyn ConsultationRepository>,
        media: Arc<dyn MediaProvider>,
        hub: NotificationHub,
        capabilities: CapabilityResolver,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            state: Mutex::new(DispatchState {
                queue: QueueStore::new(policy.average_session_minutes),
                sessions: SessionRegistry::new(),
            }),
            repository,
            media,
            hub,
            capabilities,
            policy,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, DispatchState>, DispatchError> {
        timeout(self.policy.lock_timeout, self.state.lock())
            .await
            .map_err(|_| {
                warn!(
                    "Dispatcher lock not acquired within {:?}",
                    self.policy.lock_timeout
                );
                DispatchError::Busy
            })
    }

    /// Writes are attempted once: a blind retry could double-assign.
    async fn write<T>(
        &self,
        what: &str,
        op: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, DispatchError> {
        match timeout(self.policy.storage_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("Storage write failed ({}): {}", what, e);
                Err(DispatchError::StorageUnavailable(e.to_string()))
            }
            Err(_) => {
                error!("Storage write timed out ({})", what);
                Err(DispatchError::StorageUnavailable(format!("{} timed out", what)))
            }
        }
    }

    async fn read<T, F, Fut>(&self, what: &str, op: F) -> Result<T, DispatchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let attempts = self.policy.storage_read_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match timeout(self.policy.storage_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("{} timed out", what),
            }

            if attempt < attempts {
                warn!(
                    "Storage read failed ({}), attempt {}/{}: {}",
                    what, attempt, attempts, last_error
                );
                sleep(Duration::from_millis(50 * u64::from(attempt))).await;
            }
        }

        error!("Storage read gave up ({}): {}", what, last_error);
        Err(DispatchError::StorageUnavailable(last_error))
    }

    // ==========================================================================
    // STARTUP
    // ==========================================================================

    /// Loads waiting entries and active sessions persisted by a previous run.
    #[instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<HydrationSummary, DispatchError> {
        let repo = self.repository.as_ref();
        let entries = self
            .read("list waiting entries", move || repo.list_waiting_entries())
            .await?;
        let sessions = self
            .read("list active sessions", move || repo.list_active_sessions())
            .await?;

        let mut state = self.lock().await?;
        let active_sessions = state.sessions.restore(sessions);

        let (entries, conflicting): (Vec<QueueEntry>, Vec<QueueEntry>) = entries
            .into_iter()
            .partition(|e| state.sessions.ensure_patient_free(e.patient_id).is_ok());
        for entry in &conflicting {
            warn!(
                "Skipping queue entry {}: patient {} is already in a session",
                entry.id, entry.patient_id
            );
        }

        let summary = HydrationSummary {
            active_sessions,
            waiting_entries: state.queue.restore(entries),
        };

        info!(
            "Dispatcher hydrated: {} waiting, {} active sessions",
            summary.waiting_entries, summary.active_sessions
        );
        Ok(summary)
    }

    // ==========================================================================
    // QUEUE
    // ==========================================================================

    #[instrument(skip(self, reason, notes))]
    pub async fn enqueue(
        &self,
        patient_id: Uuid,
        priority: PriorityTier,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<RankedEntry, DispatchError> {
        let mut state = self.lock().await?;
        state.queue.ensure_not_waiting(patient_id)?;
        state.sessions.ensure_patient_free(patient_id)?;

        let entry = QueueEntry::new(patient_id, priority, reason, notes, Utc::now());
        self.write("insert queue entry", self.repository.insert_queue_entry(&entry))
            .await?;
        state.queue.insert(entry)?;

        let ranked = state.queue.ranked_for_patient(patient_id)?;
        info!(
            "Patient {} joined the queue at position {} ({:?})",
            patient_id, ranked.position, priority
        );

        self.publish_queue_state(&state.queue);
        Ok(ranked)
    }

    pub async fn list_queue(&self) -> Result<QueueListing, DispatchError> {
        let state = self.lock().await?;
        Ok(QueueListing {
            entries: state.queue.ranked(),
            stats: state.queue.stats(),
        })
    }

    pub async fn queue_status(&self, patient_id: Uuid) -> Result<RankedEntry, DispatchError> {
        self.lock().await?.queue.ranked_for_patient(patient_id)
    }

    pub async fn position_of(&self, patient_id: Uuid) -> Result<usize, DispatchError> {
        self.lock().await?.queue.position_of(patient_id)
    }

    pub async fn queue_depth(&self) -> Result<usize, DispatchError> {
        Ok(self.lock().await?.queue.len())
    }

    /// Patients may only cancel their own entry.
    #[instrument(skip(self))]
    pub async fn cancel_entry(
        &self,
        entry_id: Uuid,
        requester: Requester,
    ) -> Result<QueueEntry, DispatchError> {
        let mut state = self.lock().await?;
        let entry = state
            .queue
            .get(entry_id)
            .cloned()
            .ok_or_else(|| DispatchError::entry_not_found(entry_id))?;

        let allowed = match requester.role {
            UserRole::Patient => entry.patient_id == requester.identity,
            UserRole::Staff | UserRole::Admin => true,
            UserRole::Family => false,
        };
        if !allowed {
            return Err(DispatchError::NotParticipant);
        }

        let cancelled = entry.cancelled();
        self.write("cancel queue entry", self.repository.update_queue_entry(&cancelled))
            .await?;
        state.queue.remove(entry_id)?;

        info!("Queue entry {} cancelled by {}", entry_id, requester.identity);
        self.publish_queue_state(&state.queue);
        Ok(cancelled)
    }

    // ==========================================================================
    // DISPATCH
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn assign_next(&self, staff_id: Uuid) -> Result<CallSession, DispatchError> {
        let session = {
            let mut state = self.lock().await?;
            let Some(entry) = state.queue.head() else {
                info!("No patients waiting for staff {}", staff_id);
                return Err(DispatchError::QueueEmpty);
            };
            self.commit_assignment(&mut state, entry, staff_id).await?
        };

        self.open_room(&session).await;
        self.notify_family(&session).await;
        Ok(session)
    }

    #[instrument(skip(self))]
    pub async fn assign_specific(
        &self,
        entry_id: Uuid,
        staff_id: Uuid,
    ) -> Result<CallSession, DispatchError> {
        let session = {
            let mut state = self.lock().await?;
            let waiting = state.queue.get(entry_id).cloned();
            let Some(entry) = waiting else {
                drop(state);
                return Err(self.explain_missing_entry(entry_id).await);
            };
            self.commit_assignment(&mut state, entry, staff_id).await?
        };

        self.open_room(&session).await;
        self.notify_family(&session).await;
        Ok(session)
    }

    /// An entry absent from the waiting set was either claimed already or
    /// never existed; the repository tells which. Called without the lock.
    async fn explain_missing_entry(&self, entry_id: Uuid) -> DispatchError {
        let repo = self.repository.as_ref();
        match self
            .read("get queue entry", move || repo.get_queue_entry(entry_id))
            .await
        {
            Ok(Some(entry)) if entry.status == QueueStatus::Assigned => {
                DispatchError::AlreadyAssigned(entry_id)
            }
            Ok(_) => DispatchError::entry_not_found(entry_id),
            Err(e) => e,
        }
    }

    async fn commit_assignment(
        &self,
        state: &mut DispatchState,
        entry: QueueEntry,
        staff_id: Uuid,
    ) -> Result<CallSession, DispatchError> {
        state.sessions.ensure_patient_free(entry.patient_id)?;

        let now = Utc::now();
        let assigned = entry.assigned(staff_id, now);
        let session = CallSession::from_entry(&assigned, staff_id, now);

        self.write(
            "record assignment",
            self.repository.record_assignment(&assigned, &session),
        )
        .await?;

        state.queue.remove(entry.id)?;
        state.sessions.create(session.clone())?;

        info!(
            "Queue entry {} assigned to staff {} as session {}",
            entry.id, staff_id, session.id
        );

        self.publish_call_started(&session);
        self.publish_queue_state(&state.queue);
        Ok(session)
    }

    /// Staff-initiated session with no queue entry behind it.
    #[instrument(skip(self))]
    pub async fn start_ad_hoc(
        &self,
        patient_id: Uuid,
        staff_id: Uuid,
    ) -> Result<CallSession, DispatchError> {
        let session = {
            let mut state = self.lock().await?;
            state.queue.ensure_not_waiting(patient_id)?;
            state.sessions.ensure_patient_free(patient_id)?;

            let session = CallSession::ad_hoc(patient_id, staff_id, Utc::now());
            self.write(
                "insert call session",
                self.repository.insert_call_session(&session),
            )
            .await?;
            state.sessions.create(session.clone())?;

            info!(
                "Ad-hoc session {} started by {} for patient {}",
                session.id, staff_id, patient_id
            );
            self.publish_call_started(&session);
            session
        };

        self.open_room(&session).await;
        self.notify_family(&session).await;
        Ok(session)
    }

    // ==========================================================================
    // SESSIONS
    // ==========================================================================

    /// Live sessions come from memory; anything else from the repository,
    /// read after the lock is released.
    pub async fn get_session(&self, session_id: Uuid) -> Result<CallSession, DispatchError> {
        let cached = self.lock().await?.sessions.get_by_id(session_id).ok().cloned();
        match cached {
            Some(session) => Ok(session),
            None => self.fetch_session(session_id).await,
        }
    }

    pub async fn list_active_sessions(&self) -> Result<Vec<CallSession>, DispatchError> {
        Ok(self.lock().await?.sessions.list_active())
    }

    pub async fn active_session_count(&self) -> Result<usize, DispatchError> {
        Ok(self.lock().await?.sessions.active_count())
    }

    /// Idempotent: ending an ended session succeeds and changes nothing.
    pub async fn end_session(&self, session_id: Uuid) -> Result<CallSession, DispatchError> {
        self.finish(session_id, SessionStatus::Ended, true).await
    }

    pub async fn cancel_session(&self, session_id: Uuid) -> Result<CallSession, DispatchError> {
        self.finish(session_id, SessionStatus::Cancelled, true).await
    }

    /// Provider reported the room closed; the room itself needs no cleanup.
    pub async fn finish_room(&self, room_name: &str) -> Result<CallSession, DispatchError> {
        let session_id = self.session_id_for_room(room_name).await?;
        self.finish(session_id, SessionStatus::Ended, false).await
    }

    #[instrument(skip(self))]
    async fn finish(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        close_room: bool,
    ) -> Result<CallSession, DispatchError> {
        let ended = {
            let (mut state, current) = self.lock_with_session(session_id).await?;
            if !current.is_active() {
                debug!("Session {} already {:?}", session_id, current.status);
                return Ok(current);
            }

            let ended = current.finished(status, Utc::now());
            self.write(
                "finish call session",
                self.repository.update_call_session(&ended),
            )
            .await?;
            state.sessions.replace(ended.clone());

            info!(
                "Session {} {:?} after {}s",
                session_id,
                status,
                ended.duration_seconds.unwrap_or_default()
            );
            self.publish_call_ended(&ended);
            ended
        };

        if close_room {
            if let Err(e) = self.media.end_room(&ended.room_name).await {
                warn!("Closing room {} failed: {}", ended.room_name, e);
            }
        }
        Ok(ended)
    }

    pub async fn recording_started(
        &self,
        room_name: &str,
        egress_id: &str,
    ) -> Result<CallSession, DispatchError> {
        let session_id = self.session_id_for_room(room_name).await?;
        let (mut state, current) = self.lock_with_session(session_id).await?;

        let updated = CallSession {
            is_recording: true,
            egress_id: Some(egress_id.to_string()),
            ..current
        };
        self.write(
            "mark recording",
            self.repository.update_call_session(&updated),
        )
        .await?;
        state.sessions.replace(updated.clone());

        info!("Recording {} started for session {}", egress_id, updated.id);
        Ok(updated)
    }

    /// Usually arrives after the room has closed, so the session is often
    /// only in the repository by then.
    pub async fn recording_ended(
        &self,
        egress_id: &str,
        room_name: Option<&str>,
        file: RecordingFile,
    ) -> Result<CallSession, DispatchError> {
        let recording = self
            .lock()
            .await?
            .sessions
            .find_by_egress(egress_id)
            .map(|s| s.id);
        let session_id = match (recording, room_name) {
            (Some(id), _) => id,
            (None, Some(room)) => self.session_id_for_room(room).await?,
            (None, None) => return Err(DispatchError::NotFound(format!("Recording {}", egress_id))),
        };
        let (mut state, current) = self.lock_with_session(session_id).await?;

        let updated = CallSession {
            is_recording: false,
            egress_id: Some(egress_id.to_string()),
            recording_url: Some(file.url),
            recording_size_bytes: Some(file.size_bytes),
            recording_duration_seconds: Some(file.duration_seconds),
            ..current
        };
        self.write(
            "attach recording",
            self.repository.update_call_session(&updated),
        )
        .await?;
        state.sessions.replace(updated.clone());

        info!("Recording {} stored for session {}", egress_id, updated.id);
        Ok(updated)
    }

    /// Media token for `requester`, scoped to the session's room.
    #[instrument(skip(self))]
    pub async fn issue_session_token(
        &self,
        session_id: Uuid,
        requester: Requester,
        observer: bool,
    ) -> Result<MediaToken, DispatchError> {
        let session = self.get_session(session_id).await?;
        if !session.is_active() {
            return Err(DispatchError::SessionClosed(session_id));
        }

        let observer = match requester.role {
            UserRole::Patient if session.patient_id != requester.identity => {
                return Err(DispatchError::NotParticipant)
            }
            UserRole::Staff if session.staff_id != requester.identity => {
                return Err(DispatchError::NotParticipant)
            }
            UserRole::Family => {
                self.ensure_may_observe(requester.identity, session.patient_id)
                    .await?;
                true
            }
            UserRole::Patient | UserRole::Staff | UserRole::Admin => observer,
        };

        let grant = self.capabilities.resolve(requester.role, observer, Utc::now());
        let token = self
            .media
            .issue_token(&session.room_name, requester.identity, &grant)
            .await?;

        info!(
            "Issued {} media token for session {} to {}",
            grant.role, session_id, requester.identity
        );
        Ok(token)
    }

    /// Family may only watch a linked patient who has consented to it.
    async fn ensure_may_observe(
        &self,
        family_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), DispatchError> {
        let repo = self.repository.as_ref();
        let linked = self
            .read("check family link", move || repo.is_family_of(family_id, patient_id))
            .await?;
        if !linked {
            warn!("{} is not linked to patient {}", family_id, patient_id);
            return Err(DispatchError::NotParticipant);
        }

        let consented = self
            .read("check observation consent", move || {
                repo.has_observation_consent(patient_id)
            })
            .await?;
        if !consented {
            return Err(DispatchError::ObservationNotConsented(patient_id));
        }
        Ok(())
    }

    // ==========================================================================
    // RECORDINGS
    // ==========================================================================

    /// Recordings visible to `requester`: staff and admins see all, patients
    /// their own, family those of linked patients.
    pub async fn list_recordings(
        &self,
        requester: Requester,
    ) -> Result<Vec<Recording>, DispatchError> {
        let repo = self.repository.as_ref();
        let patients = match requester.role {
            UserRole::Staff | UserRole::Admin => None,
            UserRole::Patient => Some(vec![requester.identity]),
            UserRole::Family => Some(
                self.read("list linked patients", move || {
                    repo.linked_patients(requester.identity)
                })
                .await?,
            ),
        };

        let patients = patients.as_deref();
        let sessions = self
            .read("list recorded sessions", move || {
                repo.list_recorded_sessions(patients, RECORDING_LIST_LIMIT)
            })
            .await?;
        Ok(sessions.iter().filter_map(CallSession::recording).collect())
    }

    pub async fn session_recordings(
        &self,
        session_id: Uuid,
        requester: Requester,
    ) -> Result<Vec<Recording>, DispatchError> {
        let session = self.get_session(session_id).await?;

        let allowed = match requester.role {
            UserRole::Staff | UserRole::Admin => true,
            UserRole::Patient => session.patient_id == requester.identity,
            UserRole::Family => {
                let repo = self.repository.as_ref();
                let family_id = requester.identity;
                let patient_id = session.patient_id;
                self.read("check family link", move || {
                    repo.is_family_of(family_id, patient_id)
                })
                .await?
            }
        };
        if !allowed {
            return Err(DispatchError::NotParticipant);
        }

        Ok(session.recording().into_iter().collect())
    }

    // ==========================================================================
    // LOOKUPS
    // ==========================================================================

    async fn fetch_session(&self, session_id: Uuid) -> Result<CallSession, DispatchError> {
        let repo = self.repository.as_ref();
        self.read("get call session", move || repo.get_call_session(session_id))
            .await?
            .ok_or_else(|| DispatchError::session_not_found(session_id))
    }

    /// Takes the lock with the current copy of `session_id` in hand. A
    /// session missing from memory is read from the repository with the lock
    /// released, then memory is checked again before the stored copy is used.
    async fn lock_with_session(
        &self,
        session_id: Uuid,
    ) -> Result<(MutexGuard<'_, DispatchState>, CallSession), DispatchError> {
        let mut stored = None;
        loop {
            let state = self.lock().await?;
            let cached = state.sessions.get_by_id(session_id).ok().cloned();
            if let Some(session) = cached.or_else(|| stored.take()) {
                return Ok((state, session));
            }
            drop(state);

            stored = Some(self.fetch_session(session_id).await?);
        }
    }

    async fn session_id_for_room(&self, room_name: &str) -> Result<Uuid, DispatchError> {
        let live = self
            .lock()
            .await?
            .sessions
            .find_by_room(room_name)
            .map(|s| s.id);
        live.or_else(|| session_id_from_room(room_name))
            .ok_or_else(|| DispatchError::NotFound(format!("Room {}", room_name)))
    }

    // ==========================================================================
    // SIDE EFFECTS
    // ==========================================================================

    async fn open_room(&self, session: &CallSession) {
        match self.media.create_room(session.id, session.patient_id).await {
            Ok(room) => debug!("Room {} ready for session {}", room.name, session.id),
            Err(e) => warn!("Creating room for session {} failed: {}", session.id, e),
        }
    }

    fn publish_call_started(&self, session: &CallSession) {
        self.hub
            .send_to_user(session.patient_id, &call_started(session, false));
    }

    /// Tells linked family a call they may watch has begun. Best effort: the
    /// session is already live whatever happens here.
    async fn notify_family(&self, session: &CallSession) {
        let repo = self.repository.as_ref();
        let patient_id = session.patient_id;
        let family = match self
            .read("list linked family", move || repo.linked_family(patient_id))
            .await
        {
            Ok(family) => family,
            Err(e) => {
                warn!("Family of {} not notified: {}", patient_id, e);
                return;
            }
        };
        if family.is_empty() {
            return;
        }

        let notification = call_started(session, true);
        self.hub.publish_many(
            family
                .into_iter()
                .map(|member| (Audience::Identity(member), notification.clone())),
        );
    }

    fn publish_call_ended(&self, session: &CallSession) {
        let notification = Notification::new(
            event_types::CALL_ENDED,
            json!({
                "session_id": session.id,
                "status": session.status,
                "ended_at": session.ended_at,
                "duration_seconds": session.duration_seconds,
            }),
        );
        self.hub.send_to_user(session.patient_id, &notification);
        self.hub.send_to_user(session.staff_id, &notification);
    }

    /// Every waiting patient gets their new rank; staff and admins get stats.
    /// Sent as one hub command however long the queue is.
    fn publish_queue_state(&self, queue: &QueueStore) {
        let ranked = queue.ranked();
        let queue_length = ranked.len();

        let mut batch: Vec<(Audience, Notification)> = ranked
            .iter()
            .map(|item| {
                (
                    Audience::Identity(item.entry.patient_id),
                    Notification::new(
                        event_types::QUEUE_POSITION,
                        json!({
                            "entry_id": item.entry.id,
                            "position": item.position,
                            "estimated_wait_minutes": item.estimated_wait_minutes,
                            "queue_length": queue_length,
                        }),
                    ),
                )
            })
            .collect();

        let update = Notification::new(
            event_types::QUEUE_UPDATED,
            json!({
                "queue_length": queue_length,
                "stats": queue.stats(),
            }),
        );
        batch.push((Audience::Role(UserRole::Staff), update.clone()));
        batch.push((Audience::Role(UserRole::Admin), update));

        self.hub.publish_many(batch);
    }
}

fn call_started(session: &CallSession, observer: bool) -> Notification {
    Notification::new(
        event_types::CALL_STARTED,
        json!({
            "session_id": session.id,
            "queue_entry_id": session.queue_entry_id,
            "patient_id": session.patient_id,
            "staff_id": session.staff_id,
            "room_name": session.room_name,
            "started_at": session.started_at,
            "observer": observer,
        }),
    )
}

/// Rooms are named `call_{session id}`.
fn session_id_from_room(room_name: &str) -> Option<Uuid> {
    room_name
        .strip_prefix("call_")
        .and_then(|id| Uuid::parse_str(id).ok())
}

#[async_trait]
impl ProviderEventSink for Dispatcher {
    async fn handle_provider_event(&self, event: ProviderEvent) -> Result<(), AppError> {
        let result = match event {
            ProviderEvent::RoomStarted { room_name } => {
                debug!("Room {} started", room_name);
                Ok(())
            }
            ProviderEvent::RoomFinished { room_name } => {
                self.finish_room(&room_name).await.map(|_| ())
            }
            ProviderEvent::RecordingStarted {
                room_name,
                egress_id,
            } => self
                .recording_started(&room_name, &egress_id)
                .await
                .map(|_| ()),
            ProviderEvent::RecordingEnded {
                egress_id,
                room_name,
                file,
            } => self
                .recording_ended(&egress_id, room_name.as_deref(), file)
                .await
                .map(|_| ()),
            ProviderEvent::Ignored { .. } => Ok(()),
        };

        match result {
            // Unknown rooms are acknowledged so the provider stops redelivering.
            Err(DispatchError::NotFound(what)) => {
                warn!("Provider event for unknown {}", what);
                Ok(())
            }
            other => other.map_err(AppError::from),
        }
    }
}
