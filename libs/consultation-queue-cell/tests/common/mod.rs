#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use consultation_queue_cell::{
    CallSession, ConsultationRepository, Dispatcher, InMemoryRepository, QueueEntry,
};
use notification_cell::NotificationHub;
use shared_config::{DispatchPolicy, HubSettings};
use video_conferencing_cell::{
    room_name_for, CapabilityGrant, CapabilityResolver, MediaProvider, MediaToken, RoomHandle,
    VideoConferencingError,
};

// ==============================================================================
// REPOSITORY
// ==============================================================================

/// In-memory repository with switchable faults.
#[derive(Default)]
pub struct FaultyRepository {
    pub inner: InMemoryRepository,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    read_delay_ms: AtomicU64,
    read_failures: AtomicU32,
    pub read_attempts: AtomicU32,
}

impl FaultyRepository {
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn slow_writes(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn slow_reads(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.read_failures.store(count, Ordering::SeqCst);
    }

    async fn before_write(&self) -> Result<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("database offline");
        }
        Ok(())
    }

    async fn before_read(&self) -> Result<()> {
        self.read_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.read_failures.load(Ordering::SeqCst) > 0 {
            self.read_failures.fetch_sub(1, Ordering::SeqCst);
            bail!("connection reset");
        }
        Ok(())
    }
}

#[async_trait]
impl ConsultationRepository for FaultyRepository {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.before_write().await?;
        self.inner.insert_queue_entry(entry).await
    }

    async fn update_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.before_write().await?;
        self.inner.update_queue_entry(entry).await
    }

    async fn get_queue_entry(&self, id: Uuid) -> Result<Option<QueueEntry>> {
        self.before_read().await?;
        self.inner.get_queue_entry(id).await
    }

    async fn list_waiting_entries(&self) -> Result<Vec<QueueEntry>> {
        self.before_read().await?;
        self.inner.list_waiting_entries().await
    }

    async fn record_assignment(&self, entry: &QueueEntry, session: &CallSession) -> Result<()> {
        self.before_write().await?;
        self.inner.record_assignment(entry, session).await
    }

    async fn insert_call_session(&self, session: &CallSession) -> Result<()> {
        self.before_write().await?;
        self.inner.insert_call_session(session).await
    }

    async fn update_call_session(&self, session: &CallSession) -> Result<()> {
        self.before_write().await?;
        self.inner.update_call_session(session).await
    }

    async fn get_call_session(&self, id: Uuid) -> Result<Option<CallSession>> {
        self.before_read().await?;
        self.inner.get_call_session(id).await
    }

    async fn list_active_sessions(&self) -> Result<Vec<CallSession>> {
        self.before_read().await?;
        self.inner.list_active_sessions().await
    }

    async fn list_recorded_sessions(
        &self,
        patients: Option<&[Uuid]>,
        limit: usize,
    ) -> Result<Vec<CallSession>> {
        self.before_read().await?;
        self.inner.list_recorded_sessions(patients, limit).await
    }

    async fn is_family_of(&self, family_id: Uuid, patient_id: Uuid) -> Result<bool> {
        self.before_read().await?;
        self.inner.is_family_of(family_id, patient_id).await
    }

    async fn linked_family(&self, patient_id: Uuid) -> Result<Vec<Uuid>> {
        self.before_read().await?;
        self.inner.linked_family(patient_id).await
    }

    async fn linked_patients(&self, family_id: Uuid) -> Result<Vec<Uuid>> {
        self.before_read().await?;
        self.inner.linked_patients(family_id).await
    }

    async fn has_observation_consent(&self, patient_id: Uuid) -> Result<bool> {
        self.before_read().await?;
        self.inner.has_observation_consent(patient_id).await
    }
}

// ==============================================================================
// MEDIA
// ==============================================================================

#[derive(Default)]
pub struct FakeMedia {
    pub created: Mutex<Vec<Uuid>>,
    pub ended: Mutex<Vec<String>>,
    pub fail_rooms: AtomicBool,
}

#[async_trait]
impl MediaProvider for FakeMedia {
    async fn create_room(
        &self,
        session_id: Uuid,
        _patient_id: Uuid,
    ) -> Result<RoomHandle, VideoConferencingError> {
        if self.fail_rooms.load(Ordering::SeqCst) {
            return Err(VideoConferencingError::ProviderApiError {
                message: "provider down".to_string(),
            });
        }
        self.created.lock().unwrap().push(session_id);
        Ok(RoomHandle {
            name: room_name_for(session_id),
            sid: Some(format!("RM_{}", session_id.simple())),
        })
    }

    async fn issue_token(
        &self,
        room_name: &str,
        identity: Uuid,
        grant: &CapabilityGrant,
    ) -> Result<MediaToken, VideoConferencingError> {
        Ok(MediaToken {
            token: format!("token-for-{}", identity),
            server_url: "ws://localhost:7880".to_string(),
            room_name: room_name.to_string(),
            identity,
            grant: grant.clone(),
        })
    }

    async fn end_room(&self, room_name: &str) -> Result<(), VideoConferencingError> {
        if self.fail_rooms.load(Ordering::SeqCst) {
            return Err(VideoConferencingError::ProviderApiError {
                message: "provider down".to_string(),
            });
        }
        self.ended.lock().unwrap().push(room_name.to_string());
        Ok(())
    }
}

// ==============================================================================
// HARNESS
// ==============================================================================

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub repository: Arc<FaultyRepository>,
    pub media: Arc<FakeMedia>,
    pub hub: NotificationHub,
}

pub fn policy() -> DispatchPolicy {
    DispatchPolicy {
        average_session_minutes: 15,
        lock_timeout: Duration::from_millis(500),
        storage_timeout: Duration::from_secs(1),
        storage_read_retries: 2,
    }
}

pub fn hub_settings() -> HubSettings {
    HubSettings {
        mailbox_capacity: 256,
        connection_buffer_capacity: 64,
        write_timeout: Duration::from_millis(200),
    }
}

pub fn harness() -> Harness {
    harness_with(policy(), Arc::new(FaultyRepository::default()))
}

pub fn harness_with(policy: DispatchPolicy, repository: Arc<FaultyRepository>) -> Harness {
    harness_with_hub(policy, repository, hub_settings())
}

/// Must be called inside a runtime: the hub actor is spawned here.
pub fn harness_with_hub(
    policy: DispatchPolicy,
    repository: Arc<FaultyRepository>,
    settings: HubSettings,
) -> Harness {
    let (hub, _task) = NotificationHub::spawn(settings);
    let media = Arc::new(FakeMedia::default());
    let dispatcher = Arc::new(Dispatcher::new(
        repository.clone(),
        media.clone(),
        hub.clone(),
        CapabilityResolver::default(),
        policy,
    ));

    Harness {
        dispatcher,
        repository,
        media,
        hub,
    }
}
