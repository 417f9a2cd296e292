use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::models::{CallSession, QueueEntry, QueueStatus, SessionStatus};

const QUEUE_TABLE: &str = "queue_entries";
const SESSION_TABLE: &str = "call_sessions";
const FAMILY_TABLE: &str = "family_relationships";
const USERS_TABLE: &str = "users";
const ASSIGN_FUNCTION: &str = "assign_queue_entry";

/// Durable store for queue entries and call sessions. Every write is
/// expected to be atomic; `record_assignment` covers two rows at once.
#[async_trait]
pub trait ConsultationRepository: Send + Sync {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<()>;
    async fn update_queue_entry(&self, entry: &QueueEntry) -> Result<()>;
    async fn get_queue_entry(&self, id: Uuid) -> Result<Option<QueueEntry>>;
    async fn list_waiting_entries(&self) -> Result<Vec<QueueEntry>>;

    /// Marks the entry assigned and creates its session in one transaction.
    async fn record_assignment(&self, entry: &QueueEntry, session: &CallSession) -> Result<()>;

    async fn insert_call_session(&self, session: &CallSession) -> Result<()>;
    async fn update_call_session(&self, session: &CallSession) -> Result<()>;
    async fn get_call_session(&self, id: Uuid) -> Result<Option<CallSession>>;
    async fn list_active_sessions(&self) -> Result<Vec<CallSession>>;

    /// Sessions with a stored recording, most recently ended first.
    /// `patients` narrows the listing; `None` means every patient.
    async fn list_recorded_sessions(
        &self,
        patients: Option<&[Uuid]>,
        limit: usize,
    ) -> Result<Vec<CallSession>>;

    async fn is_family_of(&self, family_id: Uuid, patient_id: Uuid) -> Result<bool>;
    async fn linked_family(&self, patient_id: Uuid) -> Result<Vec<Uuid>>;
    async fn linked_patients(&self, family_id: Uuid) -> Result<Vec<Uuid>>;

    /// Whether the patient agreed to linked family watching their calls.
    async fn has_observation_consent(&self, patient_id: Uuid) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct FamilyLink {
    family_member_id: Uuid,
    patient_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ConsentRow {
    #[serde(default)]
    livestream_consent: bool,
}

// ==============================================================================
// IN-MEMORY
// ==============================================================================

#[derive(Default)]
struct Tables {
    entries: HashMap<Uuid, QueueEntry>,
    sessions: HashMap<Uuid, CallSession>,
    /// `(family member, patient)`
    family: HashSet<(Uuid, Uuid)>,
    consenting: HashSet<Uuid>,
}

/// Process-local repository, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn link_family(&self, family_id: Uuid, patient_id: Uuid) {
        self.tables.write().await.family.insert((family_id, patient_id));
    }

    pub async fn set_observation_consent(&self, patient_id: Uuid, consent: bool) {
        let mut tables = self.tables.write().await;
        if consent {
            tables.consenting.insert(patient_id);
        } else {
            tables.consenting.remove(&patient_id);
        }
    }
}

#[async_trait]
impl ConsultationRepository for InMemoryRepository {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.entries.contains_key(&entry.id) {
            return Err(anyhow!("queue entry {} already exists", entry.id));
        }
        tables.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.entries.get_mut(&entry.id) {
            Some(row) => {
                *row = entry.clone();
                Ok(())
            }
            None => Err(anyhow!("no queue entry {}", entry.id)),
        }
    }

    async fn get_queue_entry(&self, id: Uuid) -> Result<Option<QueueEntry>> {
        Ok(self.tables.read().await.entries.get(&id).cloned())
    }

    async fn list_waiting_entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.status == QueueStatus::Waiting)
            .cloned()
            .collect())
    }

    async fn record_assignment(&self, entry: &QueueEntry, session: &CallSession) -> Result<()> {
        let mut tables = self.tables.write().await;
        let current = tables
            .entries
            .get(&entry.id)
            .ok_or_else(|| anyhow!("no queue entry {}", entry.id))?;
        if current.status != QueueStatus::Waiting {
            return Err(anyhow!("queue entry {} is no longer waiting", entry.id));
        }

        tables.entries.insert(entry.id, entry.clone());
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn insert_call_session(&self, session: &CallSession) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(anyhow!("call session {} already exists", session.id));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_call_session(&self, session: &CallSession) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.sessions.get_mut(&session.id) {
            Some(row) => {
                *row = session.clone();
                Ok(())
            }
            None => Err(anyhow!("no call session {}", session.id)),
        }
    }

    async fn get_call_session(&self, id: Uuid) -> Result<Option<CallSession>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn list_active_sessions(&self) -> Result<Vec<CallSession>> {
        Ok(self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .cloned()
            .collect())
    }

    async fn list_recorded_sessions(
        &self,
        patients: Option<&[Uuid]>,
        limit: usize,
    ) -> Result<Vec<CallSession>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<CallSession> = tables
            .sessions
            .values()
            .filter(|s| s.recording_url.is_some())
            .filter(|s| patients.map_or(true, |ids| ids.contains(&s.patient_id)))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn is_family_of(&self, family_id: Uuid, patient_id: Uuid) -> Result<bool> {
        Ok(self
            .tables
            .read()
            .await
            .family
            .contains(&(family_id, patient_id)))
    }

    async fn linked_family(&self, patient_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .family
            .iter()
            .filter(|(_, patient)| *patient == patient_id)
            .map(|(family, _)| *family)
            .collect())
    }

    async fn linked_patients(&self, family_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .family
            .iter()
            .filter(|(family, _)| *family == family_id)
            .map(|(_, patient)| *patient)
            .collect())
    }

    async fn has_observation_consent(&self, patient_id: Uuid) -> Result<bool> {
        Ok(self.tables.read().await.consenting.contains(&patient_id))
    }
}

// ==============================================================================
// SUPABASE
// ==============================================================================

/// PostgREST-backed repository. The assignment goes through a Postgres
/// function so both rows commit together.
pub struct SupabaseRepository {
    client: SupabaseClient,
}

impl SupabaseRepository {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConsultationRepository for SupabaseRepository {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.client.insert(QUEUE_TABLE, entry).await
    }

    async fn update_queue_entry(&self, entry: &QueueEntry) -> Result<()> {
        self.client
            .update(QUEUE_TABLE, &format!("id=eq.{}", entry.id), entry)
            .await
    }

    async fn get_queue_entry(&self, id: Uuid) -> Result<Option<QueueEntry>> {
        self.client
            .select_one(QUEUE_TABLE, &format!("id=eq.{}", id))
            .await
    }

    async fn list_waiting_entries(&self) -> Result<Vec<QueueEntry>> {
        self.client
            .select(QUEUE_TABLE, "status=eq.waiting&order=enqueued_at.asc")
            .await
    }

    async fn record_assignment(&self, entry: &QueueEntry, session: &CallSession) -> Result<()> {
        debug!("Recording assignment of {} as session {}", entry.id, session.id);
        let result = self
            .client
            .rpc(
                ASSIGN_FUNCTION,
                json!({
                    "p_entry": entry,
                    "p_session": session,
                }),
            )
            .await?;

        // The function returns false when the entry had already left `waiting`.
        if result == json!(false) {
            return Err(anyhow!("queue entry {} is no longer waiting", entry.id));
        }
        Ok(())
    }

    async fn insert_call_session(&self, session: &CallSession) -> Result<()> {
        self.client.insert(SESSION_TABLE, session).await
    }

    async fn update_call_session(&self, session: &CallSession) -> Result<()> {
        self.client
            .update(SESSION_TABLE, &format!("id=eq.{}", session.id), session)
            .await
    }

    async fn get_call_session(&self, id: Uuid) -> Result<Option<CallSession>> {
        self.client
            .select_one(SESSION_TABLE, &format!("id=eq.{}", id))
            .await
    }

    async fn list_active_sessions(&self) -> Result<Vec<CallSession>> {
        self.client
            .select(SESSION_TABLE, "status=eq.active&order=started_at.desc")
            .await
    }

    async fn list_recorded_sessions(
        &self,
        patients: Option<&[Uuid]>,
        limit: usize,
    ) -> Result<Vec<CallSession>> {
        let mut filter = format!(
            "recording_url=not.is.null&order=ended_at.desc.nullslast&limit={}",
            limit
        );
        if let Some(ids) = patients {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            filter.push_str(&format!("&patient_id=in.({})", ids.join(",")));
        }
        self.client.select(SESSION_TABLE, &filter).await
    }

    async fn is_family_of(&self, family_id: Uuid, patient_id: Uuid) -> Result<bool> {
        let link: Option<FamilyLink> = self
            .client
            .select_one(
                FAMILY_TABLE,
                &format!(
                    "family_member_id=eq.{}&patient_id=eq.{}&select=family_member_id,patient_id",
                    family_id, patient_id
                ),
            )
            .await?;
        Ok(link.is_some())
    }

    async fn linked_family(&self, patient_id: Uuid) -> Result<Vec<Uuid>> {
        let links: Vec<FamilyLink> = self
            .client
            .select(
                FAMILY_TABLE,
                &format!(
                    "patient_id=eq.{}&select=family_member_id,patient_id",
                    patient_id
                ),
            )
            .await?;
        Ok(links.into_iter().map(|l| l.family_member_id).collect())
    }

    async fn linked_patients(&self, family_id: Uuid) -> Result<Vec<Uuid>> {
        let links: Vec<FamilyLink> = self
            .client
            .select(
                FAMILY_TABLE,
                &format!(
                    "family_member_id=eq.{}&select=family_member_id,patient_id",
                    family_id
                ),
            )
            .await?;
        Ok(links.into_iter().map(|l| l.patient_id).collect())
    }

    async fn has_observation_consent(&self, patient_id: Uuid) -> Result<bool> {
        let row: Option<ConsentRow> = self
            .client
            .select_one(
                USERS_TABLE,
                &format!("id=eq.{}&select=livestream_consent", patient_id),
            )
            .await?;
        Ok(row.is_some_and(|r| r.livestream_consent))
    }
}
