use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use video_conferencing_cell::room_name_for;

// ==============================================================================
// QUEUE
// ==============================================================================

/// Lower rank is more urgent. Ordering follows the rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Urgent = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl PriorityTier {
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Multiplier applied to the average session length when estimating waits.
    pub fn wait_factor(self) -> f64 {
        match self {
            PriorityTier::Urgent => 0.5,
            PriorityTier::High => 0.75,
            PriorityTier::Normal => 1.0,
            PriorityTier::Low => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Assigned,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub priority: PriorityTier,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub assigned_to: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(
        patient_id: Uuid,
        priority: PriorityTier,
        reason: Option<String>,
        notes: Option<String>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            priority,
            reason,
            notes,
            enqueued_at,
            status: QueueStatus::Waiting,
            assigned_to: None,
            assigned_at: None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.status == QueueStatus::Waiting
    }

    pub fn assigned(&self, staff_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            status: QueueStatus::Assigned,
            assigned_to: Some(staff_id),
            assigned_at: Some(at),
            ..self.clone()
        }
    }

    pub fn cancelled(&self) -> Self {
        Self {
            status: QueueStatus::Cancelled,
            ..self.clone()
        }
    }
}

/// A waiting entry with its derived rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub position: usize,
    pub estimated_wait_minutes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueListing {
    pub entries: Vec<RankedEntry>,
    pub stats: QueueStats,
}

// ==============================================================================
// SESSIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    pub queue_entry_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub room_name: String,
    #[serde(default)]
    pub is_recording: bool,
    #[serde(default)]
    pub egress_id: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub recording_size_bytes: Option<i64>,
    #[serde(default)]
    pub recording_duration_seconds: Option<i64>,
}

impl CallSession {
    fn start(queue_entry_id: Option<Uuid>, patient_id: Uuid, staff_id: Uuid, at: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            queue_entry_id,
            patient_id,
            staff_id,
            status: SessionStatus::Active,
            started_at: at,
            ended_at: None,
            duration_seconds: None,
            room_name: room_name_for(id),
            is_recording: false,
            egress_id: None,
            recording_url: None,
            recording_size_bytes: None,
            recording_duration_seconds: None,
        }
    }

    pub fn from_entry(entry: &QueueEntry, staff_id: Uuid, at: DateTime<Utc>) -> Self {
        Self::start(Some(entry.id), entry.patient_id, staff_id, at)
    }

    pub fn ad_hoc(patient_id: Uuid, staff_id: Uuid, at: DateTime<Utc>) -> Self {
        Self::start(None, patient_id, staff_id, at)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn involves(&self, identity: Uuid) -> bool {
        self.patient_id == identity || self.staff_id == identity
    }

    /// Terminal copy of this session. `ended_at` is never moved once set.
    pub fn finished(&self, status: SessionStatus, at: DateTime<Utc>) -> Self {
        let ended_at = self.ended_at.unwrap_or(at);
        Self {
            status,
            ended_at: Some(ended_at),
            duration_seconds: Some((ended_at - self.started_at).num_seconds().max(0)),
            ..self.clone()
        }
    }

    /// The stored recording, once the provider has reported one.
    pub fn recording(&self) -> Option<Recording> {
        let url = self.recording_url.clone()?;
        Some(Recording {
            session_id: self.id,
            patient_id: self.patient_id,
            staff_id: self.staff_id,
            egress_id: self.egress_id.clone(),
            url,
            size_bytes: self.recording_size_bytes,
            duration_seconds: self.recording_duration_seconds,
            session_ended_at: self.ended_at,
        })
    }
}

/// Where a finished session's recording ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub session_id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub egress_id: Option<String>,
    pub url: String,
    pub size_bytes: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub session_ended_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct JoinQueueRequest {
    /// Staff may enqueue on a patient's behalf; patients always enqueue themselves.
    pub patient_id: Option<Uuid>,
    #[serde(default)]
    pub priority: PriorityTier,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdHocSessionRequest {
    pub patient_id: Uuid,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionTokenRequest {
    #[serde(default)]
    pub observer: bool,
}
