use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::{PriorityTier, QueueEntry, QueueStats, RankedEntry};

struct Slot {
    /// Insertion counter; breaks ties between identical timestamps.
    seq: u64,
    entry: QueueEntry,
}

/// Waiting entries only. Rank is derived on every read, never stored.
pub struct QueueStore {
    slots: HashMap<Uuid, Slot>,
    by_patient: HashMap<Uuid, Uuid>,
    next_seq: u64,
    average_session_minutes: u32,
}

impl QueueStore {
    pub fn new(average_session_minutes: u32) -> Self {
        Self {
            slots: HashMap::new(),
            by_patient: HashMap::new(),
            next_seq: 0,
            average_session_minutes,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ensure_not_waiting(&self, patient_id: Uuid) -> Result<(), DispatchError> {
        if self.by_patient.contains_key(&patient_id) {
            return Err(DispatchError::AlreadyWaiting(patient_id));
        }
        Ok(())
    }

    pub fn enqueue(
        &mut self,
        patient_id: Uuid,
        priority: PriorityTier,
        reason: Option<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DispatchError> {
        self.ensure_not_waiting(patient_id)?;
        let entry = QueueEntry::new(patient_id, priority, reason, notes, now);
        self.insert(entry.clone())?;
        Ok(entry)
    }

    /// Adds an already-built waiting entry.
    pub fn insert(&mut self, entry: QueueEntry) -> Result<(), DispatchError> {
        self.ensure_not_waiting(entry.patient_id)?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_patient.insert(entry.patient_id, entry.id);
        self.slots.insert(entry.id, Slot { seq, entry });
        Ok(())
    }

    /// Loads persisted waiting entries. Extra entries for a patient who is
    /// already present are skipped, keeping the earliest one.
    pub fn restore(&mut self, mut entries: Vec<QueueEntry>) -> usize {
        entries.retain(QueueEntry::is_waiting);
        entries.sort_by_key(|e| e.enqueued_at);

        let mut restored = 0;
        for entry in entries {
            let id = entry.id;
            match self.insert(entry) {
                Ok(()) => restored += 1,
                Err(e) => warn!("Skipping queue entry {} during restore: {}", id, e),
            }
        }
        restored
    }

    pub fn get(&self, entry_id: Uuid) -> Option<&QueueEntry> {
        self.slots.get(&entry_id).map(|slot| &slot.entry)
    }

    pub fn entry_for_patient(&self, patient_id: Uuid) -> Option<&QueueEntry> {
        self.by_patient.get(&patient_id).and_then(|id| self.get(*id))
    }

    pub fn remove(&mut self, entry_id: Uuid) -> Result<QueueEntry, DispatchError> {
        let slot = self
            .slots
            .remove(&entry_id)
            .ok_or_else(|| DispatchError::entry_not_found(entry_id))?;
        self.by_patient.remove(&slot.entry.patient_id);
        debug!("Removed queue entry {}", entry_id);
        Ok(slot.entry)
    }

    fn ordered(&self) -> Vec<&Slot> {
        let mut slots: Vec<&Slot> = self.slots.values().collect();
        slots.sort_by(|a, b| {
            (a.entry.priority, a.entry.enqueued_at, a.seq).cmp(&(
                b.entry.priority,
                b.entry.enqueued_at,
                b.seq,
            ))
        });
        slots
    }

    /// Waiting entries by (tier, enqueue time).
    pub fn list(&self) -> Vec<QueueEntry> {
        self.ordered().into_iter().map(|slot| slot.entry.clone()).collect()
    }

    pub fn head(&self) -> Option<QueueEntry> {
        self.slots
            .values()
            .min_by_key(|slot| (slot.entry.priority, slot.entry.enqueued_at, slot.seq))
            .map(|slot| slot.entry.clone())
    }

    pub fn ranked(&self) -> Vec<RankedEntry> {
        self.ordered()
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                let position = index + 1;
                RankedEntry {
                    entry: slot.entry.clone(),
                    position,
                    estimated_wait_minutes: self.estimated_wait(position, slot.entry.priority),
                }
            })
            .collect()
    }

    /// 1-based rank of the patient's waiting entry.
    pub fn position_of(&self, patient_id: Uuid) -> Result<usize, DispatchError> {
        let entry_id = self
            .by_patient
            .get(&patient_id)
            .ok_or_else(|| DispatchError::NotFound(format!("Waiting entry for patient {}", patient_id)))?;

        self.ordered()
            .iter()
            .position(|slot| slot.entry.id == *entry_id)
            .map(|index| index + 1)
            .ok_or_else(|| DispatchError::entry_not_found(*entry_id))
    }

    pub fn ranked_for_patient(&self, patient_id: Uuid) -> Result<RankedEntry, DispatchError> {
        let position = self.position_of(patient_id)?;
        let entry = self
            .entry_for_patient(patient_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("Waiting entry for patient {}", patient_id)))?;

        Ok(RankedEntry {
            estimated_wait_minutes: self.estimated_wait(position, entry.priority),
            entry,
            position,
        })
    }

    /// Heuristic only: position x average session length x tier factor.
    pub fn estimated_wait(&self, position: usize, priority: PriorityTier) -> u32 {
        let minutes = position as f64 * f64::from(self.average_session_minutes) * priority.wait_factor();
        minutes as u32
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.slots.len(),
            ..Default::default()
        };
        for slot in self.slots.values() {
            match slot.entry.priority {
                PriorityTier::Urgent => stats.urgent += 1,
                PriorityTier::High => stats.high += 1,
                PriorityTier::Normal => stats.normal += 1,
                PriorityTier::Low => stats.low += 1,
            }
        }
        stats
    }
}
