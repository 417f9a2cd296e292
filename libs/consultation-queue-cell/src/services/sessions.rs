use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::CallSession;

/// Live call sessions: lookups plus the one-active-session-per-patient
/// index. No ordering semantics.
///
/// Only active sessions are held. A session leaves the registry the moment
/// it ends; the repository remains the record of everything that finished.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, CallSession>,
    active_by_patient: HashMap<Uuid, Uuid>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active_by_patient.len()
    }

    pub fn ensure_patient_free(&self, patient_id: Uuid) -> Result<(), DispatchError> {
        if self.active_by_patient.contains_key(&patient_id) {
            return Err(DispatchError::AlreadyInSession(patient_id));
        }
        Ok(())
    }

    pub fn create(&mut self, session: CallSession) -> Result<&CallSession, DispatchError> {
        if !session.is_active() {
            return Err(DispatchError::SessionClosed(session.id));
        }
        self.ensure_patient_free(session.patient_id)?;
        self.active_by_patient.insert(session.patient_id, session.id);

        let id = session.id;
        Ok(self.sessions.entry(id).or_insert(session))
    }

    /// Stores a newer copy of a session. A terminal copy evicts it.
    pub fn replace(&mut self, session: CallSession) {
        if session.is_active() {
            self.active_by_patient.insert(session.patient_id, session.id);
            self.sessions.insert(session.id, session);
            return;
        }

        if self.active_by_patient.get(&session.patient_id) == Some(&session.id) {
            self.active_by_patient.remove(&session.patient_id);
        }
        self.sessions.remove(&session.id);
    }

    pub fn restore(&mut self, sessions: Vec<CallSession>) -> usize {
        let mut restored = 0;
        for session in sessions.into_iter().filter(CallSession::is_active) {
            let id = session.id;
            match self.create(session) {
                Ok(_) => restored += 1,
                Err(e) => warn!("Skipping session {} during restore: {}", id, e),
            }
        }
        restored
    }

    pub fn get_by_id(&self, session_id: Uuid) -> Result<&CallSession, DispatchError> {
        self.sessions
            .get(&session_id)
            .ok_or_else(|| DispatchError::session_not_found(session_id))
    }

    pub fn get_active_by_patient(&self, patient_id: Uuid) -> Option<&CallSession> {
        self.active_by_patient
            .get(&patient_id)
            .and_then(|id| self.sessions.get(id))
    }

    pub fn get_active_by_staff(&self, staff_id: Uuid) -> Vec<&CallSession> {
        let mut sessions: Vec<&CallSession> = self
            .sessions
            .values()
            .filter(|s| s.staff_id == staff_id)
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    /// Active sessions, most recently started first.
    pub fn list_active(&self) -> Vec<CallSession> {
        let mut sessions: Vec<CallSession> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    pub fn find_by_room(&self, room_name: &str) -> Option<&CallSession> {
        self.sessions.values().find(|s| s.room_name == room_name)
    }

    pub fn find_by_egress(&self, egress_id: &str) -> Option<&CallSession> {
        self.sessions
            .values()
            .find(|s| s.egress_id.as_deref() == Some(egress_id))
    }
}
