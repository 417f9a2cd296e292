use chrono::{DateTime, Duration, Utc};

use shared_models::auth::UserRole;

use crate::error::VideoConferencingError;
use crate::models::CapabilityGrant;

/// Maps a participant's role to the media permissions stamped into their
/// token. Holds no state beyond the validity window.
#[derive(Debug, Clone)]
pub struct CapabilityResolver {
    validity: Duration,
}

impl Default for CapabilityResolver {
    fn default() -> Self {
        Self::new(Duration::hours(2))
    }
}

impl CapabilityResolver {
    pub fn new(validity: Duration) -> Self {
        Self { validity }
    }

    pub fn from_minutes(minutes: i64) -> Self {
        Self::new(Duration::minutes(minutes.max(1)))
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// `is_observer` forces the observer row whatever the nominal role.
    pub fn resolve(&self, role: UserRole, is_observer: bool, issued_at: DateTime<Utc>) -> CapabilityGrant {
        let role = if is_observer { UserRole::Family } else { role };

        let (can_publish, can_subscribe, can_publish_data, hidden, room_admin) = match role {
            UserRole::Patient | UserRole::Staff => (true, true, true, false, false),
            UserRole::Family => (false, true, false, true, false),
            UserRole::Admin => (true, true, true, false, true),
        };

        CapabilityGrant {
            role,
            can_publish,
            can_subscribe,
            can_publish_data,
            hidden,
            room_admin,
            room_record: room_admin,
            valid_from: issued_at,
            valid_until: issued_at + self.validity,
        }
    }

    /// Same as [`resolve`](Self::resolve) for a role that arrives as text.
    /// An observer never needs the role string to parse.
    pub fn resolve_named(
        &self,
        role: &str,
        is_observer: bool,
        issued_at: DateTime<Utc>,
    ) -> Result<CapabilityGrant, VideoConferencingError> {
        if is_observer {
            return Ok(self.resolve(UserRole::Family, true, issued_at));
        }

        let role = role
            .parse::<UserRole>()
            .map_err(|e| VideoConferencingError::UnknownRole(e.0))?;
        Ok(self.resolve(role, false, issued_at))
    }
}
