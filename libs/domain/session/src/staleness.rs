//! Idle-session detection, shared by the reaper background worker and the
//! "clear stale sessions" operator endpoint.

use breeze_domain_models::session::RemoteSession;
use chrono::{DateTime, Utc};

pub fn is_idle(session: &RemoteSession, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
    session.is_stale(now, idle_timeout)
}

/// Filters a batch of sessions down to the ones a sweep should disconnect.
/// Partner-scope sweeps must pre-filter `candidates` to the caller's
/// `accessibleOrgIds` before calling this — a global sweep across every
/// org is system-scope only.
pub fn stale_sessions<'a>(
    candidates: &'a [RemoteSession],
    now: DateTime<Utc>,
    idle_timeout: chrono::Duration,
) -> Vec<&'a RemoteSession> {
    candidates.iter().filter(|s| is_idle(s, now, idle_timeout)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_domain_models::session::{RemoteSessionStatus, RemoteSessionType};
    use uuid::Uuid;

    fn session_active_since(last_activity_at: DateTime<Utc>) -> RemoteSession {
        RemoteSession {
            id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            kind: RemoteSessionType::Desktop,
            status: RemoteSessionStatus::Active,
            offer: None,
            answer: None,
            ice_candidates: vec![],
            started_at: last_activity_at,
            ended_at: None,
            last_activity_at,
            bytes_transferred: 0,
        }
    }

    #[test]
    fn session_past_idle_timeout_is_stale() {
        let now = Utc::now();
        let session = session_active_since(now - chrono::Duration::minutes(31));
        assert!(is_idle(&session, now, chrono::Duration::minutes(30)));
    }

    #[test]
    fn recently_active_session_is_not_stale() {
        let now = Utc::now();
        let session = session_active_since(now - chrono::Duration::minutes(5));
        assert!(!is_idle(&session, now, chrono::Duration::minutes(30)));
    }

    #[test]
    fn stale_sessions_filters_batch() {
        let now = Utc::now();
        let fresh = session_active_since(now);
        let stale = session_active_since(now - chrono::Duration::hours(1));
        let sessions = [fresh, stale.clone()];
        let result = stale_sessions(&sessions, now, chrono::Duration::minutes(30));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, stale.id);
    }
}
