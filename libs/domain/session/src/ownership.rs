//! Who may act on a remote session, by message kind and caller identity.

use breeze_domain_models::error::ApiError;
use breeze_domain_models::session::{RemoteSession, SignalingMessage};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    User(Uuid),
    /// The device's own agent, authenticated via its bearer token.
    Agent,
}

/// Only the owning user may post offer/answer/ice/end; the session's own
/// agent may post progress (file-transfer chunks) but must never be able to
/// mutate the user-owned signaling fields.
pub fn authorize_signal(session: &RemoteSession, caller: Caller, message: &SignalingMessage) -> Result<(), ApiError> {
    match (caller, message) {
        (Caller::User(user_id), _) if session.owned_by(user_id) => Ok(()),
        (Caller::Agent, SignalingMessage::Progress { .. }) => Ok(()),
        _ => Err(ApiError::forbidden("caller does not own this session")),
    }
}

/// Any caller with org access over the session's `orgId` may read it;
/// the accessible-org check itself is performed by `breeze-domain-auth`'s
/// `require_org_access` before this is reached.
pub fn can_read(_session: &RemoteSession) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use breeze_domain_models::session::{IceCandidate, RemoteSessionStatus, RemoteSessionType};
    use chrono::Utc;

    fn sample_session(user_id: Uuid) -> RemoteSession {
        RemoteSession {
            id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            user_id,
            org_id: Uuid::new_v4(),
            kind: RemoteSessionType::Terminal,
            status: RemoteSessionStatus::Active,
            offer: None,
            answer: None,
            ice_candidates: vec![],
            started_at: Utc::now(),
            ended_at: None,
            last_activity_at: Utc::now(),
            bytes_transferred: 0,
        }
    }

    #[test]
    fn owning_user_may_post_offer() {
        let user = Uuid::new_v4();
        let session = sample_session(user);
        let msg = SignalingMessage::Offer { sdp: "v=0".into() };
        assert!(authorize_signal(&session, Caller::User(user), &msg).is_ok());
    }

    #[test]
    fn other_user_may_not_post_offer() {
        let session = sample_session(Uuid::new_v4());
        let msg = SignalingMessage::Offer { sdp: "v=0".into() };
        assert!(authorize_signal(&session, Caller::User(Uuid::new_v4()), &msg).is_err());
    }

    #[test]
    fn agent_may_post_progress_but_not_offer() {
        let session = sample_session(Uuid::new_v4());
        let progress = SignalingMessage::Progress { bytes_transferred: 1024 };
        assert!(authorize_signal(&session, Caller::Agent, &progress).is_ok());

        let offer = SignalingMessage::Offer { sdp: "v=0".into() };
        assert!(authorize_signal(&session, Caller::Agent, &offer).is_err());
    }

    #[test]
    fn agent_may_not_post_ice_candidates() {
        let session = sample_session(Uuid::new_v4());
        let ice = SignalingMessage::Ice {
            candidate: IceCandidate {
                candidate: "candidate:1".into(),
                sdp_mid: None,
                sdp_mline_index: None,
            },
        };
        assert!(authorize_signal(&session, Caller::Agent, &ice).is_err());
    }
}
