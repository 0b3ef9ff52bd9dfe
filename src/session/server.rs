//! Server-side session state machine (RFC 2326 Appendix A.1, spec §4.8).
//!
//! Replaces the teacher's flat `SessionState { Ready, Playing, Paused }`
//! (play-only) with the full play/record state set and the
//! method-validity table that turns an out-of-state request into a 455
//! rather than silently accepting it.

use crate::error::{Result, RtspError};
use crate::protocol::Method;

/// Server-side session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSessionState {
    /// Session row exists (assigned by the first SETUP) but no media flows.
    Init,
    /// All SETUPs done, PLAY not yet issued (play direction) — RFC calls
    /// this "Ready".
    Ready,
    Playing,
    Paused,
    Recording,
}

impl ServerSessionState {
    /// Whether `method` is valid to receive while in this state
    /// (RFC 2326 Appendix A.1's per-state method table).
    pub fn allows(self, method: Method) -> bool {
        use Method::*;
        use ServerSessionState::*;
        match self {
            Init => matches!(method, Setup | Teardown | GetParameter | SetParameter),
            Ready => matches!(
                method,
                Setup | Play | Record | Teardown | GetParameter | SetParameter
            ),
            Playing => matches!(
                method,
                Play | Pause | Setup | Teardown | GetParameter | SetParameter
            ),
            Paused => matches!(
                method,
                Play | Setup | Teardown | GetParameter | SetParameter
            ),
            Recording => matches!(
                method,
                Record | Pause | Teardown | GetParameter | SetParameter
            ),
        }
    }

    /// Validate `method` against this state, producing the 455 error the
    /// dispatcher turns into a response (spec §4.8, §7).
    pub fn validate(self, method: Method) -> Result<()> {
        if self.allows(method) {
            Ok(())
        } else {
            Err(RtspError::SessionStateViolation {
                method: method.as_str().to_string(),
                state: format!("{self:?}"),
            })
        }
    }

    /// Next state after successfully handling `method`, or `self` if the
    /// method doesn't change session state (e.g. GET_PARAMETER).
    pub fn advance(self, method: Method) -> ServerSessionState {
        use Method::*;
        use ServerSessionState::*;
        match (self, method) {
            (_, Setup) if self == Init => Ready,
            (Ready, Play) | (Paused, Play) => Playing,
            (Ready, Record) => Recording,
            (Playing, Pause) => Paused,
            (Recording, Pause) => Paused,
            (Paused, Record) => Recording,
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_only_allows_setup_and_teardown() {
        assert!(ServerSessionState::Init.allows(Method::Setup));
        assert!(!ServerSessionState::Init.allows(Method::Play));
    }

    #[test]
    fn ready_to_playing_on_play() {
        assert_eq!(
            ServerSessionState::Ready.advance(Method::Play),
            ServerSessionState::Playing
        );
    }

    #[test]
    fn playing_rejects_record() {
        assert!(ServerSessionState::Playing.validate(Method::Record).is_err());
    }

    #[test]
    fn paused_allows_resuming_play() {
        assert!(ServerSessionState::Paused.allows(Method::Play));
        assert_eq!(
            ServerSessionState::Paused.advance(Method::Play),
            ServerSessionState::Playing
        );
    }

    #[test]
    fn recording_pause_and_resume_round_trip() {
        let paused = ServerSessionState::Recording.advance(Method::Pause);
        assert_eq!(paused, ServerSessionState::Paused);
        assert_eq!(paused.advance(Method::Record), ServerSessionState::Recording);
    }
}
