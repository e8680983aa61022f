//! Message type to handler routing table

use crate::arms::{ENVIRONMENT_ARM, MEMORY_ARM, PLAN_ARM, REASON_ARM};
use sdk::MessageKind;

use super::SPIRAL_HANDLER;

/// Where a message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A registered arm, by name
    Arm(&'static str),
    /// The spiral protocol service
    Spiral,
}

impl Route {
    pub fn handler_name(&self) -> &'static str {
        match self {
            Route::Arm(name) => *name,
            Route::Spiral => SPIRAL_HANDLER,
        }
    }
}

/// Pick the handler for `kind`
///
/// Response kinds and unknown kinds have no route.
pub fn route(kind: &MessageKind) -> Option<Route> {
    match kind {
        MessageKind::Goal => Some(Route::Arm(PLAN_ARM)),
        MessageKind::MemoryRequest => Some(Route::Arm(MEMORY_ARM)),
        MessageKind::ReasoningRequest => Some(Route::Arm(REASON_ARM)),
        MessageKind::EnvironmentRequest => Some(Route::Arm(ENVIRONMENT_ARM)),
        MessageKind::SpiralProtocol => Some(Route::Spiral),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kinds_route() {
        assert_eq!(route(&MessageKind::Goal), Some(Route::Arm("plan_arm")));
        assert_eq!(route(&MessageKind::MemoryRequest), Some(Route::Arm("memory_arm")));
        assert_eq!(route(&MessageKind::ReasoningRequest), Some(Route::Arm("reason_arm")));
        assert_eq!(
            route(&MessageKind::EnvironmentRequest),
            Some(Route::Arm("environment_arm"))
        );
        assert_eq!(route(&MessageKind::SpiralProtocol), Some(Route::Spiral));
    }

    #[test]
    fn test_responses_and_unknown_do_not_route() {
        assert_eq!(route(&MessageKind::GoalResponse), None);
        assert_eq!(route(&MessageKind::from("unknown_type")), None);
    }
}
