use crate::StatusError;
use boxdeck_schema::ComponentState;

pub fn validate_transition(from: ComponentState, to: ComponentState) -> Result<(), StatusError> {
    use ComponentState::{Degraded, Failed, Installing, Running, Stopped, Stopping, Unknown};

    let valid = from == to
        || matches!(
            (from, to),
            (Unknown, _)
                | (
                    Installing,
                    Running | Degraded | Stopping | Stopped | Failed
                )
                | (Running, Degraded | Stopping | Stopped | Failed)
                | (Degraded, Running | Stopping | Stopped | Failed)
                | (Stopping, Stopped | Failed)
                | (Stopped, Installing | Running)
                | (Failed, Installing | Stopping | Stopped)
        );

    if valid {
        Ok(())
    } else {
        Err(StatusError::InvalidTransition { from, to })
    }
}
