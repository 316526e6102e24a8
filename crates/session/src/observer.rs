use utter_engine::RunState;

use crate::capture::StopCause;
use crate::magnitude::MagnitudeState;
use crate::EndReason;

/// Lifecycle callbacks a session emits toward its caller.
///
/// All methods default to no-ops so callers implement only what they
/// render. Callbacks are invoked from the session task; partial-result and
/// status events arrive in the order the engine produced them.
pub trait SessionObserver: Send + Sync {
    fn on_loading(&self) {}

    fn on_need_permission(&self) {}

    fn on_permission_rejected(&self) {}

    fn on_recording_started(&self) {}

    fn on_magnitude(&self, _value: f32, _state: MagnitudeState) {}

    fn on_partial_result(&self, _text: String) {}

    fn on_status(&self, _state: RunState) {}

    fn on_processing_started(&self, _cause: StopCause) {}

    fn on_finished(&self, _text: String) {}

    fn on_ended(&self, _reason: EndReason) {}
}
