use serde_json::{json, Value};

use crate::error::{ClientError, Result};
use crate::message::{Envelope, OutboundMessage};

/// The closed catalogue of actions the instrumented application understands.
///
/// Each kind pairs a request type string with the set of response types that
/// resolve it. The catalogue is data on this enum, not a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Login,
    IsReady,
    ReloadReactNative,
    DeliverPayload,
    SetSyncSettings,
    Shake,
    SetOrientation,
    SetInstrumentsRecordingState,
    CaptureViewHierarchy,
    WaitForBackground,
    WaitForActive,
    Cleanup,
    CurrentStatus,
}

impl ActionKind {
    pub const fn request_type(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::IsReady => "isReady",
            Self::ReloadReactNative => "reactNativeReload",
            Self::DeliverPayload => "deliverPayload",
            Self::SetSyncSettings => "setSyncSettings",
            Self::Shake => "shakeDevice",
            Self::SetOrientation => "setOrientation",
            Self::SetInstrumentsRecordingState => "setRecordingState",
            Self::CaptureViewHierarchy => "captureViewHierarchy",
            Self::WaitForBackground => "waitForBackground",
            Self::WaitForActive => "waitForActive",
            Self::Cleanup => "cleanup",
            Self::CurrentStatus => "currentStatus",
        }
    }

    pub const fn expected_responses(self) -> &'static [&'static str] {
        match self {
            Self::Login => &["loginSuccess"],
            Self::IsReady | Self::ReloadReactNative => &["ready"],
            Self::DeliverPayload => &["deliverPayloadDone"],
            Self::SetSyncSettings => &["setSyncSettingsDone"],
            Self::Shake => &["shakeDeviceDone"],
            Self::SetOrientation => &["setOrientationDone"],
            Self::SetInstrumentsRecordingState => &["setRecordingStateDone"],
            Self::CaptureViewHierarchy => &["captureViewHierarchyDone"],
            Self::WaitForBackground => &["waitForBackgroundDone"],
            Self::WaitForActive => &["waitForActiveDone"],
            // The app may drop off the relay instead of acknowledging; both
            // are terminal successes for a cleanup.
            Self::Cleanup => &["cleanupDone", "appDisconnected"],
            Self::CurrentStatus => &["currentStatusResult"],
        }
    }
}

/// An action ready to be sent: a kind plus its request params.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub params: Value,
}

impl Action {
    fn bare(kind: ActionKind) -> Self {
        Self {
            kind,
            params: json!({}),
        }
    }

    pub fn login(session_id: &str) -> Self {
        Self {
            kind: ActionKind::Login,
            params: json!({ "sessionId": session_id }),
        }
    }

    pub fn is_ready() -> Self {
        Self::bare(ActionKind::IsReady)
    }

    pub fn reload_react_native() -> Self {
        Self::bare(ActionKind::ReloadReactNative)
    }

    pub fn deliver_payload(params: Value) -> Self {
        Self {
            kind: ActionKind::DeliverPayload,
            params,
        }
    }

    pub fn set_sync_settings(params: Value) -> Self {
        Self {
            kind: ActionKind::SetSyncSettings,
            params,
        }
    }

    pub fn shake() -> Self {
        Self::bare(ActionKind::Shake)
    }

    pub fn set_orientation(params: Value) -> Self {
        Self {
            kind: ActionKind::SetOrientation,
            params,
        }
    }

    pub fn set_recording_state(params: Value) -> Self {
        Self {
            kind: ActionKind::SetInstrumentsRecordingState,
            params,
        }
    }

    pub fn capture_view_hierarchy(params: Value) -> Self {
        Self {
            kind: ActionKind::CaptureViewHierarchy,
            params,
        }
    }

    pub fn wait_for_background() -> Self {
        Self::bare(ActionKind::WaitForBackground)
    }

    pub fn wait_for_active() -> Self {
        Self::bare(ActionKind::WaitForActive)
    }

    pub fn cleanup(stop_runner: bool) -> Self {
        Self {
            kind: ActionKind::Cleanup,
            params: json!({ "stopRunner": stop_runner }),
        }
    }

    pub fn current_status() -> Self {
        Self::bare(ActionKind::CurrentStatus)
    }

    /// The outbound request, prior to correlation-id assignment.
    pub fn request(&self) -> OutboundMessage {
        OutboundMessage {
            kind: self.kind.request_type().to_string(),
            params: self.params.clone(),
            message_id: None,
        }
    }

    /// Whether the given response type resolves this action.
    pub fn accepts(&self, response_type: &str) -> bool {
        self.kind.expected_responses().contains(&response_type)
    }

    /// Transform an accepted response envelope into the caller's result.
    pub fn handle(&self, response: Envelope) -> Result<Value> {
        match self.kind {
            ActionKind::CaptureViewHierarchy => {
                if let Some(message) = response
                    .params
                    .get("captureViewHierarchyError")
                    .and_then(Value::as_str)
                {
                    return Err(ClientError::ViewHierarchy(message.to_string()));
                }
                Ok(response.params)
            }
            _ => Ok(response.params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_pairs_request_and_response_types() {
        assert_eq!(ActionKind::Login.request_type(), "login");
        assert_eq!(ActionKind::Login.expected_responses(), &["loginSuccess"]);
        assert_eq!(ActionKind::ReloadReactNative.request_type(), "reactNativeReload");
        assert_eq!(ActionKind::ReloadReactNative.expected_responses(), &["ready"]);
        assert_eq!(
            ActionKind::SetInstrumentsRecordingState.request_type(),
            "setRecordingState"
        );
    }

    #[test]
    fn cleanup_accepts_either_terminal_response() {
        let action = Action::cleanup(true);
        assert!(action.accepts("cleanupDone"));
        assert!(action.accepts("appDisconnected"));
        assert!(!action.accepts("ready"));
        assert_eq!(action.params, json!({ "stopRunner": true }));
    }

    #[test]
    fn view_hierarchy_error_param_raises() {
        let action = Action::capture_view_hierarchy(json!({}));
        let response = Envelope {
            kind: "captureViewHierarchyDone".to_string(),
            params: json!({ "captureViewHierarchyError": "no window" }),
            message_id: 5,
        };
        let err = action.handle(response).unwrap_err();
        assert!(err.to_string().contains("no window"));

        let response = Envelope {
            kind: "captureViewHierarchyDone".to_string(),
            params: json!({ "path": "/tmp/hierarchy.viewhierarchy" }),
            message_id: 6,
        };
        let params = action.handle(response).unwrap();
        assert_eq!(params["path"], "/tmp/hierarchy.viewhierarchy");
    }
}
