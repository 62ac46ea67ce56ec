//! Authorization flow state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `OAuthFlowController` executes the I/O implied by each action and feeds
//! the outcome back in as the next event.
//!
//! ```text
//! Initiate --issued--> Authorize --callback--> Callback --exchanged--> Complete
//!    ^                    |  ^                    |                       |
//!    |                    +--+ window closed      +-- error (retry) ------|-+
//!    +------------------- cancel / revoked --------------------------------+
//! ```

use connect_auth::TokenRecord;
use reqwest::Url;

use crate::error::FlowError;

/// Where one connection attempt stands.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    /// Nothing issued yet, or the last attempt to start failed.
    Initiate { error: Option<FlowError> },
    /// Waiting for the provider to redirect back.
    Authorize {
        auth_url: String,
        state: String,
        error: Option<FlowError>,
    },
    /// Redirect received. `error: None` means validation and exchange are
    /// under way.
    Callback { error: Option<FlowError> },
    /// Connected.
    Complete {
        record: TokenRecord,
        error: Option<FlowError>,
    },
}

impl FlowState {
    pub fn start() -> Self {
        FlowState::Initiate { error: None }
    }

    pub fn error(&self) -> Option<&FlowError> {
        match self {
            FlowState::Initiate { error }
            | FlowState::Authorize { error, .. }
            | FlowState::Callback { error }
            | FlowState::Complete { error, .. } => error.as_ref(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Initiate { .. } => "initiate",
            FlowState::Authorize { .. } => "authorize",
            FlowState::Callback { .. } => "callback",
            FlowState::Complete { .. } => "complete",
        }
    }

    /// State token of the pending attempt, while authorizing.
    pub fn pending_state(&self) -> Option<&str> {
        match self {
            FlowState::Authorize { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Query parameters of the provider's redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    /// QuickBooks company id.
    pub realm_id: Option<String>,
}

impl CallbackParams {
    /// Extract the callback parameters from the redirect URL. Empty values
    /// count as absent.
    pub fn from_redirect_url(url: &str) -> Result<Self, FlowError> {
        let url = Url::parse(url).map_err(|_| FlowError::MissingParameters)?;
        let mut params = CallbackParams::default();
        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            let slot = match &*key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                "realmId" => &mut params.realm_id,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        Ok(params)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// User asked to connect (or retry).
    Initiate,
    AuthorizationIssued { auth_url: String, state: String },
    AuthorizationFailed(FlowError),
    WindowClosed { state: String },
    CallbackReceived(CallbackParams),
    ExchangeSucceeded(TokenRecord),
    CallbackFailed(FlowError),
    Cancel,
    Revoke,
    Revoked,
    RevokeFailed(FlowError),
}

/// I/O the controller performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowAction {
    /// Ask the backend for a new attempt, clearing pending ones first if set.
    BeginAuthorization { clear_previous: bool },
    OpenWindow { auth_url: String, state: String },
    ValidateAndExchange {
        code: String,
        state: String,
        realm_id: Option<String>,
    },
    /// Drop every pending attempt for the platform.
    ClearAuthorization,
    TrackConnection,
    RevokeTokens,
    UntrackTokens,
    None,
}

/// Handle a state transition. Pure function: no I/O.
///
/// Events that make no sense in the current state leave it unchanged.
pub fn transition(state: FlowState, event: FlowEvent) -> (FlowState, FlowAction) {
    match (state, event) {
        // --- Initiate / retry ---
        (FlowState::Initiate { error: None }, FlowEvent::Initiate) => (
            FlowState::start(),
            FlowAction::BeginAuthorization {
                clear_previous: false,
            },
        ),
        // An earlier failure may have left an attempt behind (e.g. a failed clear)
        (FlowState::Initiate { error: Some(_) }, FlowEvent::Initiate)
        | (FlowState::Authorize { .. }, FlowEvent::Initiate)
        | (FlowState::Callback { error: Some(_) }, FlowEvent::Initiate) => (
            FlowState::start(),
            FlowAction::BeginAuthorization {
                clear_previous: true,
            },
        ),

        (FlowState::Initiate { .. }, FlowEvent::AuthorizationIssued { auth_url, state }) => (
            FlowState::Authorize {
                auth_url: auth_url.clone(),
                state: state.clone(),
                error: None,
            },
            FlowAction::OpenWindow { auth_url, state },
        ),
        (FlowState::Initiate { .. }, FlowEvent::AuthorizationFailed(error)) => (
            FlowState::Initiate { error: Some(error) },
            FlowAction::None,
        ),
        // Window refused to open: the issued attempt is useless
        (FlowState::Authorize { .. }, FlowEvent::AuthorizationFailed(error)) => (
            FlowState::Initiate { error: Some(error) },
            FlowAction::ClearAuthorization,
        ),

        // --- Authorize ---
        (
            FlowState::Authorize {
                auth_url,
                state,
                error: None,
            },
            FlowEvent::WindowClosed { state: closed },
        ) if closed == state => (
            FlowState::Authorize {
                auth_url,
                state,
                error: Some(FlowError::WindowClosed),
            },
            FlowAction::None,
        ),

        // --- Callback ---
        (
            FlowState::Initiate { .. } | FlowState::Authorize { .. },
            FlowEvent::CallbackReceived(params),
        ) => match params {
            CallbackParams {
                error: Some(error), ..
            } => (
                FlowState::Callback {
                    error: Some(FlowError::ProviderDenied(error)),
                },
                FlowAction::None,
            ),
            CallbackParams {
                code: Some(code),
                state: Some(state),
                realm_id,
                ..
            } => (
                FlowState::Callback { error: None },
                FlowAction::ValidateAndExchange {
                    code,
                    state,
                    realm_id,
                },
            ),
            _ => (
                FlowState::Callback {
                    error: Some(FlowError::MissingParameters),
                },
                FlowAction::None,
            ),
        },
        (FlowState::Callback { error: None }, FlowEvent::ExchangeSucceeded(record)) => (
            FlowState::Complete {
                record,
                error: None,
            },
            FlowAction::TrackConnection,
        ),
        (FlowState::Callback { error: None }, FlowEvent::CallbackFailed(error)) => (
            FlowState::Callback { error: Some(error) },
            FlowAction::None,
        ),

        // --- Cancel ---
        (
            FlowState::Initiate { .. } | FlowState::Authorize { .. } | FlowState::Callback { .. },
            FlowEvent::Cancel,
        ) => (FlowState::start(), FlowAction::ClearAuthorization),

        // --- Complete ---
        (FlowState::Complete { record, .. }, FlowEvent::Revoke) => (
            FlowState::Complete {
                record,
                error: None,
            },
            FlowAction::RevokeTokens,
        ),
        (FlowState::Complete { .. }, FlowEvent::Revoked) => {
            (FlowState::start(), FlowAction::UntrackTokens)
        }
        (FlowState::Complete { record, .. }, FlowEvent::RevokeFailed(error)) => (
            FlowState::Complete {
                record,
                error: Some(error),
            },
            FlowAction::None,
        ),

        // Stale window events, duplicate callbacks, cancel after completion, ...
        (state, _) => (state, FlowAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Platform;

    fn authorize(state: &str) -> FlowState {
        FlowState::Authorize {
            auth_url: format!("https://provider.example.com/authorize?state={state}"),
            state: state.into(),
            error: None,
        }
    }

    fn complete() -> FlowState {
        FlowState::Complete {
            record: TokenRecord::new(Platform::Xero, "at"),
            error: None,
        }
    }

    fn callback(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> FlowEvent {
        FlowEvent::CallbackReceived(CallbackParams {
            code: code.map(String::from),
            state: state.map(String::from),
            error: error.map(String::from),
            ..CallbackParams::default()
        })
    }

    #[test]
    fn initiate_begins_without_clearing() {
        let (state, action) = transition(FlowState::start(), FlowEvent::Initiate);
        assert_eq!(state, FlowState::start());
        assert_eq!(
            action,
            FlowAction::BeginAuthorization {
                clear_previous: false
            }
        );
    }

    #[test]
    fn reinitiate_while_authorizing_clears_previous_attempt() {
        let (state, action) = transition(authorize("abc"), FlowEvent::Initiate);
        assert_eq!(state, FlowState::start());
        assert_eq!(
            action,
            FlowAction::BeginAuthorization {
                clear_previous: true
            }
        );
    }

    #[test]
    fn retry_after_initiate_failure_clears_first() {
        let failed = FlowState::Initiate {
            error: Some(FlowError::InitiateFailed("state store unavailable".into())),
        };
        let (state, action) = transition(failed, FlowEvent::Initiate);
        assert_eq!(state, FlowState::start());
        assert_eq!(
            action,
            FlowAction::BeginAuthorization {
                clear_previous: true
            }
        );
    }

    #[test]
    fn issued_attempt_opens_window() {
        let (state, action) = transition(
            FlowState::start(),
            FlowEvent::AuthorizationIssued {
                auth_url: "https://p/a".into(),
                state: "abc".into(),
            },
        );
        assert_eq!(state.pending_state(), Some("abc"));
        assert_eq!(
            action,
            FlowAction::OpenWindow {
                auth_url: "https://p/a".into(),
                state: "abc".into()
            }
        );
    }

    #[test]
    fn begin_failure_stays_in_initiate_with_error() {
        let err = FlowError::InitiateFailed("unknown platform".into());
        let (state, action) =
            transition(FlowState::start(), FlowEvent::AuthorizationFailed(err.clone()));
        assert_eq!(state, FlowState::Initiate { error: Some(err) });
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn blocked_window_clears_issued_attempt() {
        let err = FlowError::WindowBlocked("popup blocked".into());
        let (state, action) = transition(authorize("abc"), FlowEvent::AuthorizationFailed(err.clone()));
        assert_eq!(state, FlowState::Initiate { error: Some(err) });
        assert_eq!(action, FlowAction::ClearAuthorization);
    }

    #[test]
    fn window_closed_stays_in_authorize_with_error() {
        let (state, action) = transition(authorize("abc"), FlowEvent::WindowClosed { state: "abc".into() });
        assert_eq!(state.name(), "authorize");
        assert_eq!(state.pending_state(), Some("abc"));
        assert_eq!(state.error(), Some(&FlowError::WindowClosed));
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn stale_window_closed_is_ignored() {
        let (state, _) = transition(authorize("def"), FlowEvent::WindowClosed { state: "abc".into() });
        assert_eq!(state, authorize("def"));

        let (state, _) = transition(complete(), FlowEvent::WindowClosed { state: "abc".into() });
        assert_eq!(state, complete());
    }

    #[test]
    fn callback_with_code_and_state_validates() {
        let (state, action) = transition(authorize("abc"), callback(Some("code-1"), Some("abc"), None));
        assert_eq!(state, FlowState::Callback { error: None });
        assert_eq!(
            action,
            FlowAction::ValidateAndExchange {
                code: "code-1".into(),
                state: "abc".into(),
                realm_id: None
            }
        );
    }

    #[test]
    fn provider_error_wins_over_code() {
        let (state, action) = transition(
            authorize("abc"),
            callback(Some("code-1"), Some("abc"), Some("access_denied")),
        );
        assert_eq!(
            state,
            FlowState::Callback {
                error: Some(FlowError::ProviderDenied("access_denied".into()))
            }
        );
        assert_eq!(action, FlowAction::None);
    }

    #[test]
    fn callback_missing_parameters() {
        for event in [
            callback(Some("code-1"), None, None),
            callback(None, Some("abc"), None),
            callback(None, None, None),
        ] {
            let (state, action) = transition(authorize("abc"), event);
            assert_eq!(
                state,
                FlowState::Callback {
                    error: Some(FlowError::MissingParameters)
                }
            );
            assert_eq!(action, FlowAction::None);
        }
    }

    #[test]
    fn exchange_outcomes() {
        let record = TokenRecord::new(Platform::Xero, "at");
        let (state, action) = transition(
            FlowState::Callback { error: None },
            FlowEvent::ExchangeSucceeded(record.clone()),
        );
        assert_eq!(state, FlowState::Complete { record, error: None });
        assert_eq!(action, FlowAction::TrackConnection);

        let (state, _) = transition(
            FlowState::Callback { error: None },
            FlowEvent::CallbackFailed(FlowError::ValidationExpired),
        );
        assert_eq!(state.error(), Some(&FlowError::ValidationExpired));
    }

    #[test]
    fn failed_callback_can_be_retried() {
        let failed = FlowState::Callback {
            error: Some(FlowError::ExchangeFailed("boom".into())),
        };
        let (state, action) = transition(failed, FlowEvent::Initiate);
        assert_eq!(state, FlowState::start());
        assert_eq!(
            action,
            FlowAction::BeginAuthorization {
                clear_previous: true
            }
        );
    }

    #[test]
    fn in_progress_exchange_ignores_initiate_and_second_callback() {
        let busy = FlowState::Callback { error: None };
        let (state, action) = transition(busy.clone(), FlowEvent::Initiate);
        assert_eq!((state, action), (busy.clone(), FlowAction::None));

        let (state, action) = transition(busy.clone(), callback(Some("c"), Some("s"), None));
        assert_eq!((state, action), (busy, FlowAction::None));
    }

    #[test]
    fn cancel_clears_from_every_non_terminal_state() {
        for state in [
            FlowState::start(),
            authorize("abc"),
            FlowState::Callback {
                error: Some(FlowError::MissingParameters),
            },
        ] {
            let (state, action) = transition(state, FlowEvent::Cancel);
            assert_eq!(state, FlowState::start());
            assert_eq!(action, FlowAction::ClearAuthorization);
        }

        let (state, action) = transition(complete(), FlowEvent::Cancel);
        assert_eq!((state, action), (complete(), FlowAction::None));
    }

    #[test]
    fn revoke_lifecycle() {
        let (state, action) = transition(complete(), FlowEvent::Revoke);
        assert_eq!(state, complete());
        assert_eq!(action, FlowAction::RevokeTokens);

        let err = FlowError::RevocationFailed("503".into());
        let (state, action) = transition(complete(), FlowEvent::RevokeFailed(err.clone()));
        assert_eq!(state.error(), Some(&err));
        assert_eq!(action, FlowAction::None);

        let (state, action) = transition(state, FlowEvent::Revoked);
        assert_eq!(state, FlowState::start());
        assert_eq!(action, FlowAction::UntrackTokens);
    }

    #[test]
    fn initiate_from_complete_is_ignored() {
        let (state, action) = transition(complete(), FlowEvent::Initiate);
        assert_eq!((state, action), (complete(), FlowAction::None));
    }

    #[test]
    fn callback_params_from_redirect() {
        let params = CallbackParams::from_redirect_url(
            "https://dash.example.com/oauth/callback?code=c%2F1&state=abc&realmId=9130&extra=x",
        )
        .unwrap();
        assert_eq!(params.code.as_deref(), Some("c/1"));
        assert_eq!(params.state.as_deref(), Some("abc"));
        assert_eq!(params.realm_id.as_deref(), Some("9130"));
        assert!(params.error.is_none());

        let params = CallbackParams::from_redirect_url(
            "https://dash.example.com/cb?error=access_denied&error_description=User+denied&code=",
        )
        .unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
        assert_eq!(params.error_description.as_deref(), Some("User denied"));
        assert!(params.code.is_none());

        assert_eq!(
            CallbackParams::from_redirect_url("not a url"),
            Err(FlowError::MissingParameters)
        );
    }
}
