//! Flow driver
//!
//! `OAuthFlowController` owns one platform's `FlowState`, runs every event
//! through `transition`, and executes the resulting action against its
//! collaborators. An action's outcome is fed back as the next event until
//! the machine settles, so each public method returns the settled state.
//!
//! The popup monitor lives exactly as long as the `authorize` state it was
//! started for: any transition that leaves that state closes the window and
//! aborts the monitor.

use std::sync::Arc;
use std::time::Duration;

use common::Platform;
use connect_auth::{
    BeginOptions, ClientRegistration, Error as AuthError, ExchangeRequest, RevocationExecutor,
    TokenExchanger, Validation, with_timeout,
};
use connect_health::TokenRefreshCoordinator;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::AuthorizationBackend;
use crate::error::FlowError;
use crate::machine::{CallbackParams, FlowAction, FlowEvent, FlowState, transition};
use crate::window::{AuthorizationWindow, PopupMonitor, WindowClosed, WindowHandle};

/// Controller settings.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    pub use_pkce: bool,
    /// Overrides the registration's redirect URI for this flow.
    pub redirect_uri: Option<String>,
    /// Deadline for each backend, exchange and revocation call.
    pub call_timeout: Duration,
    /// How often the popup monitor checks the window.
    pub poll_interval: Duration,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            use_pkce: true,
            redirect_uri: None,
            call_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// External services the controller drives.
#[derive(Clone)]
pub struct FlowCollaborators {
    pub backend: Arc<dyn AuthorizationBackend>,
    pub window: Arc<dyn AuthorizationWindow>,
    pub exchanger: Arc<dyn TokenExchanger>,
    pub revoker: Arc<dyn RevocationExecutor>,
}

struct Popup {
    window: Arc<dyn WindowHandle>,
    monitor: PopupMonitor,
}

/// Drives one platform connection from `initiate` to `complete`.
pub struct OAuthFlowController {
    registration: ClientRegistration,
    options: FlowOptions,
    collaborators: FlowCollaborators,
    coordinator: Option<Arc<TokenRefreshCoordinator>>,
    state: FlowState,
    popup: Option<Popup>,
    window_tx: mpsc::UnboundedSender<WindowClosed>,
    window_rx: mpsc::UnboundedReceiver<WindowClosed>,
}

impl OAuthFlowController {
    pub fn new(
        registration: ClientRegistration,
        collaborators: FlowCollaborators,
        options: FlowOptions,
    ) -> Self {
        let (window_tx, window_rx) = mpsc::unbounded_channel();
        Self {
            registration,
            options,
            collaborators,
            coordinator: None,
            state: FlowState::start(),
            popup: None,
            window_tx,
            window_rx,
        }
    }

    /// Track completed connections for refresh; untrack them on revoke.
    pub fn with_coordinator(mut self, coordinator: Arc<TokenRefreshCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn platform(&self) -> Platform {
        self.registration.platform
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Start (or restart) the connection. A pending attempt is cleared first.
    pub async fn initiate(&mut self) -> &FlowState {
        self.dispatch(FlowEvent::Initiate).await
    }

    /// Handle the provider's redirect parameters.
    pub async fn handle_callback(&mut self, params: CallbackParams) -> &FlowState {
        self.dispatch(FlowEvent::CallbackReceived(params)).await
    }

    /// Handle the provider's redirect URL. An unparseable URL counts as a
    /// callback without parameters.
    pub async fn handle_redirect(&mut self, url: &str) -> &FlowState {
        let params = CallbackParams::from_redirect_url(url).unwrap_or_default();
        self.handle_callback(params).await
    }

    /// Wait for the popup monitor's next report and apply it. Returns
    /// immediately when no popup is open.
    pub async fn next_window_event(&mut self) -> &FlowState {
        if self.popup.is_none() {
            return &self.state;
        }
        match self.window_rx.recv().await {
            Some(WindowClosed { state }) => self.dispatch(FlowEvent::WindowClosed { state }).await,
            None => &self.state,
        }
    }

    /// Apply any monitor reports already queued, without waiting.
    pub async fn process_window_events(&mut self) -> &FlowState {
        while let Ok(WindowClosed { state }) = self.window_rx.try_recv() {
            self.dispatch(FlowEvent::WindowClosed { state }).await;
        }
        &self.state
    }

    /// Abandon the attempt and clear it server-side.
    pub async fn cancel(&mut self) -> &FlowState {
        self.dispatch(FlowEvent::Cancel).await
    }

    /// Revoke the connection's tokens and return to `initiate`.
    pub async fn revoke(&mut self) -> &FlowState {
        self.dispatch(FlowEvent::Revoke).await
    }

    async fn dispatch(&mut self, event: FlowEvent) -> &FlowState {
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let previous = std::mem::replace(&mut self.state, FlowState::start());
            let from = previous.name();
            let (state, action) = transition(previous, event);
            self.state = state;

            let stale_popup = self
                .popup
                .as_ref()
                .is_some_and(|p| self.state.pending_state() != Some(p.monitor.state()));
            if stale_popup {
                self.dispose_popup();
            }

            if from != self.state.name() {
                info!(
                    platform = %self.platform(),
                    from,
                    to = self.state.name(),
                    "flow transition"
                );
            }
            if let Some(error) = self.state.error() {
                debug!(platform = %self.platform(), error = %error, "flow error recorded");
            }

            next = self.execute(action).await;
        }
        &self.state
    }

    async fn execute(&mut self, action: FlowAction) -> Option<FlowEvent> {
        match action {
            FlowAction::None => None,
            FlowAction::BeginAuthorization { clear_previous } => {
                if clear_previous {
                    if let Err(e) = self.clear_pending().await {
                        return Some(FlowEvent::AuthorizationFailed(FlowError::InitiateFailed(
                            format!("could not discard previous attempt: {e}"),
                        )));
                    }
                }
                Some(self.begin().await)
            }
            FlowAction::OpenWindow { auth_url, state } => {
                match self.collaborators.window.open(&auth_url) {
                    Ok(window) => {
                        let monitor = PopupMonitor::spawn(
                            window.clone(),
                            state,
                            self.options.poll_interval,
                            self.window_tx.clone(),
                        );
                        self.popup = Some(Popup { window, monitor });
                        None
                    }
                    Err(e) => {
                        warn!(platform = %self.platform(), error = %e, "authorization window did not open");
                        Some(FlowEvent::AuthorizationFailed(e))
                    }
                }
            }
            FlowAction::ValidateAndExchange {
                code,
                state,
                realm_id,
            } => Some(
                self.validate_and_exchange(&code, &state, realm_id.as_deref())
                    .await,
            ),
            FlowAction::ClearAuthorization => {
                let _ = self.clear_pending().await;
                None
            }
            FlowAction::TrackConnection => {
                if let (Some(coordinator), FlowState::Complete { record, .. }) =
                    (&self.coordinator, &self.state)
                {
                    coordinator.track(record.clone()).await;
                }
                None
            }
            FlowAction::RevokeTokens => Some(self.revoke_tokens().await),
            FlowAction::UntrackTokens => {
                if let Some(coordinator) = &self.coordinator {
                    coordinator.untrack(self.platform()).await;
                }
                None
            }
        }
    }

    fn dispose_popup(&mut self) {
        if let Some(popup) = self.popup.take() {
            if !popup.window.is_closed() {
                popup.window.close();
            }
            debug!(platform = %self.platform(), "popup monitor disposed");
        }
    }

    async fn begin(&self) -> FlowEvent {
        let options = BeginOptions {
            use_pkce: self.options.use_pkce,
            redirect_uri: self.options.redirect_uri.clone(),
        };
        let issued = match with_timeout(
            self.options.call_timeout,
            self.collaborators.backend.begin(self.platform(), options),
            AuthError::Http,
        )
        .await
        {
            Ok(issued) => issued,
            Err(e) => {
                warn!(platform = %self.platform(), error = %e, "could not begin authorization");
                return FlowEvent::AuthorizationFailed(FlowError::InitiateFailed(e.to_string()));
            }
        };

        match self.registration.authorization_url(
            &issued.state,
            issued.code_challenge.as_deref(),
            self.options.redirect_uri.as_deref(),
        ) {
            Ok(auth_url) => FlowEvent::AuthorizationIssued {
                auth_url,
                state: issued.state,
            },
            Err(e) => FlowEvent::AuthorizationFailed(FlowError::InitiateFailed(e.to_string())),
        }
    }

    async fn validate_and_exchange(&self, code: &str, state: &str, realm_id: Option<&str>) -> FlowEvent {
        let platform = self.platform();
        let attempt = match with_timeout(
            self.options.call_timeout,
            self.collaborators.backend.validate(state, platform),
            AuthError::Http,
        )
        .await
        {
            Ok(Validation::Valid(attempt)) => attempt,
            Ok(Validation::Rejected(reason)) => {
                warn!(%platform, reason = reason.code(), "callback state rejected");
                return FlowEvent::CallbackFailed(reason.into());
            }
            Err(e) => {
                warn!(%platform, error = %e, "callback validation failed");
                return FlowEvent::CallbackFailed(FlowError::Backend(e.to_string()));
            }
        };

        let request = ExchangeRequest {
            platform,
            code,
            code_verifier: attempt.code_verifier.as_ref().map(|v| v.expose_str()),
            redirect_uri: attempt
                .redirect_uri
                .as_deref()
                .or(self.options.redirect_uri.as_deref()),
            realm_id,
        };
        match with_timeout(
            self.options.call_timeout,
            self.collaborators.exchanger.exchange(request),
            AuthError::ExchangeFailed,
        )
        .await
        {
            Ok(record) => {
                info!(%platform, "authorization code exchanged");
                FlowEvent::ExchangeSucceeded(record)
            }
            Err(e) => {
                warn!(%platform, error = %e, "token exchange failed");
                FlowEvent::CallbackFailed(FlowError::ExchangeFailed(detail(e)))
            }
        }
    }

    async fn revoke_tokens(&self) -> FlowEvent {
        let platform = self.platform();
        let refresh_token = match &self.state {
            FlowState::Complete { record, .. } => record.refresh_token.clone(),
            _ => None,
        };
        let Some(refresh_token) = refresh_token else {
            info!(%platform, "no refresh token to revoke, disconnecting locally");
            return FlowEvent::Revoked;
        };

        match with_timeout(
            self.options.call_timeout,
            self.collaborators
                .revoker
                .revoke(platform, refresh_token.expose_str()),
            AuthError::RevocationFailed,
        )
        .await
        {
            Ok(()) => {
                info!(%platform, "connection revoked");
                FlowEvent::Revoked
            }
            Err(e) => {
                warn!(%platform, error = %e, "token revocation failed");
                FlowEvent::RevokeFailed(FlowError::RevocationFailed(detail(e)))
            }
        }
    }

    async fn clear_pending(&self) -> Result<usize, AuthError> {
        let platform = self.platform();
        let result = with_timeout(
            self.options.call_timeout,
            self.collaborators.backend.clear(platform),
            AuthError::Http,
        )
        .await;
        match &result {
            Ok(cleared) => debug!(%platform, cleared, "pending attempts cleared"),
            Err(e) => warn!(%platform, error = %e, "could not clear pending attempts"),
        }
        result
    }
}

/// Message of an operation error without its operation prefix.
fn detail(err: AuthError) -> String {
    match err {
        AuthError::ExchangeFailed(msg) | AuthError::RevocationFailed(msg) | AuthError::Http(msg) => msg,
        other => other.to_string(),
    }
}
