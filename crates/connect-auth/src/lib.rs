//! Server-side OAuth authorization state and token endpoint access
//!
//! Provides the pieces needed to connect a dashboard account to an external
//! platform:
//! 1. `AuthorizationStateService::begin_authorization()` issues a state token
//!    (and PKCE challenge) and stores the attempt with a 10 minute TTL
//! 2. The client builds the provider URL via `ClientRegistration::authorization_url()`
//! 3. On callback, `validate_authorization()` consumes the attempt exactly once
//!    and releases the PKCE verifier
//! 4. A `TokenExchanger` (e.g. `TokenClient`) trades the code for a `TokenRecord`
//! 5. A `RefreshExecutor` keeps the record fresh; a `RevocationExecutor` ends it

pub mod client;
pub mod error;
pub mod executor;
pub mod pkce;
pub mod registration;
pub mod state;
pub mod store;
pub mod token;

pub use client::TokenClient;
pub use error::{Error, Result};
pub use executor::{
    CallFuture, ExchangeRequest, RefreshExecutor, RevocationExecutor, TokenExchanger, with_timeout,
};
pub use pkce::{compute_challenge, generate_state, generate_verifier};
pub use registration::{ClientAuth, ClientRegistration, PlatformEndpoints, endpoints};
pub use state::{
    AuthorizationAttempt, AuthorizationStateService, BeginOptions, BeginResponse, RejectReason,
    ValidatedAttempt, Validation,
};
pub use store::{DEFAULT_STATE_TTL, MemoryStateStore, StateStore, SweeperHandle, Take, spawn_sweeper};
pub use token::{META_ACCOUNT_NAME, META_REALM_ID, TokenRecord, TokenResponse, parse_scopes, unix_now};
