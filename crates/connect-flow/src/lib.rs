//! Client-side authorization flow
//!
//! `OAuthFlowController` walks one platform connection through
//! `initiate -> authorize -> callback -> complete`:
//! 1. asks an `AuthorizationBackend` for a state (and PKCE challenge)
//! 2. opens the provider URL in an `AuthorizationWindow` and watches it with
//!    a `PopupMonitor`
//! 3. validates the redirect's `state`, then exchanges the code through a
//!    `TokenExchanger`
//! 4. hands the resulting `TokenRecord` to the refresh coordinator
//!
//! The transitions themselves are the pure `transition` function.

pub mod backend;
pub mod controller;
pub mod error;
pub mod machine;
pub mod window;

pub use backend::{AuthorizationBackend, BackendFuture, HttpAuthorizationBackend};
pub use controller::{FlowCollaborators, FlowOptions, OAuthFlowController};
pub use error::{FlowError, Result};
pub use machine::{CallbackParams, FlowAction, FlowEvent, FlowState, transition};
pub use window::{AuthorizationWindow, PopupMonitor, WindowClosed, WindowHandle};
