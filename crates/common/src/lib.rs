//! Common types shared by the platform connection crates

mod error;
mod platform;
mod secret;

pub use error::{Error, Result};
pub use platform::Platform;
pub use secret::Secret;
