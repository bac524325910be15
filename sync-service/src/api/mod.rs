pub mod client;
pub mod error;
pub mod session;

pub use client::{HttpMeteringApi, MeteringApi};
pub use error::{ApiError, AuthError};
pub use session::SessionManager;
