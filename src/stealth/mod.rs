pub mod fingerprint;
pub mod pacing;
pub mod script;
pub mod session;

// Re-export common types
pub use fingerprint::{realistic_headers, Fingerprint, FingerprintProvider, Viewport};
pub use pacing::Pacer;
pub use session::{SessionState, SessionStore};
