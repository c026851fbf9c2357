pub mod availability;
pub mod config;
pub mod service;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use availability::{gate, Availability, GateView, Notice, UnavailableReason};
pub use config::Config;
pub use service::{ModelService, OllamaService, ServiceError};
pub use session::{ChatSession, SessionPhase, SessionStatus, FALLBACK_REPLY};
pub use state::{ChatMessage, ChatRole};
