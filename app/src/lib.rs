pub mod connections;
pub mod preferences;
pub mod session;

pub use connections::ConnectionManager;
pub use preferences::Preferences;
pub use session::{SessionOrchestrator, SessionState};
