mod broadcast;
mod connection;
mod presence;
mod registry;
mod session;

pub use broadcast::FanOut;
pub use connection::{Connection, ConnectionId, ConnectionState, Outbound};
pub use presence::PresenceTable;
pub use registry::{ReapOutcome, RelayStats, SessionHook, SessionRegistry};
pub use session::DocumentSession;
