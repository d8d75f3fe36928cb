pub mod bridge;
pub mod framing;
pub mod heartbeat;
pub mod protocol;
pub mod sender;
pub mod socket;

pub use sender::AgentSender;
