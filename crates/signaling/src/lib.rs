mod channels;
mod config;
mod coordinator;
mod message;

pub use channels::{meeting_channel, split_meeting_channel};
pub use config::SignalingConfig;
pub use coordinator::{ConnState, SignalingCoordinator};
pub use message::{MessageKind, SignalingMessage};
