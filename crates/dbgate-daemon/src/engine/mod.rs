//! Engine process management: supervision, command channel, framing.

pub mod channel;
pub mod instance;
pub mod supervisor;

pub use channel::CommandChannel;
pub use instance::{ExitInfo, Instance};
pub use supervisor::{Supervisor, SupervisorState};
