mod heartbeat;
mod sweep;

pub(crate) use heartbeat::HEARTBEAT_VALUE;
pub use heartbeat::HeartbeatTask;
pub use sweep::SweepTask;
