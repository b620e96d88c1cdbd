pub mod beacon;
pub mod config;

pub use beacon::{Beacon, NeighborEntry};
pub use config::{SchedulerMode, SimConfig};
