pub mod buoy;
pub mod channel;
pub mod error;
pub mod event;
pub mod metrics;
pub mod policy;
pub mod simulator;

pub use buoy::{Buoy, BuoyState};
pub use channel::Channel;
pub use error::SimError;
pub use event::{Event, EventKind, EventQueue, EventTarget};
pub use metrics::{Metrics, TimeSeriesSample};
pub use policy::SchedulerPolicy;
pub use simulator::{Simulator, SimulatorBuilder};
