mod bus;
mod manager;

pub use bus::{BusMessage, StatusBus};
pub use manager::{JobError, JobManager};
