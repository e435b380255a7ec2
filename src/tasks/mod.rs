pub mod scheduler;
pub mod sensor;

pub use scheduler::{InitError, Scheduler};
pub use sensor::{SensorTask, TaskDescriptor, TaskKind, TaskSlot};
