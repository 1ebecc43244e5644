pub mod model;
pub mod scheduler;

pub use model::{AlarmSet, TimeValue, normalize};
pub use scheduler::{NextAlarm, NextAlarmLabels};
