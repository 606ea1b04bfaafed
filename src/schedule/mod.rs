mod scheduler;
mod trigger;

pub use scheduler::{JobHandler, Scheduler};
pub use trigger::{generate_trigger, TriggerExpression, TriggerField, FIELD_COUNT};
