mod entity;
mod habit;
mod journal;
mod kind;
mod task;
mod workout;

pub use entity::{Entity, Syncable};
pub use habit::{Frequency, Habit};
pub use journal::JournalEntry;
pub use kind::EntityKind;
pub use task::{Priority, Task};
pub use workout::{Exercise, WorkoutDay};
