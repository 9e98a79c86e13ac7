pub mod dag;
pub mod dependency;
pub mod task;

pub use dag::{Constellation, ConstellationState, ConstellationStats};
pub use dependency::Dependency;
pub use task::{Task, TaskStatus, TaskUpdate};
