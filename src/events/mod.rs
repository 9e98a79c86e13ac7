pub mod bus;
pub mod types;

pub use bus::{EventBus, EventObserver};
pub use types::{ConstellationEvent, Event, EventEnvelope, EventType, SubscriptionFilter, TaskEvent};
