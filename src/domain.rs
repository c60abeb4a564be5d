pub mod events;
pub mod ports;

pub use events::{Event, EventType, InvalidEventType};
pub use ports::{Clock, Record, Store, StoreError, Timer, TimerHandle};
