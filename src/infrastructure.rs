pub mod clock;
pub mod memory_store;
pub mod tokio_timer;

pub use clock::SystemClock;
pub use memory_store::InMemoryStore;
pub use tokio_timer::TokioTimer;
