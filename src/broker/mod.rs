pub mod engine;
pub mod queue;

pub use engine::{InMemoryBroker, InMemoryReceiver, InMemorySender};
