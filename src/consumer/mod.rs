pub mod events;
pub mod stats;
pub mod worker;

pub use stats::ConsumerStats;
pub use worker::MessageConsumer;
