pub mod connector;
pub mod envelope;

pub use connector::{QueueConnector, QueueDelivery};
pub use envelope::{validate_queue_message, AutoMessageEnvelope, MessageHeaders, QueueEnvelope};
