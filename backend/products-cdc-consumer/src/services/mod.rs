pub mod cdc;

pub use cdc::{CdcConsumer, ChangeEventProcessor, KafkaTransport};
