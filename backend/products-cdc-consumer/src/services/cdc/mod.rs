/// CDC (Change Data Capture) consumer for the products table
///
/// Consumes Debezium change events from Kafka, decodes the row images and
/// reports what changed.
///
/// # Architecture
/// - **Transport**: Kafka source behind the `CdcTransport` trait
/// - **Models**: Debezium envelope parsing and row decoding
/// - **Decimal**: packed `DECIMAL` column decoding
/// - **Diff**: field-level diff of before/after images
/// - **Processor**: per-operation handling and the validation hook
/// - **Consumer**: bounded retry per message, then commit
///
/// # Guarantees
/// - Messages are handled one at a time, in delivery order
/// - Every delivered message is committed exactly once, after its outcome is known
/// - A message that fails every attempt is skipped, not redelivered
pub mod consumer;
pub mod decimal;
pub mod diff;
pub mod models;
pub mod processor;
pub mod transport;

pub use consumer::{CdcConsumer, ConsumerErrorState, MessageOutcome};
pub use diff::FieldDiff;
pub use models::{CdcOperation, ChangeEnvelope, DecodedRow, ParsedMessage, RowImage};
pub use processor::{
    AcceptAll, ChangeEventProcessor, ChangeReport, MessageHandler, NameFaultInjector, RowValidator,
};
pub use transport::{CdcTransport, KafkaTransport, PositionToken, RawMessage};
