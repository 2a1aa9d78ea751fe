use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::diff::{self, FieldDiff};
use super::models::{decode_id, CdcOperation, ChangeEnvelope, DecodedRow, ParsedMessage};
use super::transport::RawMessage;
use crate::error::{AppError, Result};

/// Business-rule check applied to every decoded `after` row.
pub trait RowValidator: Send + Sync {
    fn validate(&self, row: &DecodedRow) -> std::result::Result<(), String>;
}

/// Fails any row whose name contains "fail" (case-insensitive).
///
/// Lets a producer drive the retry path on demand by writing such a row.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameFaultInjector;

impl RowValidator for NameFaultInjector {
    fn validate(&self, row: &DecodedRow) -> std::result::Result<(), String> {
        if row.name.to_lowercase().contains("fail") {
            return Err(format!("simulated failure due to name '{}'", row.name));
        }
        Ok(())
    }
}

/// Accepts every row.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl RowValidator for AcceptAll {
    fn validate(&self, _row: &DecodedRow) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// What a successfully handled change amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeReport {
    Created(DecodedRow),
    /// `changes` is `None` when the connector sent no `before` image
    Updated {
        row: DecodedRow,
        changes: Option<Vec<FieldDiff>>,
    },
    SnapshotRead {
        row: DecodedRow,
        snapshot: bool,
    },
    Deleted {
        id: i64,
    },
    /// Delete without a `before` image (e.g. REPLICA IDENTITY NOTHING)
    DeleteWithoutBefore,
    Unhandled(CdcOperation),
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeReport::Created(row) => write!(f, "Created {}", row_summary(row)),
            ChangeReport::Updated { row, changes } => {
                write!(f, "Updated {}", row_summary(row))?;
                match changes {
                    Some(changes) if changes.is_empty() => write!(f, "; no field changes"),
                    Some(changes) => write!(f, "; changed {}", diff::summarize(changes)),
                    None => write!(f, "; previous state unavailable"),
                }
            }
            ChangeReport::SnapshotRead { row, snapshot } => {
                write!(f, "Read {} (snapshot: {})", row_summary(row), snapshot)
            }
            ChangeReport::Deleted { id } => write!(f, "Deleted id: {}", id),
            ChangeReport::DeleteWithoutBefore => write!(f, "Delete event without before image"),
            ChangeReport::Unhandled(op) => write!(f, "Unhandled {} event", op),
        }
    }
}

fn row_summary(row: &DecodedRow) -> String {
    format!("id: {}, name: {}, price: {}", row.id, row.name, row.price)
}

/// One processing attempt for a delivered message.
///
/// Called at most once per attempt; an `Err` makes the message eligible
/// for another attempt.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &RawMessage) -> Result<()>;
}

/// Decodes product change events and reports what changed.
#[derive(Clone)]
pub struct ChangeEventProcessor {
    validator: Arc<dyn RowValidator>,
}

impl Default for ChangeEventProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeEventProcessor {
    /// Processor with the name-based fault injector installed.
    pub fn new() -> Self {
        Self::with_validator(NameFaultInjector)
    }

    pub fn with_validator(validator: impl RowValidator + 'static) -> Self {
        Self {
            validator: Arc::new(validator),
        }
    }

    pub fn process(&self, envelope: &ChangeEnvelope) -> Result<ChangeReport> {
        if let Some(after) = &envelope.after {
            let row = DecodedRow::from_image(after)?;
            self.validator.validate(&row).map_err(AppError::Validation)?;

            return Ok(match envelope.operation {
                CdcOperation::Update => ChangeReport::Updated {
                    changes: envelope
                        .before
                        .as_ref()
                        .map(|before| diff::diff(before, after)),
                    row,
                },
                CdcOperation::Create => ChangeReport::Created(row),
                CdcOperation::Read => ChangeReport::SnapshotRead {
                    row,
                    snapshot: envelope.is_snapshot,
                },
                op => ChangeReport::Unhandled(op),
            });
        }

        match (envelope.operation, &envelope.before) {
            (CdcOperation::Delete, Some(before)) => Ok(ChangeReport::Deleted {
                id: decode_id(before)?,
            }),
            (CdcOperation::Delete, None) => Ok(ChangeReport::DeleteWithoutBefore),
            (op, _) => Ok(ChangeReport::Unhandled(op)),
        }
    }
}

#[async_trait]
impl MessageHandler for ChangeEventProcessor {
    async fn handle(&self, message: &RawMessage) -> Result<()> {
        debug!(
            position = %message.position,
            body = %String::from_utf8_lossy(message.payload.as_deref().unwrap_or_default()),
            "Message received"
        );

        let envelope = match ChangeEnvelope::parse(message.payload.as_deref())? {
            ParsedMessage::Skip => {
                debug!(position = %message.position, "Empty payload, nothing to process");
                return Ok(());
            }
            ParsedMessage::Change(envelope) => envelope,
        };

        let report = self.process(&envelope)?;
        info!(
            position = %message.position,
            op = %envelope.operation,
            table = envelope.table.as_deref().unwrap_or("-"),
            "{}",
            report
        );
        Ok(())
    }
}
