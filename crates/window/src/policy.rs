//! Retention policies.

use eddy_core::{Error, EventType, Result};
use serde::Deserialize;

/// How a window retains the events of its stream.
///
/// Spans are in milliseconds of logical time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Every event stays visible.
    #[default]
    KeepAll,
    /// The most recent `size` events stay visible.
    Length { size: usize },
    /// Events are released together once `size` have accumulated.
    LengthBatch { size: usize },
    /// Each event stays visible for `span_ms` after its arrival.
    Time { span_ms: i64 },
    /// Like `Time`, but driven by a timestamp field of the event.
    ExternallyTimed { field: String, span_ms: i64 },
    /// Events are released together at every `span_ms` boundary.
    TimeBatch { span_ms: i64 },
}

impl WindowPolicy {
    /// Returns whether the policy depends on logical time.
    pub fn is_time_based(&self) -> bool {
        matches!(
            self,
            WindowPolicy::Time { .. }
                | WindowPolicy::ExternallyTimed { .. }
                | WindowPolicy::TimeBatch { .. }
        )
    }

    /// Returns whether the policy releases events in batches.
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            WindowPolicy::LengthBatch { .. } | WindowPolicy::TimeBatch { .. }
        )
    }

    /// Checks the policy against the schema of the stream it retains.
    pub fn validate(&self, schema: &EventType) -> Result<()> {
        match self {
            WindowPolicy::KeepAll => Ok(()),
            WindowPolicy::Length { size } | WindowPolicy::LengthBatch { size } => {
                if *size == 0 {
                    return Err(Error::config(format!(
                        "window size for stream '{}' must be positive",
                        schema.name()
                    )));
                }
                Ok(())
            }
            WindowPolicy::Time { span_ms } | WindowPolicy::TimeBatch { span_ms } => {
                check_span(*span_ms, schema)
            }
            WindowPolicy::ExternallyTimed { field, span_ms } => {
                check_span(*span_ms, schema)?;
                let ty = schema
                    .field_type(field)
                    .ok_or_else(|| Error::unknown_field(schema.name(), field.as_str()))?;
                if !ty.is_temporal() {
                    return Err(Error::config(format!(
                        "timestamp field '{}' of '{}' must be an integer or datetime, found {:?}",
                        field,
                        schema.name(),
                        ty
                    )));
                }
                Ok(())
            }
        }
    }
}

fn check_span(span_ms: i64, schema: &EventType) -> Result<()> {
    if span_ms <= 0 {
        return Err(Error::config(format!(
            "window span for stream '{}' must be positive",
            schema.name()
        )));
    }
    Ok(())
}
