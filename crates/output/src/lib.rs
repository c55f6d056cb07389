//! Eddy Output - Result delivery for Eddy statements.
//!
//! This crate provides:
//!
//! - `DeliveryDescriptor` / `DeliveryPolicy`: immediate, discrete or grouped
//!   delivery, validated against the statement's row schema
//! - `OrderKey`: order-by terms applied within a collection boundary
//! - `OutputProcessor`: turns one boundary's `RowDelta` into delivered batches
//! - `SubscriptionManager`: the callbacks a statement delivers to
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Event, EventTypeBuilder, Row, RowDelta, RowSchema, Value};
//! use eddy_output::{DeliveryDescriptor, OutputProcessor};
//! use std::sync::Arc;
//!
//! let ty = EventTypeBuilder::new("Bean")
//!     .unwrap()
//!     .field("key", DataType::Int32)
//!     .unwrap()
//!     .build();
//! let schema = RowSchema::new(vec![("b".into(), ty.clone())]);
//! let output = OutputProcessor::new(&schema, &DeliveryDescriptor::grouped(["key"]), &[], false).unwrap();
//!
//! let rows = [1, 2, 1]
//!     .iter()
//!     .map(|k| Row::single(Arc::new(Event::new(ty.clone(), vec![Value::Int32(*k)]).unwrap())))
//!     .collect();
//! let batches = output.consume(RowDelta::from_parts(rows, vec![]));
//! assert_eq!(batches.len(), 2);
//! assert_eq!(batches[0].inserted.len(), 2);
//! ```

pub mod order;
pub mod policy;
pub mod processor;
pub mod subscription;

pub use order::OrderKey;
pub use policy::{DeliveryDescriptor, DeliveryPolicy};
pub use processor::{DeliveredBatch, OutputProcessor};
pub use subscription::{BatchCallback, SubscriptionId, SubscriptionManager};
