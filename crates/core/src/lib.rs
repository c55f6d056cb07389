//! Eddy Core - Core types for the Eddy continuous-query engine.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - `DataType` / `Value`: field types and runtime values
//! - `EventType` / `Event`: schemas and immutable events
//! - `Row` / `RowSchema`: result rows with one slot per joined stream
//! - `RowDelta` / `Delta`: incremental changes
//! - `Error`: the error taxonomy
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Event, EventTypeBuilder, Row, Value};
//! use std::sync::Arc;
//!
//! let ty = EventTypeBuilder::new("SupportBean")
//!     .unwrap()
//!     .field("theString", DataType::String)
//!     .unwrap()
//!     .field("intPrimitive", DataType::Int32)
//!     .unwrap()
//!     .build();
//!
//! let event = Arc::new(Event::from_pairs(ty, [("theString", Value::from("E1"))]).unwrap());
//! let row = Row::single(event);
//!
//! assert_eq!(row.width(), 1);
//! assert!(!row.is_null(0));
//! ```

mod delta;
mod error;
mod event;
mod row;
mod types;
mod value;

pub use delta::{Delta, RowDelta};
pub use error::{Error, ErrorKind, Result};
pub use event::{next_event_id, Event, EventId, EventType, EventTypeBuilder, Field, SharedEvent};
pub use row::{FieldPath, NullMask, Row, RowKey, RowSchema, MAX_SLOTS};
pub use types::DataType;
pub use value::Value;
