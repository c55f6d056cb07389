//! Eddy Join - Incremental multi-stream joins for Eddy.
//!
//! This crate provides:
//!
//! - `JoinGraph`: streams plus typed edges (`Inner`, `Left`, `Right`, `Full`)
//!   carrying comparison conditions
//! - `JoinProcessor`: keeps a join result materialized and reports every
//!   change as a `RowDelta`
//!
//! Results do not depend on the order in which events arrive across streams.
//! A row emitted with a null-padded outer slot is retracted and replaced by
//! the matched row when its partner arrives.
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Event, EventTypeBuilder, Value};
//! use eddy_join::{Condition, JoinEdge, JoinGraph, JoinKind, JoinProcessor, JoinStream};
//! use eddy_window::WindowPolicy;
//! use std::sync::Arc;
//!
//! let ty = EventTypeBuilder::new("Bean")
//!     .unwrap()
//!     .field("key", DataType::String)
//!     .unwrap()
//!     .build();
//! let graph = JoinGraph::new(
//!     vec![
//!         JoinStream::new("a", ty.clone(), WindowPolicy::KeepAll),
//!         JoinStream::new("b", ty.clone(), WindowPolicy::KeepAll),
//!     ],
//!     vec![JoinEdge::new("a", JoinKind::Left, "b", vec![Condition::equals("key", "key")])],
//! )
//! .unwrap();
//! let mut join = JoinProcessor::new(graph).unwrap();
//!
//! let a = Arc::new(Event::new(ty.clone(), vec![Value::from("k")]).unwrap());
//! let delta = join.on_event(0, a, 0).unwrap();
//! assert!(delta.inserted[0].is_null(1));
//!
//! let b = Arc::new(Event::new(ty, vec![Value::from("k")]).unwrap());
//! let delta = join.on_event(1, b, 0).unwrap();
//! assert!(delta.removed[0].is_null(1));
//! assert!(!delta.inserted[0].is_null(1));
//! ```

pub mod graph;
pub mod processor;
mod store;

pub use graph::{CompareOp, Condition, JoinEdge, JoinGraph, JoinKind, JoinStream, StreamIndex};
pub use processor::JoinProcessor;
