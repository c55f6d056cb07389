//! Eddy Dataset - Shared named datasets for Eddy.
//!
//! This crate provides:
//!
//! - `NamedDataset`: a retained, indexable row collection shared by statements
//! - `WriterHandle` / `ReaderHandle`: registrations that feed or query a dataset
//! - `AggregateTable`: datasets holding aggregate columns fed by many writers
//! - `DatasetRegistry`: name-based ownership of every dataset
//!
//! Readers register a [`PredicateShape`]; the dataset creates the index that
//! serves it on first use, shares it with every later reader of a compatible
//! shape, and destroys it when its last reader is dropped.
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, EventTypeBuilder, Value};
//! use eddy_dataset::{DatasetRegistry, PredicateShape, Probe};
//! use eddy_window::WindowPolicy;
//!
//! let ty = EventTypeBuilder::new("Quote")
//!     .unwrap()
//!     .field("symbol", DataType::String)
//!     .unwrap()
//!     .field("price", DataType::Float64)
//!     .unwrap()
//!     .build();
//! let registry = DatasetRegistry::new();
//! let quotes = registry
//!     .create_dataset("Quotes", ty, WindowPolicy::Length { size: 100 })
//!     .unwrap();
//! quotes.insert(vec![Value::from("IBM"), Value::Float64(101.5)]).unwrap();
//!
//! let reader = quotes
//!     .register_reader(PredicateShape::new(["symbol"], Vec::<String>::new()))
//!     .unwrap();
//! let rows = reader.lookup(&Probe::new(vec![Value::from("IBM")], vec![])).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(quotes.index_count(), 1);
//!
//! drop(reader);
//! assert_eq!(quotes.index_count(), 0);
//! ```

pub mod aggregate;
mod commit;
pub mod consumer;
pub mod dataset;
pub mod handle;
pub mod predicate;
pub mod registry;

pub use aggregate::{
    AggregateColumn, AggregateFunction, AggregateSnapshot, AggregateTable, AggregateValue,
    WriterId,
};
pub use consumer::{ChangeCallback, ConsumerId, DatasetChange};
pub use dataset::{DatasetId, Mutation, NamedDataset};
pub use handle::{ReaderHandle, WriterHandle, WriterSpec};
pub use predicate::{InTerm, PredicateShape, Probe};
pub use registry::DatasetRegistry;
