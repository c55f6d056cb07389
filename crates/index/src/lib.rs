//! Eddy Index - Secondary indexes for Eddy.
//!
//! This crate provides:
//!
//! - `HashIndex`: point queries using a hash map
//! - `OrderedIndex`: range queries using a `BTreeMap`
//! - `KeyShape`: the equality/range field layout an index is keyed on
//! - `IndexRegistry`: on-demand, reference-counted indexes over a row collection
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Event, EventTypeBuilder, Value};
//! use eddy_index::{IndexRegistry, KeyShape};
//!
//! let ty = EventTypeBuilder::new("Order")
//!     .unwrap()
//!     .field("symbol", DataType::String)
//!     .unwrap()
//!     .build();
//! let mut registry = IndexRegistry::new(ty.clone());
//! let handle = registry.get_or_create(KeyShape::equality(["symbol"]), []).unwrap();
//!
//! let order = Event::new(ty, vec![Value::from("IBM")]).unwrap();
//! registry.insert(&order);
//!
//! assert_eq!(registry.lookup(&handle, &["IBM".into()]).unwrap(), vec![order.id()]);
//! ```

pub mod hash;
pub mod ordered;
pub mod registry;
pub mod shape;
pub mod stats;
pub mod traits;

pub use hash::HashIndex;
pub use ordered::OrderedIndex;
pub use registry::{IndexHandle, IndexId, IndexRegistry};
pub use shape::KeyShape;
pub use stats::IndexStats;
pub use traits::{Index, IndexError, KeyRange, RangeIndex, RowId};
