//! Eddy Engine - the continuous-query engine facade.
//!
//! This crate wires the lower layers together:
//!
//! - `Engine`: event-type registry, datasets, statement lifecycle, event
//!   routing and logical time
//! - `StatementSpec`: a continuous statement over event streams and
//!   datasets, optionally writing into a dataset
//! - `OnDemandSpec`: a statement fired by trigger events that reads or
//!   deletes dataset rows through a shared index
//! - `EngineConfig` / `init_tracing`: TOML configuration and log bootstrap
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, EventTypeBuilder};
//! use eddy_engine::{Engine, EngineConfig, StatementSpec, StreamSpec};
//! use eddy_window::WindowPolicy;
//! use std::sync::{Arc, Mutex};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! engine
//!     .register_event_type(
//!         EventTypeBuilder::new("SupportBean")
//!             .unwrap()
//!             .field("theString", DataType::String)
//!             .unwrap()
//!             .build(),
//!     )
//!     .unwrap();
//!
//! let id = engine
//!     .create_statement(
//!         StatementSpec::new("last_two").stream(
//!             StreamSpec::event_type("s0", "SupportBean").window(WindowPolicy::Length { size: 2 }),
//!         ),
//!     )
//!     .unwrap();
//!
//! let seen = Arc::new(Mutex::new(0));
//! let counter = seen.clone();
//! engine
//!     .subscribe(id, move |batch| *counter.lock().unwrap() += batch.inserted.len())
//!     .unwrap();
//!
//! engine.send("SupportBean", vec!["E1".into()]).unwrap();
//! assert_eq!(*seen.lock().unwrap(), 1);
//! ```

mod boundary;
pub mod config;
mod engine;
pub mod logging;
pub mod on_demand;
pub mod statement;

pub use boundary::ErrorReport;
pub use config::{DatasetConfig, EngineConfig, EventTypeConfig, LogFormat, LoggingConfig};
pub use engine::Engine;
pub use logging::init_tracing;
pub use on_demand::{InListTerm, OnDemandAction, OnDemandSpec, RangeBound, RangeTerm};
pub use statement::{
    StatementId, StatementSpec, StatementTarget, StreamFilter, StreamSource, StreamSpec,
};
