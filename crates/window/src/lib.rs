//! Eddy Window - Per-stream retention windows.
//!
//! A [`Window`] decides which events of one stream are currently visible. Every
//! admitted event yields a [`WindowOutput`] naming the events that became
//! visible and the events that expired; time-driven policies also produce
//! outputs from [`Window::advance_time`].
//!
//! # Example
//!
//! ```rust
//! use eddy_core::{DataType, Event, EventTypeBuilder, Value};
//! use eddy_window::{Window, WindowPolicy};
//! use std::sync::Arc;
//!
//! let ty = EventTypeBuilder::new("Tick").unwrap().field("v", DataType::Int32).unwrap().build();
//! let mut window = Window::new(WindowPolicy::Length { size: 2 }, &ty).unwrap();
//!
//! for v in 0..3 {
//!     let out = window.admit(Arc::new(Event::new(ty.clone(), vec![Value::Int32(v)]).unwrap()), 0).unwrap();
//!     assert_eq!(out.inserted.len(), 1);
//!     assert_eq!(out.expired.len(), if v == 2 { 1 } else { 0 });
//! }
//! assert_eq!(window.len(), 2);
//! ```

mod policy;
mod window;

pub use policy::WindowPolicy;
pub use window::{Window, WindowOutput};
