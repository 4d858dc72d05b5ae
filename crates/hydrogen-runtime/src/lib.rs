//! Hydrogen Runtime
//!
//! Owns everything needed to run compiled Hydrogen bytecode: the value
//! stack, call frames, the heap, the embedding-facing `HyState`, and the
//! register VM executor itself.
//!
//! ```rust,ignore
//! use hydrogen_runtime::HyState;
//!
//! let mut state = HyState::new();
//! let result = state.run_string(None, "let x = 1 + 2\nreturn x".into());
//! ```

pub mod closures;
pub mod config;
pub mod exec;
pub mod ffi;
pub mod native;
pub mod state;

pub use config::HyConfig;
pub use exec::{call_function, call_value};
pub use state::{Frame, HyState};
