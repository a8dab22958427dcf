//! Workspace facade crate.
//!
//! Re-exports the individual workspace crates so host applications can
//! depend on `alc-workspace` alone instead of wiring each member crate
//! individually.

pub use bridge_traits;
pub use core_catalog;
pub use core_runtime;
pub use core_sync;
