//! # gcbridge
//!
//! A cross-runtime object bridge between a garbage-collected host scripting
//! runtime and a garbage-collected guest JavaScript engine. Values cross in
//! both directions, objects keep their identity across round trips, calls
//! and exceptions are translated at the boundary, and neither collector frees
//! an object the other side can still reach.
//!
//! ## Architecture
//!
//! ```text
//! Host runtime (tables, functions, userdata)
//!     │
//!     │ codec + wrappers + reference table
//!     ▼
//! Bridge (this crate) ── lifecycle: anchored ⇄ pending release ⇄ collected
//!     │
//!     │ contexts, interceptors, call bridge
//!     ▼
//! Guest engine (objects, arrays, functions, errors, globals)
//! ```
//!
//! ## Features
//!
//! - **Identity preservation**: one wrapper per object per direction
//! - **Cooperative collection**: two-phase finalization across both heaps
//! - **Contexts and sandboxes**: sandbox globals forward to host tables
//! - **Exception translation**: host tracebacks and guest stacks combined
//! - **Flat function table**: native functions installed into every context

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bridge;
pub mod call;
pub mod codec;
pub mod config;
pub mod error;
pub mod guest;
pub mod heap;
pub mod host;
pub mod host_functions;
pub mod interceptor;
pub mod lifecycle;
pub mod metamethods;
pub mod metrics;
pub mod reftable;
pub mod scope;
pub mod telemetry;
pub mod wrapper;

// Re-export commonly used types
pub use bridge::Bridge;
pub use config::{set_engine_flags, BridgeConfig, ConfigError, EngineFlags};
pub use error::{ErrorCode, GuestException, HostException, Result, RuntimeError};
pub use guest::{GuestEngine, GuestRef, GuestValue, PropertyKey};
pub use host::{HostRef, HostRuntime, HostValue};
pub use host_functions::FlatFunctionTable;
pub use interceptor::PropertyInterceptor;
pub use lifecycle::{FinalizerEvent, Side};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use scope::ContextScope;
pub use wrapper::{BridgedObject, LifecycleState, WrapperId, WrapperKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
    }
}
