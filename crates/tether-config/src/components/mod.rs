//! Configuration components for the tether core
//!
//! One small, focused section per component that actually needs tuning.

pub mod crypto;
pub mod logging;
pub mod permission;
pub mod rpc;
pub mod session;
pub mod sync;

pub use crypto::*;
pub use logging::*;
pub use permission::*;
pub use rpc::*;
pub use session::*;
pub use sync::*;
