//! Backend client seams (cloud API, local speaker protocol) and the helpers
//! shared by code that talks to them.

pub mod metadata;
pub mod pool;
pub mod traits;

pub use pool::LocalHandlePool;
pub use traits::*;
