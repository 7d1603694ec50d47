//! Server lifecycle: listener binding, accept loops and shutdown.

mod core;

pub use self::core::SpaceServer;
