//! Integration test common infrastructure.
//!
//! Provides an in-process daemon harness and a fake discovery registry.

pub mod registry;
pub mod server;

#[allow(unused_imports)]
pub use registry::FakeRegistry;
#[allow(unused_imports)]
pub use server::TestServer;
