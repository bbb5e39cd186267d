//! Common test utilities and fixtures.

pub mod fixtures;
#[path = "../../../storage/tests/common/object_server.rs"]
pub mod object_server;
pub mod server;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use object_server::ObjectServer;
#[allow(unused_imports)]
pub use server::*;
