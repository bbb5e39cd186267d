pub mod fixtures;
pub mod object_server;

#[allow(unused_imports)]
pub use fixtures::{md5_hex, seeded_bytes};
#[allow(unused_imports)]
pub use object_server::ObjectServer;
