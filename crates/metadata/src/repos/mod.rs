//! Repository traits for metadata operations.

pub mod aliases;
pub mod contents;

pub use aliases::AliasRepo;
pub use contents::ContentRepo;
