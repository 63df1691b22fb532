//! CLI command implementations.

pub mod digests;
pub mod init;
pub mod inspect;
pub mod pair;
pub mod status;
