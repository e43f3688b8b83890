//! Persistence Adapters
//!
//! Implementations of the credential repository port.

pub mod in_memory;
pub mod json_file;

pub use in_memory::InMemoryCredentialRepository;
pub use json_file::JsonFileCredentialRepository;
