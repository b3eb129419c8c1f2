//! Utility functions and helpers.

pub mod cipher;
pub mod conn_string;
pub mod id_generator;
pub mod identifier;

// Re-export commonly used types
pub use cipher::EncryptionKey;
pub use id_generator::IdGenerator;
pub use identifier::IdentifierValidator;
