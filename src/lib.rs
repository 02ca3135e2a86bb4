pub mod config;
pub mod error;
pub mod kernel;
pub mod outputs;
pub mod services;

// Re-export specific items if needed for convenient access
pub use config::LecternConfig;
pub use error::LecternError;
pub use kernel::reader::ReaderSession;
