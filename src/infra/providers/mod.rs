//! Source provider backends.

pub mod filesystem;
pub mod remote;

pub use filesystem::FileSystemProvider;
pub use remote::RemoteProvider;
