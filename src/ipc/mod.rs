//! IPC server exposing the provider to the host

pub mod protocol;
pub mod server;

pub use server::IpcServer;
