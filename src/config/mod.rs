mod server;

pub use server::{AdminConfig, AuthConfig, MirrorConfig, ServerConfig};
