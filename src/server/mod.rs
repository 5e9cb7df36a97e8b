pub mod dto;
mod files;
mod groups;
mod packages;
pub mod response;
mod router;
mod users;
pub mod validation;

pub use router::{AppState, create_router};
