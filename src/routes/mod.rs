pub mod change_requests;
mod error;
pub mod health;
pub mod me;

pub use error::ApiError;
