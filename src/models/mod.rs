mod attachment;
mod audit_entry;
mod change_request;
mod status;
mod validators;

pub use attachment::*;
pub use audit_entry::*;
pub use change_request::*;
pub use status::*;
