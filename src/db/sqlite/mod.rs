mod change_requests;

pub use change_requests::SqliteChangeRequestRepo;
