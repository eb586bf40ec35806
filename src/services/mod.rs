mod change_requests;
mod file_storage;

pub use change_requests::{
    AttachmentUpload, ChangeRequestError, ChangeRequestResult, ChangeRequestService,
};
#[cfg(feature = "s3-storage")]
pub use file_storage::S3FileStorage;
pub use file_storage::{
    FileStorage, FileStorageError, FileStorageResult, FilesystemFileStorage, create_file_storage,
};
