//! Media transfer: stream download and object-store upload.

pub mod download;
pub mod upload;

pub use download::{download_to_file, DownloadError, DownloadOptions};
pub use upload::{content_type_for, OssUploader, UploadError};
