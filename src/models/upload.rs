//! Payloads handed to the folder layer by the presentation layer.

use crate::store::{ByteStream, bytes_body};
use bytes::Bytes;
use std::fmt;

/// One uploaded file: a client-supplied name, its declared size and a body
/// that must yield exactly `size` bytes.
///
/// For single-file uploads `filename` is a plain name. For folder uploads it
/// is the path of the file relative to the uploaded folder, e.g.
/// `photos/2025/img.jpg`.
pub struct UploadFile {
    pub filename: String,
    pub size: u64,
    pub body: ByteStream,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, size: u64, body: ByteStream) -> Self {
        Self {
            filename: filename.into(),
            size,
            body,
        }
    }

    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self::new(filename, size, bytes_body(bytes))
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("filename", &self.filename)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
