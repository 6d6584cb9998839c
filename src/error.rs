use std::path::PathBuf;
use thiserror::Error;

use crate::latex::tree::ParseError;

/// Errors that abort processing of a paper.
#[derive(Error, Debug)]
pub enum TexDeckError {
    #[error("could not locate main document in {0:?}")]
    MainDocumentNotFound(PathBuf),

    #[error("no \\begin{{document}} marker found, cannot recover the document header")]
    MissingDocumentBegin,

    #[error("image '{reference}' not found in graphics path {searched:?}")]
    ImageNotFound {
        reference: String,
        searched: Vec<PathBuf>,
    },

    #[error("LaTeX parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("rasterization of {path:?} failed: {reason}")]
    Rasterize { path: PathBuf, reason: String },

    #[error("unsupported archive {0:?}")]
    UnsupportedArchive(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T, E = TexDeckError> = std::result::Result<T, E>;
