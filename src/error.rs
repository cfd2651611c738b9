use thiserror::Error;

#[derive(Error, Debug)]
pub enum RliteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file header is corrupt")]
    CorruptHeader,

    #[error("corruption: {0}")]
    Corrupt(String),

    #[error("invalid page number: {0}")]
    InvalidPage(u32),

    #[error("invalid cell number: {0}")]
    InvalidCell(u16),

    #[error("file has no header")]
    NoHeader,

    #[error("entry not found")]
    NotFound,

    #[error("duplicate key: {0}")]
    Duplicate(u32),

    #[error("cursor has no next entry")]
    NoNext,

    #[error("cursor has no previous entry")]
    NoPrev,

    #[error("no entry satisfies the seek")]
    KeyNotFound,

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, RliteError>;
