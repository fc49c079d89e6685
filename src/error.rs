use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("unsupported MIME type")]
    UnsupportedMimeType,

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("key listing is not supported by the {0} backend")]
    ListingUnsupported(&'static str),

    #[error("identifier generation failed: {0}")]
    Identifier(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("record encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("record decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),
}

impl StorageError {
    /// Errors caused by the caller's input rather than by the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StorageError::UnsupportedMimeType
                | StorageError::UnsupportedExtension(_)
                | StorageError::InvalidMetadata(_)
                | StorageError::InvalidIdentifier(_)
        )
    }
}

macro_rules! impl_from_redb {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for StorageError {
                fn from(err: $ty) -> Self {
                    StorageError::Database(redb::Error::from(err))
                }
            }
        )+
    };
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
