use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("lock already held: {name}")]
    LockHeld { name: String },

    #[error("store rejected key {key}: {reason}")]
    StoreRejected { key: String, reason: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn lock_held(name: impl Into<String>) -> Self {
        Self::LockHeld { name: name.into() }
    }

    #[must_use]
    pub fn store_rejected(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreRejected {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl tickwork_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tickwork_common::impl_context!();
