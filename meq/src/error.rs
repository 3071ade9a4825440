use thiserror::Error;

use crate::topic::TopicError;

#[derive(Error, Debug)]
pub enum MeqError {
    #[error("validation error, {0}")]
    Validation(TopicError),
    #[error("not found, {0}")]
    NotFound(String),
    #[error("decode error, {0}")]
    Decode(String),
    #[error("encode error, {0}")]
    Encode(String),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    IoError(std::io::Error),
}

impl MeqError {
    #[inline]
    pub fn is_validation(&self) -> bool {
        matches!(self, MeqError::Validation(_))
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, MeqError::NotFound(_))
    }

    #[inline]
    pub fn is_decode(&self) -> bool {
        matches!(self, MeqError::Decode(_))
    }
}

impl From<TopicError> for MeqError {
    #[inline]
    fn from(e: TopicError) -> Self {
        MeqError::Validation(e)
    }
}

impl From<String> for MeqError {
    #[inline]
    fn from(e: String) -> Self {
        MeqError::Msg(e)
    }
}

impl From<&str> for MeqError {
    #[inline]
    fn from(e: &str) -> Self {
        MeqError::Msg(e.to_string())
    }
}

impl From<anyhow::Error> for MeqError {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        MeqError::Anyhow(e)
    }
}

impl From<std::io::Error> for MeqError {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        MeqError::IoError(e)
    }
}

pub type Result<T, E = MeqError> = std::result::Result<T, E>;
