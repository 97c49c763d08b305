use crate::object::ObjectKindTag;

pub type ComposeResult<T> = Result<T, ComposeError>;

#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    #[error("failed to decode source document: {0}")]
    Decode(String),

    #[error("failed to finalize document: {0}")]
    Finalize(String),

    #[error("page {page} object {index} ({kind}) failed: {message}")]
    Object {
        page: usize,
        index: usize,
        kind: ObjectKindTag,
        message: String,
    },

    #[error("asset error: {0}")]
    Asset(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("path error: {0}")]
    Path(String),

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn finalize(msg: impl Into<String>) -> Self {
        Self::Finalize(msg.into())
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset(msg.into())
    }

    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    /// Fatal errors abort the whole save and produce no artifacts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ComposeError::Decode(_) | ComposeError::Finalize(_) | ComposeError::Object { .. }
        )
    }
}

pub(crate) fn lopdf_err(err: lopdf::Error) -> ComposeError {
    ComposeError::Pdf(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ComposeError::decode("x")
                .to_string()
                .starts_with("failed to decode source document:")
        );
        assert!(
            ComposeError::finalize("x")
                .to_string()
                .starts_with("failed to finalize document:")
        );
        assert!(ComposeError::asset("x").to_string().contains("asset error:"));
        assert!(ComposeError::image("x").to_string().contains("image error:"));
    }

    #[test]
    fn object_error_names_page_index_and_kind() {
        let err = ComposeError::Object {
            page: 2,
            index: 1,
            kind: ObjectKindTag::Text,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "page 2 object 1 (text) failed: boom");
        assert!(err.is_fatal());
    }

    #[test]
    fn only_decode_finalize_and_object_are_fatal() {
        assert!(ComposeError::decode("x").is_fatal());
        assert!(ComposeError::finalize("x").is_fatal());
        assert!(!ComposeError::image("x").is_fatal());
        assert!(!ComposeError::Io(std::io::Error::other("x")).is_fatal());
    }
}
