use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MarkpageError>;

#[derive(Debug, Error)]
pub enum MarkpageError {
    #[error("input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("no page template available")]
    MissingPageTemplate,

    #[error("flowable cannot fit on any page: {0}")]
    UnplaceableFlowable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("produced PDF failed inspection: {0}")]
    Pdf(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl MarkpageError {
    pub fn is_missing_input(&self) -> bool {
        matches!(self, MarkpageError::InputNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_display_names_the_path() {
        let err = MarkpageError::InputNotFound {
            path: PathBuf::from("MAPEAMENTO_COMPLETO.md"),
        };
        assert!(err.is_missing_input());
        assert_eq!(
            err.to_string(),
            "input file not found: MAPEAMENTO_COMPLETO.md"
        );
    }

    #[test]
    fn io_errors_convert_and_keep_source() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: MarkpageError = io.into();
        assert!(!err.is_missing_input());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn io_message_appears_once_in_the_chain() {
        let err: MarkpageError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        let mut chain = vec![err.to_string()];
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        assert_eq!(chain.join(": "), "io error: denied");
    }
}
