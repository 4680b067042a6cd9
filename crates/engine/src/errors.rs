//! Memo pipeline error types

use dealmemo_common::db::models::GenerationStatus;
use dealmemo_common::errors::AppError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, MemoError>;

#[derive(Error, Debug)]
pub enum MemoError {
    #[error("Generation failed for {section}: {message}")]
    Generation { section: String, message: String },

    #[error("Store error: {0}")]
    Store(AppError),

    #[error("Memo not found: {0}")]
    MemoNotFound(Uuid),

    #[error("Assembled document for memo {0} is empty")]
    EmptyDocument(Uuid),

    #[error("Invalid memo transition from {from} to {to}")]
    InvalidTransition {
        from: GenerationStatus,
        to: GenerationStatus,
    },
}

impl From<AppError> for MemoError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::MemoNotFound { id } => match Uuid::parse_str(&id) {
                Ok(id) => MemoError::MemoNotFound(id),
                Err(_) => MemoError::Store(AppError::MemoNotFound { id }),
            },
            other => MemoError::Store(other),
        }
    }
}

impl From<MemoError> for AppError {
    fn from(e: MemoError) -> Self {
        match e {
            MemoError::Store(inner) => inner,
            MemoError::MemoNotFound(id) => AppError::MemoNotFound { id: id.to_string() },
            MemoError::EmptyDocument(id) => AppError::AssemblyFailed {
                message: format!("assembled document for memo {} is empty", id),
            },
            MemoError::InvalidTransition { from, to } => AppError::InvalidTransition {
                resource: "memo".to_string(),
                from: from.to_string(),
                to: to.to_string(),
            },
            generation @ MemoError::Generation { .. } => AppError::Internal {
                message: generation.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_not_found_round_trips() {
        let id = Uuid::new_v4();
        let err: MemoError = AppError::MemoNotFound { id: id.to_string() }.into();
        assert!(matches!(err, MemoError::MemoNotFound(found) if found == id));

        let app: AppError = err.into();
        assert_eq!(app.status_code().as_u16(), 404);
    }

    #[test]
    fn test_empty_document_is_server_error() {
        let app: AppError = MemoError::EmptyDocument(Uuid::new_v4()).into();
        assert_eq!(app.status_code().as_u16(), 500);
    }

    #[test]
    fn test_generation_message() {
        let err = MemoError::Generation {
            section: "recommendation".into(),
            message: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Generation failed for recommendation: timeout");
    }
}
