use shared::error::{ApiError, ErrorCode, FieldError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("access denied")]
    Forbidden,
    #[error("actor is not registered as a professor")]
    ActorNotRegisteredAsProfessor,
    #[error("a curricular unit needs at least one professor")]
    MissingProfessorAssociation,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Validation(_) | ServiceError::MissingProfessorAssociation => {
                ErrorCode::Validation
            }
            ServiceError::Forbidden | ServiceError::ActorNotRegisteredAsProfessor => {
                ErrorCode::Forbidden
            }
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::Conflict(_) => ErrorCode::Conflict,
            ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            ServiceError::Validation(fields) => {
                ApiError::new(code, message).with_fields(fields)
            }
            ServiceError::MissingProfessorAssociation => {
                ApiError::new(code, message.clone())
                    .with_fields(vec![FieldError::new("professor_ids", message)])
            }
            _ => ApiError::new(code, message),
        }
    }
}
