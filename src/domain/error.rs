//! Domain error taxonomy

use crate::domain::promo::PromoRejection;

/// Domain Result type
pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Viewer may not start this handover now (wrong state or role)
    #[error("handover not allowed: {0}")]
    HandoverNotAllowed(String),

    #[error("user {0} is not a participant")]
    NotParticipant(String),

    /// Unique (booking, type) constraint hit by a concurrent creator
    #[error("handover session already exists for booking {0}")]
    DuplicateSession(String),

    #[error("promo code rejected: {0}")]
    PromoRejected(#[from] PromoRejection),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        DomainError::NotFound { entity, id: id.to_string() }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "not_found",
            DomainError::InvalidStateTransition(_) => "invalid_state_transition",
            DomainError::HandoverNotAllowed(_) => "handover_not_allowed",
            DomainError::NotParticipant(_) => "not_participant",
            DomainError::DuplicateSession(_) => "duplicate_session",
            DomainError::PromoRejected(rejection) => rejection.code(),
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::Storage(_) => "storage_error",
        }
    }
}
