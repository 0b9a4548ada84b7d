use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("data model inconsistency: {message}")]
    ModelInconsistency { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("ddl error: {message} (statement: {statement})")]
    Ddl { message: String, statement: String },
    #[error("processing error: {message}")]
    Processing { message: String },
}

impl LedgerError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn model_inconsistency(message: impl Into<String>) -> Self {
        Self::ModelInconsistency {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn ddl(message: impl Into<String>, statement: impl Into<String>) -> Self {
        Self::Ddl {
            message: message.into(),
            statement: statement.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    /// Zero rows for a well-formed query. Callers decide whether empty is meaningful.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The data model referenced something it does not declare. Never worth retrying.
    pub fn is_model_inconsistency(&self) -> bool {
        matches!(self, Self::ModelInconsistency { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<sea_orm::DbErr> for LedgerError {
    fn from(value: sea_orm::DbErr) -> Self {
        LedgerError::storage(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = LedgerError::storage("disk");
        assert!(matches!(err, LedgerError::Storage { .. }));
        let err = LedgerError::not_found("missing");
        assert!(err.is_not_found());
        let err = LedgerError::model_inconsistency("unknown link");
        assert!(err.is_model_inconsistency());
        assert!(!err.is_not_found());
        let err = LedgerError::validation("bad");
        assert!(matches!(err, LedgerError::Validation { .. }));
        let err = LedgerError::processing("job");
        assert!(matches!(err, LedgerError::Processing { .. }));
    }

    #[test]
    fn ddl_errors_carry_the_statement() {
        let err = LedgerError::ddl("syntax error", "CREATE TABLE \"x\" ()");
        let rendered = err.to_string();
        assert!(rendered.contains("syntax error"));
        assert!(rendered.contains("CREATE TABLE \"x\" ()"));
    }
}
