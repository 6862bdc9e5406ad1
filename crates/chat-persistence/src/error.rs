/// Tagged error returned by every persistence operation (§6). The core
/// never inspects anything beyond the variant: no messages, no internal
/// detail leaks into a `ctrl` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("duplicate")]
    Duplicate,
    #[error("internal error")]
    Internal,
    #[error("permission denied")]
    Permission,
    #[error("invalid argument")]
    InvalidArg,
}

impl StoreError {
    /// Maps to the `ctrl` numeric code family a caller should report.
    pub fn as_ctrl_code(self) -> u16 {
        match self {
            StoreError::NotFound => chat_proto::error_codes::NOT_FOUND,
            StoreError::Duplicate => chat_proto::error_codes::CONFLICT,
            StoreError::Internal => chat_proto::error_codes::INTERNAL,
            StoreError::Permission => chat_proto::error_codes::FORBIDDEN,
            StoreError::InvalidArg => chat_proto::error_codes::UNPROCESSABLE,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
