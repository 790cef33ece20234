use bson::{Document, doc};
use thiserror::Error;

/// Wire-visible command error carrying a MongoDB-compatible error code.
///
/// `Display` produces the `errmsg` text; `code`/`code_name` supply the
/// numeric code and its driver-facing name. The `Location` variant covers
/// the `LocationNNNNN` family of parse/validation codes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    BadValue(String),

    #[error("{0}")]
    FailedToParse(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    TypeMismatch(String),

    #[error("{0}")]
    AuthenticationFailed(String),

    #[error("{0}")]
    NamespaceNotFound(String),

    #[error("{0}")]
    UnsuitableValueType(String),

    #[error("{0}")]
    ConflictingUpdateOperators(String),

    #[error("{0}")]
    CursorNotFound(String),

    #[error("{0}")]
    NamespaceExists(String),

    #[error("{0}")]
    EmptyName(String),

    #[error("{0}")]
    CommandNotFound(String),

    #[error("{0}")]
    ImmutableField(String),

    #[error("{0}")]
    InvalidNamespace(String),

    #[error("{0}")]
    InvalidPipelineOperator(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("{0}")]
    MechanismUnavailable(String),

    #[error("{0}")]
    DuplicateKey(String),

    #[error("{1}")]
    Location(i32, String),
}

impl CommandError {
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Internal(_) => 1,
            Self::BadValue(_) => 2,
            Self::FailedToParse(_) => 9,
            Self::Unauthorized(_) => 13,
            Self::TypeMismatch(_) => 14,
            Self::AuthenticationFailed(_) => 18,
            Self::NamespaceNotFound(_) => 26,
            Self::UnsuitableValueType(_) => 28,
            Self::ConflictingUpdateOperators(_) => 40,
            Self::CursorNotFound(_) => 43,
            Self::NamespaceExists(_) => 48,
            Self::EmptyName(_) => 56,
            Self::CommandNotFound(_) => 59,
            Self::ImmutableField(_) => 66,
            Self::InvalidNamespace(_) => 73,
            Self::InvalidPipelineOperator(_) => 168,
            Self::NotImplemented(_) => 238,
            Self::MechanismUnavailable(_) => 334,
            Self::DuplicateKey(_) => 11000,
            Self::Location(code, _) => *code,
        }
    }

    #[must_use]
    pub fn code_name(&self) -> String {
        match self {
            Self::Internal(_) => "InternalError".into(),
            Self::BadValue(_) => "BadValue".into(),
            Self::FailedToParse(_) => "FailedToParse".into(),
            Self::Unauthorized(_) => "Unauthorized".into(),
            Self::TypeMismatch(_) => "TypeMismatch".into(),
            Self::AuthenticationFailed(_) => "AuthenticationFailed".into(),
            Self::NamespaceNotFound(_) => "NamespaceNotFound".into(),
            Self::UnsuitableValueType(_) => "UnsuitableValueType".into(),
            Self::ConflictingUpdateOperators(_) => "ConflictingUpdateOperators".into(),
            Self::CursorNotFound(_) => "CursorNotFound".into(),
            Self::NamespaceExists(_) => "NamespaceExists".into(),
            Self::EmptyName(_) => "EmptyName".into(),
            Self::CommandNotFound(_) => "CommandNotFound".into(),
            Self::ImmutableField(_) => "ImmutableField".into(),
            Self::InvalidNamespace(_) => "InvalidNamespace".into(),
            Self::InvalidPipelineOperator(_) => "InvalidPipelineOperator".into(),
            Self::NotImplemented(_) => "NotImplemented".into(),
            Self::MechanismUnavailable(_) => "MechanismUnavailable".into(),
            Self::DuplicateKey(_) => "Location11000".into(),
            Self::Location(code, _) => format!("Location{code}"),
        }
    }

    /// Shapes the error as a top-level command failure document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        doc! {
            "ok": 0.0,
            "errmsg": self.to_string(),
            "code": self.code(),
            "codeName": self.code_name(),
        }
    }

    /// Shapes the error as one entry of a `writeErrors` array.
    #[must_use]
    pub fn write_error(&self, index: i32) -> Document {
        doc! {
            "index": index,
            "code": self.code(),
            "errmsg": self.to_string(),
        }
    }
}

impl From<bson::error::Error> for CommandError {
    fn from(e: bson::error::Error) -> Self {
        Self::Internal(format!("BSON: {e}"))
    }
}

/// Setup-time failures: configuration files.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
