#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Error {
    #[serde(rename = "type")]
    pub error_type: Type,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(rename = "subproblems", skip_serializing_if = "Vec::is_empty")]
    pub sub_problems: Vec<Error>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<super::identifier::Identifier>
}

/// Problem types as they appear on the wire. Several internal kinds share the
/// `malformed` URN and are told apart by [`Type::kind`] and the HTTP status.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    #[serde(rename = "urn:ietf:params:acme:error:accountDoesNotExist")]
    AccountDoesNotExist,
    #[serde(rename = "urn:ietf:params:acme:error:alreadyRevoked")]
    AlreadyRevoked,
    #[serde(rename = "urn:ietf:params:acme:error:badCSR")]
    BadCSR,
    #[serde(rename = "urn:ietf:params:acme:error:badNonce")]
    BadNonce,
    #[serde(rename = "urn:ietf:params:acme:error:badPublicKey")]
    BadPublicKey,
    #[serde(rename = "urn:ietf:params:acme:error:badRevocationReason")]
    BadRevocationReason,
    #[serde(rename = "urn:ietf:params:acme:error:caa")]
    CAA,
    #[serde(rename = "urn:ietf:params:acme:error:compound")]
    Compound,
    #[serde(rename = "urn:ietf:params:acme:error:malformed")]
    Conflict,
    #[serde(rename = "urn:ietf:params:acme:error:connection")]
    Connection,
    #[serde(rename = "urn:ietf:params:acme:error:dns")]
    DNS,
    #[serde(rename = "urn:ietf:params:acme:error:incorrectResponse")]
    IncorrectResponse,
    #[serde(rename = "urn:ietf:params:acme:error:invalidContact")]
    InvalidContact,
    #[serde(rename = "urn:ietf:params:acme:error:serverInternal")]
    Issuance,
    #[serde(rename = "urn:ietf:params:acme:error:malformed")]
    Malformed,
    #[serde(rename = "urn:ietf:params:acme:error:malformed")]
    NotFound,
    #[serde(rename = "urn:ietf:params:acme:error:orderNotReady")]
    OrderNotReady,
    #[serde(rename = "urn:ietf:params:acme:error:rateLimited")]
    RateLimited,
    #[serde(rename = "urn:ietf:params:acme:error:rejectedIdentifier")]
    RejectedIdentifier,
    #[serde(rename = "urn:ietf:params:acme:error:serverInternal")]
    ServerInternal,
    #[serde(rename = "urn:ietf:params:acme:error:tls")]
    TLS,
    #[serde(rename = "urn:ietf:params:acme:error:unauthorized")]
    Unauthorized,
    #[serde(rename = "urn:ietf:params:acme:error:unsupportedContact")]
    UnsupportedContact,
    #[serde(rename = "urn:ietf:params:acme:error:unsupportedIdentifier")]
    UnsupportedIdentifier,
}

/// Coarse, machine-readable classification of a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedRequest,
    Unauthorized,
    Conflict,
    NotFound,
    OrderNotReady,
    RateLimited,
    IssuanceError,
    ValidationFailed,
    Internal,
}

impl Type {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Type::AccountDoesNotExist | Type::BadNonce | Type::Unauthorized => ErrorKind::Unauthorized,
            Type::AlreadyRevoked | Type::BadPublicKey | Type::BadRevocationReason | Type::Compound |
            Type::InvalidContact | Type::Malformed | Type::RejectedIdentifier |
            Type::UnsupportedContact | Type::UnsupportedIdentifier => ErrorKind::MalformedRequest,
            Type::BadCSR | Type::Issuance => ErrorKind::IssuanceError,
            Type::CAA | Type::Connection | Type::DNS | Type::IncorrectResponse | Type::TLS => ErrorKind::ValidationFailed,
            Type::Conflict => ErrorKind::Conflict,
            Type::NotFound => ErrorKind::NotFound,
            Type::OrderNotReady => ErrorKind::OrderNotReady,
            Type::RateLimited => ErrorKind::RateLimited,
            Type::ServerInternal => ErrorKind::Internal,
        }
    }
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::OrderNotReady | ErrorKind::RateLimited)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.title, self.status, self.detail)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new<T: Into<String>, D: Into<String>>(error_type: Type, status: u16, title: T, detail: D) -> Error {
        Error {
            error_type,
            status,
            title: title.into(),
            detail: detail.into(),
            instance: None,
            sub_problems: vec![],
            identifier: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error_type.kind()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn with_identifier(mut self, identifier: super::identifier::Identifier) -> Error {
        self.identifier = Some(identifier);
        self
    }

    pub fn malformed<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::Malformed, 400, "Bad request", detail)
    }

    pub fn unauthorized<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::Unauthorized, 403, "Unauthorized", detail)
    }

    pub fn bad_nonce<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::BadNonce, 400, "Bad nonce", detail)
    }

    pub fn conflict<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::Conflict, 409, "Conflict", detail)
    }

    pub fn not_found<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::NotFound, 404, "Not found", detail)
    }

    pub fn order_not_ready<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::OrderNotReady, 403, "Order not ready", detail)
    }

    pub fn bad_csr<D: Into<String>>(detail: D) -> Error {
        Error::new(Type::BadCSR, 400, "Bad CSR", detail)
    }
}

#[macro_export]
macro_rules! internal_server_error {
    () => {
        $crate::types::error::Error {
            error_type: $crate::types::error::Type::ServerInternal,
            status: 500,
            title: String::from("Internal Server Error"),
            detail: "Something really went wrong there, we have no idea what it was".to_string(),
            sub_problems: vec ! [],
            instance: None,
            identifier: None,
        }
    }
}

/// Logs the underlying failure and replaces it with an opaque internal problem.
#[macro_export]
macro_rules! try_db_result {
    ($src:expr, $err:expr) => {
        (match ($src) {
            Ok(inner) => Ok(inner),
            Err(err) => {
                error!($err, err);
                Err($crate::internal_server_error!())
            }
        })
    }
}
