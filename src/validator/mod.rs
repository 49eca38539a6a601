use base64::prelude::*;
use rand::Rng;
use crate::types;

/// Everything a validation client needs to probe one challenge.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    pub challenge_id: uuid::Uuid,
    pub challenge_type: types::challenge::Type,
    pub identifier: types::identifier::Identifier,
    pub token: String,
    pub account_thumbprint: String,
    pub http_port: u16,
    pub tls_port: u16,
    pub strict: bool,
}

impl ValidationRequest {
    pub fn key_authorization(&self) -> String {
        format!("{}.{}", self.token, self.account_thumbprint)
    }

    fn key_authorization_digest(&self) -> Vec<u8> {
        openssl::sha::sha256(self.key_authorization().as_bytes()).to_vec()
    }

    /// Where an http-01 response is expected to be served
    pub fn http01_url(&self) -> String {
        match self.identifier.value.parse::<std::net::IpAddr>() {
            Ok(std::net::IpAddr::V6(ipv6)) => format!(
                "http://[{}]:{}/.well-known/acme-challenge/{}", ipv6, self.http_port, self.token
            ),
            _ => format!(
                "http://{}:{}/.well-known/acme-challenge/{}", self.identifier.value, self.http_port, self.token
            ),
        }
    }

    pub fn dns01_record_name(&self) -> String {
        let domain = self.identifier.value.trim_start_matches("*.").trim_end_matches('.');
        format!("_acme-challenge.{}.", domain)
    }

    pub fn dns01_txt_value(&self) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(self.key_authorization_digest())
    }

    /// Contents of the acmeIdentifier extension a tls-alpn-01 certificate must carry
    pub fn tlsalpn01_digest(&self) -> Vec<u8> {
        self.key_authorization_digest()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(types::error::Error),
}

/// Performs the out-of-band domain control check for one challenge.
/// Implementations must report every failure as an outcome rather than panic.
#[async_trait::async_trait]
pub trait ValidationClient: Send + Sync {
    async fn validate(&self, request: ValidationRequest) -> ValidationOutcome;
}

/// Answers without touching the network: every challenge passes when
/// `always_valid` is set, otherwise every challenge fails as if the expected
/// response was missing.
#[derive(Debug, Clone)]
pub struct StaticValidator {
    always_valid: bool,
    sleep_max: std::time::Duration,
}

impl StaticValidator {
    pub fn new(always_valid: bool, sleep_max: std::time::Duration) -> Self {
        StaticValidator {
            always_valid,
            sleep_max,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.va_always_valid, std::time::Duration::from_secs(config.va_sleep_max))
    }
}

#[async_trait::async_trait]
impl ValidationClient for StaticValidator {
    async fn validate(&self, request: ValidationRequest) -> ValidationOutcome {
        if !self.sleep_max.is_zero() {
            let delay = rand::thread_rng().gen_range(std::time::Duration::ZERO..=self.sleep_max);
            debug!("Sleeping {:?} before validating {}", delay, crate::util::uuid_as_b64(&request.challenge_id));
            tokio::time::sleep(delay).await;
        }

        if self.always_valid {
            ValidationOutcome::Valid
        } else {
            ValidationOutcome::Invalid(types::error::Error::new(
                types::error::Type::IncorrectResponse, 403, "Validation failed",
                format!("No {} response found for {}", request.challenge_type, request.identifier.value),
            ).with_identifier(request.identifier))
        }
    }
}
