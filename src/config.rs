use figment::providers::{Env, Format, Serialized, Toml};

/// Settings consumed by the CA core. Loaded from defaults, then an optional
/// TOML file, then `TESTCA_` prefixed environment variables
/// (e.g. `TESTCA_ALTERNATE_ROOTS=2`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the validation client probes for http-01
    pub http_port: u16,
    /// Port the validation client probes for tls-alpn-01
    pub tls_port: u16,
    pub ocsp_responder_url: Option<String>,
    pub alternate_roots: usize,
    pub strict: bool,
    /// Seconds
    pub nonce_lifetime: i64,
    pub order_lifetime: i64,
    pub pending_authz_lifetime: i64,
    pub valid_authz_lifetime: i64,
    pub cert_validity: i64,
    pub max_pending_orders: Option<usize>,
    pub rng_seed: Option<u64>,
    pub terms_of_service: Option<String>,
    pub website: Option<String>,
    pub caa_identities: Vec<String>,
    pub va_always_valid: bool,
    /// Upper bound in seconds of the random delay before a static validation completes
    pub va_sleep_max: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            http_port: 5002,
            tls_port: 5001,
            ocsp_responder_url: None,
            alternate_roots: 0,
            strict: false,
            nonce_lifetime: 60 * 60,
            order_lifetime: 60 * 60,
            pending_authz_lifetime: 60 * 60,
            valid_authz_lifetime: 30 * 24 * 60 * 60,
            cert_validity: 7 * 24 * 60 * 60,
            max_pending_orders: None,
            rng_seed: None,
            terms_of_service: None,
            website: None,
            caa_identities: vec![],
            va_always_valid: false,
            va_sleep_max: 0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to load config: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid OCSP responder URL '{0}': {1}")]
    OCSPResponderURL(String, String),
    #[error("'{0}' must be a positive number of seconds")]
    Lifetime(&'static str),
    #[error("'{0}' must be at most {1} seconds")]
    LifetimeTooLong(&'static str, i64),
}

/// 100 years, far beyond any useful test lifetime while keeping every
/// deadline well inside chrono's range.
const MAX_LIFETIME: i64 = 100 * 365 * 24 * 60 * 60;

impl Config {
    pub fn figment(path: Option<&str>) -> figment::Figment {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("TESTCA_"))
    }

    pub fn load(path: Option<&str>) -> Result<Config, ConfigError> {
        let config: Config = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ocsp_url) = &self.ocsp_responder_url {
            let url = url::Url::parse(ocsp_url)
                .map_err(|err| ConfigError::OCSPResponderURL(ocsp_url.clone(), err.to_string()))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::OCSPResponderURL(ocsp_url.clone(), "scheme must be http or https".to_string()));
            }
        }
        for (name, value) in [
            ("nonce_lifetime", self.nonce_lifetime),
            ("order_lifetime", self.order_lifetime),
            ("pending_authz_lifetime", self.pending_authz_lifetime),
            ("valid_authz_lifetime", self.valid_authz_lifetime),
            ("cert_validity", self.cert_validity),
        ] {
            if value <= 0 {
                return Err(ConfigError::Lifetime(name));
            }
            if value > MAX_LIFETIME {
                return Err(ConfigError::LifetimeTooLong(name, MAX_LIFETIME));
            }
        }
        Ok(())
    }

    pub fn nonce_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.nonce_lifetime)
    }

    pub fn order_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.order_lifetime)
    }

    pub fn pending_authz_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_authz_lifetime)
    }

    pub fn valid_authz_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.valid_authz_lifetime)
    }

    pub fn cert_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cert_validity)
    }
}
