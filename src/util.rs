use base64::prelude::*;

pub fn uuid_as_b64(uuid: &uuid::Uuid) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(uuid.as_bytes())
}

pub fn b64_to_uuid(b64: &str) -> Option<uuid::Uuid> {
    let uuid_bytes = match BASE64_URL_SAFE_NO_PAD.decode(b64) {
        Ok(n) => n,
        Err(_) => {
            return None;
        }
    };
    let uuid_obj = match uuid::Uuid::from_slice(&uuid_bytes) {
        Ok(u) => u,
        Err(_) => {
            return None
        }
    };
    Some(uuid_obj)
}

/// Random base64url token with 256 bits of entropy, used for challenge tokens
pub fn new_token() -> crate::acme::ACMEResult<String> {
    let mut buf = [0u8; 32];
    crate::try_db_result!(openssl::rand::rand_bytes(&mut buf), "Unable to generate random token: {}")?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(buf))
}

pub fn error_list_to_result<D: Into<Option<String>>>(
    mut errors: Vec<crate::types::error::Error>, compound_detail: D
) -> Result<(), crate::types::error::Error> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(crate::types::error::Error {
            error_type: crate::types::error::Type::Compound,
            status: 400,
            title: "Compound errors".to_string(),
            detail: match compound_detail.into() {
                Some(d) => d,
                None => "Multiple errors make this request invalid".to_string(),
            },
            sub_problems: errors,
            instance: None,
            identifier: None,
        })
    }
}

/// `from + lifetime`, or serverInternal when that falls outside the
/// representable range.
pub fn checked_deadline(
    from: chrono::DateTime<chrono::Utc>, lifetime: chrono::Duration,
) -> crate::acme::ACMEResult<chrono::DateTime<chrono::Utc>> {
    match from.checked_add_signed(lifetime) {
        Some(d) => Ok(d),
        None => {
            error!("Deadline {} after {} is out of range", lifetime, from);
            Err(crate::internal_server_error!())
        }
    }
}

/// Source of the current time, swapped for a [`ManualClock`] when deadlines need testing.
pub trait Clock: std::fmt::Debug + Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock(std::sync::Mutex<chrono::DateTime<chrono::Utc>>);

impl ManualClock {
    pub fn new(start: chrono::DateTime<chrono::Utc>) -> Self {
        Self(std::sync::Mutex::new(start))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = match self.0.lock() {
            Ok(n) => n,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now = *now + by;
    }

    pub fn set(&self, to: chrono::DateTime<chrono::Utc>) {
        let mut now = match self.0.lock() {
            Ok(n) => n,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        match self.0.lock() {
            Ok(n) => *n,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Splits DER encoded certificates into a PEM bundle
pub fn der_to_pem_chain(certs: &[Vec<u8>]) -> String {
    certs.iter().map(|c| {
        let cert_b64 = BASE64_STANDARD.encode(c)
            .as_bytes().chunks(64)
            .map(|buf| String::from_utf8_lossy(buf).into_owned())
            .collect::<Vec<String>>().join("\n");

        format!("-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n", cert_b64)
    }).collect::<Vec<_>>().join("")
}
