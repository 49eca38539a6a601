use chrono::prelude::*;

#[derive(Debug, Clone)]
pub struct Certificate {
    pub id: uuid::Uuid,
    pub order_id: uuid::Uuid,
    pub account_id: uuid::Uuid,
    pub der: Vec<u8>,
    /// Index of the chain whose intermediate signed this certificate
    pub chain_index: usize,
    /// Lower case hex of the serial number
    pub serial: String,
    pub issued_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub status: Status,
    pub revocation: Option<Revocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Valid,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub reason: crate::ocsp::RevocationReason,
    pub revoked_at: DateTime<Utc>,
}

impl crate::acme::store::Entity for Certificate {
    type Status = Status;
    const NAME: &'static str = "certificate";

    fn id(&self) -> uuid::Uuid {
        self.id
    }

    fn status(&self) -> Status {
        self.status
    }

    fn transition_allowed(from: Status, to: Status) -> bool {
        from == to || (from == Status::Valid && to == Status::Revoked)
    }
}

impl Certificate {
    pub fn x509(&self) -> Result<openssl::x509::X509, openssl::error::ErrorStack> {
        openssl::x509::X509::from_der(&self.der)
    }
}
