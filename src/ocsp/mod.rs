use chrono::prelude::*;

/// Answer to an OCSP status query for one serial, before any DER encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OCSPStatus {
    /// Lower case hex serial the query was for
    pub serial: String,
    pub cert_status: CertStatus,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Unknown,
    Revoked(RevokedInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokedInfo {
    pub revocation_time: DateTime<Utc>,
    pub revocation_reason: Option<RevocationReason>
}

/// RFC 5280 CRLReason codes. Code 7 is unassigned.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}

impl RevocationReason {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unspecified),
            1 => Some(Self::KeyCompromise),
            2 => Some(Self::CACompromise),
            3 => Some(Self::AffiliationChanged),
            4 => Some(Self::Superseded),
            5 => Some(Self::CessationOfOperation),
            6 => Some(Self::CertificateHold),
            8 => Some(Self::RemoveFromCRL),
            9 => Some(Self::PrivilegeWithdrawn),
            10 => Some(Self::AACompromise),
            _ => None
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Whether a subscriber may ask for this reason on revocation.
    pub fn subscriber_selectable(&self) -> bool {
        !matches!(self, Self::CertificateHold | Self::RemoveFromCRL)
    }
}

impl std::fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CACompromise => "cACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCRL => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AACompromise => "aACompromise",
        })
    }
}
