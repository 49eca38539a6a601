use chrono::prelude::*;

#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    #[serde(skip)]
    pub id: uuid::Uuid,
    #[serde(skip)]
    pub authorization_id: uuid::Uuid,
    #[serde(rename = "type")]
    pub challenge_type: Type,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<super::error::Error>,
    pub token: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Type {
    #[serde(rename = "http-01")]
    HTTP01,
    #[serde(rename = "dns-01")]
    DNS01,
    #[serde(rename = "tls-alpn-01")]
    TLSALPN01,
}

impl Type {
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::HTTP01 => "http-01",
            Type::DNS01 => "dns-01",
            Type::TLSALPN01 => "tls-alpn-01",
        }
    }

    /// Challenge types that can prove control of `identifier`
    pub fn offered_for(identifier: &super::identifier::Identifier) -> Vec<Type> {
        match super::identifier::Type::from_str(&identifier.id_type) {
            Some(super::identifier::Type::DNS) if identifier.is_wildcard() => vec![Type::DNS01],
            Some(super::identifier::Type::DNS) => vec![Type::HTTP01, Type::DNS01, Type::TLSALPN01],
            Some(super::identifier::Type::IP) => vec![Type::HTTP01, Type::TLSALPN01],
            None => vec![],
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "invalid")]
    Invalid,
}

impl Default for Status {
    fn default() -> Status {
        Status::Pending
    }
}

impl crate::acme::store::Entity for Challenge {
    type Status = Status;
    const NAME: &'static str = "challenge";

    fn id(&self) -> uuid::Uuid {
        self.id
    }

    fn status(&self) -> Status {
        self.status
    }

    fn transition_allowed(from: Status, to: Status) -> bool {
        if from == to {
            return true;
        }
        matches!(
            (from, to),
            (Status::Pending, Status::Processing) | (Status::Processing, Status::Valid) | (Status::Processing, Status::Invalid)
        )
    }
}
