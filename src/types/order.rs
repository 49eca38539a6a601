use chrono::prelude::*;

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    #[serde(skip)]
    pub id: uuid::Uuid,
    #[serde(skip)]
    pub account_id: uuid::Uuid,
    pub status: Status,
    pub expires: DateTime<Utc>,
    pub identifiers: Vec<super::identifier::Identifier>,
    #[serde(rename = "notBefore", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "notAfter", skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<super::error::Error>,
    #[serde(skip)]
    pub authorizations: Vec<uuid::Uuid>,
    #[serde(skip)]
    pub certificate: Option<uuid::Uuid>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "ready")]
    Ready,
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

impl Status {
    pub fn is_final(&self) -> bool {
        matches!(self, Status::Valid | Status::Invalid)
    }
}

impl crate::acme::store::Entity for Order {
    type Status = Status;
    const NAME: &'static str = "order";

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
        match (from, to) {
            (Status::Pending, Status::Ready) |
            (Status::Pending, Status::Invalid) |
            (Status::Ready, Status::Processing) |
            (Status::Ready, Status::Invalid) |
            (Status::Processing, Status::Valid) |
            (Status::Processing, Status::Invalid) => true,
            _ => false
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_final() || now < self.expires {
            return false;
        }
        self.status = Status::Invalid;
        self.error = Some(super::error::Error::malformed("Order expired before it was completed"));
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderCreate {
    pub identifiers: Vec<super::identifier::Identifier>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
}
