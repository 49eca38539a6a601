use chrono::prelude::*;

#[derive(Debug, Clone, Serialize)]
pub struct Authorization {
    #[serde(skip)]
    pub id: uuid::Uuid,
    #[serde(skip)]
    pub account_id: uuid::Uuid,
    pub identifier: super::identifier::Identifier,
    pub status: Status,
    pub expires: DateTime<Utc>,
    #[serde(skip)]
    pub challenges: Vec<uuid::Uuid>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "invalid")]
    Invalid,
    #[serde(rename = "deactivated")]
    Deactivated,
    #[serde(rename = "expired")]
    Expired,
}

impl Default for Status {
    fn default() -> Status {
        Status::Pending
    }
}

impl crate::acme::store::Entity for Authorization {
    type Status = Status;
    const NAME: &'static str = "authorization";

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
            (Status::Pending, Status::Valid) |
            (Status::Pending, Status::Invalid) |
            (Status::Pending, Status::Deactivated) |
            (Status::Pending, Status::Expired) |
            (Status::Valid, Status::Deactivated) |
            (Status::Valid, Status::Expired) => true,
            _ => false
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) -> bool {
        match self.status {
            Status::Pending | Status::Valid if now >= self.expires => {
                self.status = Status::Expired;
                true
            }
            _ => false
        }
    }
}

impl Authorization {
    /// Reuse key, the identifier value including any wildcard prefix.
    pub fn reuse_key(&self) -> (uuid::Uuid, String) {
        (self.account_id, self.identifier.value.clone())
    }

    pub fn is_reusable(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Valid && now < self.expires
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::store::Entity;

    fn authz(status: Status, expires: DateTime<Utc>) -> Authorization {
        Authorization {
            id: uuid::Uuid::new_v4(),
            account_id: uuid::Uuid::new_v4(),
            identifier: super::super::identifier::Identifier::dns("example.com"),
            status,
            expires,
            challenges: vec![],
            wildcard: false,
        }
    }

    #[test]
    fn expiry_is_lazy_and_final() {
        let now = Utc::now();
        let mut a = authz(Status::Valid, now + chrono::Duration::minutes(5));
        assert!(!a.expire(now));
        assert!(a.is_reusable(now));
        assert!(a.expire(now + chrono::Duration::minutes(5)));
        assert_eq!(a.status, Status::Expired);
        assert!(!a.is_reusable(now));
        assert!(!Authorization::transition_allowed(Status::Expired, Status::Valid));

        let mut invalid = authz(Status::Invalid, now);
        assert!(!invalid.expire(now + chrono::Duration::days(1)));
        assert_eq!(invalid.status, Status::Invalid);
    }
}
