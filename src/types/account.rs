use chrono::prelude::*;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    #[serde(skip)]
    pub id: uuid::Uuid,
    pub status: Status,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    #[serde(skip)]
    pub key_fingerprint: String,
    #[serde(skip)]
    pub public_key: Vec<u8>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "deactivated")]
    Deactivated,
    #[serde(rename = "revoked")]
    Revoked
}

impl Default for Status {
    fn default() -> Status {
        Status::Valid
    }
}

impl crate::acme::store::Entity for Account {
    type Status = Status;
    const NAME: &'static str = "account";

    fn id(&self) -> uuid::Uuid {
        self.id
    }

    fn status(&self) -> Status {
        self.status
    }

    fn transition_allowed(from: Status, to: Status) -> bool {
        from == to || matches!((from, to), (Status::Valid, Status::Deactivated) | (Status::Valid, Status::Revoked))
    }
}

impl Account {
    pub fn public_key(&self) -> Result<openssl::pkey::PKey<openssl::pkey::Public>, openssl::error::ErrorStack> {
        openssl::pkey::PKey::public_key_from_der(&self.public_key)
    }
}

/// Only `mailto:` contacts with a single address and no header fields are accepted.
pub(crate) fn parse_contact(contact: &str) -> Result<String, (super::error::Type, String)> {
    let url = match url::Url::parse(contact) {
        Ok(v) => v,
        Err(_) => return Err((super::error::Type::InvalidContact, "Invalid URL formatting".to_string()))
    };
    match url.scheme() {
        "mailto" => {
            if url.query().is_some() {
                return Err((super::error::Type::InvalidContact, "hfields not allowed in mailto URL".to_string()));
            }
            let path = url.path();
            if path.contains(",") {
                return Err((super::error::Type::InvalidContact, "No more than one address per URL allowed".to_string()));
            }
            match path.split_once('@') {
                Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
                _ => return Err((super::error::Type::InvalidContact, format!("'{}' is not an email address", path)))
            }
            Ok(format!("mailto:{}", path))
        }
        _ => Err((super::error::Type::UnsupportedContact, "Unsupported URL scheme".to_string()))
    }
}

pub(crate) fn parse_contacts(contacts: &[String]) -> crate::acme::ACMEResult<Vec<String>> {
    let mut contact_objs = vec![];

    for contact in contacts {
        match parse_contact(contact) {
            Ok(c) => contact_objs.push(c),
            Err((error_type, detail)) => {
                return Err(super::error::Error {
                    error_type,
                    status: 400,
                    title: "Invalid contact".to_string(),
                    detail,
                    sub_problems: vec![],
                    instance: None,
                    identifier: None,
                });
            }
        };
    }

    Ok(contact_objs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contacts() {
        assert_eq!(parse_contacts(&["mailto:admin@example.com".to_string()]).unwrap(), vec!["mailto:admin@example.com"]);

        let err = parse_contacts(&["tel:+15555555555".to_string()]).unwrap_err();
        assert_eq!(err.error_type, super::super::error::Type::UnsupportedContact);

        for bad in ["mailto:a@example.com,b@example.com", "mailto:a@example.com?subject=hi", "mailto:nobody", "not a url"] {
            let err = parse_contacts(&[bad.to_string()]).unwrap_err();
            assert_eq!(err.error_type, super::super::error::Type::InvalidContact, "{}", bad);
        }
    }
}
