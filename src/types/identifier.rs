#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Type {
    DNS,
    IP,
}

impl Type {
    pub fn from_str(id_type: &str) -> Option<Self> {
        match id_type {
            "dns" => Some(Self::DNS),
            "ip" => Some(Self::IP),
            _ => None
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            Self::DNS => "dns".to_string(),
            Self::IP => "ip".to_string(),
        }
    }
}

impl Identifier {
    pub fn dns<S: Into<String>>(value: S) -> Identifier {
        Identifier {
            id_type: Type::DNS.to_string(),
            value: value.into(),
        }
    }

    pub fn ip(addr: std::net::IpAddr) -> Identifier {
        Identifier {
            id_type: Type::IP.to_string(),
            value: addr.to_string(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.id_type == "dns" && self.value.starts_with("*.")
    }

    /// Checks the identifier and returns its canonical form, lower-cased DNS
    /// names and re-serialised IP addresses.
    pub fn normalize(&self, strict: bool) -> Result<Identifier, super::error::Error> {
        let unsupported = |detail: String| super::error::Error::new(
            super::error::Type::UnsupportedIdentifier, 400, "Unsupported identifier", detail,
        ).with_identifier(self.clone());
        let rejected = |detail: String| super::error::Error::new(
            super::error::Type::RejectedIdentifier, 400, "Rejected identifier", detail,
        ).with_identifier(self.clone());

        match Type::from_str(&self.id_type) {
            Some(Type::DNS) => {
                let value = self.value.to_ascii_lowercase();
                let (wildcard, name) = match value.strip_prefix("*.") {
                    Some(n) => (true, n),
                    None => (false, value.as_str()),
                };
                let name = if strict {
                    name
                } else {
                    name.strip_suffix('.').unwrap_or(name)
                };
                if let Err(detail) = check_dns_name(name, strict) {
                    return Err(rejected(format!("'{}' is not a valid domain name: {}", self.value, detail)));
                }
                if name.parse::<std::net::IpAddr>().is_ok() {
                    return Err(rejected(format!("'{}' is an IP address, use an IP identifier", self.value)));
                }
                Ok(Identifier::dns(if wildcard {
                    format!("*.{}", name)
                } else {
                    name.to_string()
                }))
            }
            Some(Type::IP) => {
                let addr: std::net::IpAddr = match self.value.parse() {
                    Ok(a) => a,
                    Err(_) => return Err(rejected(format!("'{}' is not a valid IP address", self.value))),
                };
                Ok(Identifier::ip(addr))
            }
            None => Err(unsupported(format!("'{}' is not an identifier we support", self.id_type)))
        }
    }
}

fn check_dns_name(name: &str, strict: bool) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.len() > 253 {
        return Err("name is longer than 253 characters");
    }
    let labels = name.split('.').collect::<Vec<_>>();
    if strict && labels.len() < 2 {
        return Err("name must have at least two labels");
    }
    for label in &labels {
        if label.is_empty() {
            return Err("name contains an empty label");
        }
        if label.len() > 63 {
            return Err("label is longer than 63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("label starts or ends with a hyphen");
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || (!strict && c == '_');
        if !label.chars().all(allowed) {
            return Err("name contains invalid characters");
        }
    }
    if strict && labels.last().map_or(false, |l| l.chars().all(|c| c.is_ascii_digit())) {
        return Err("top level label is all numeric");
    }
    Ok(())
}
