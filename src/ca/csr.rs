use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Public};
use openssl::x509::{X509, X509Req};
use crate::acme::ACMEResult;
use crate::types;

const MIN_RSA_BITS: u32 = 2048;

/// A decoded certificate signing request whose self-signature has been checked.
#[derive(Debug)]
pub struct CertificateRequest {
    pub public_key: PKey<Public>,
    pub common_name: Option<String>,
    /// Requested names, normalised, sorted and de-duplicated
    pub names: Vec<types::identifier::Identifier>,
}

fn name_to_identifier(name: &str) -> types::identifier::Identifier {
    match name.parse::<std::net::IpAddr>() {
        Ok(ip) => types::identifier::Identifier::ip(ip),
        Err(_) => types::identifier::Identifier::dns(name.to_ascii_lowercase()),
    }
}

pub fn parse(der: &[u8], strict: bool) -> ACMEResult<CertificateRequest> {
    let req = match X509Req::from_der(der) {
        Ok(r) => r,
        Err(_) => return Err(types::error::Error::bad_csr("Unable to decode CSR"))
    };
    let public_key = match req.public_key() {
        Ok(k) => k,
        Err(_) => return Err(types::error::Error::bad_csr("CSR public key is unreadable"))
    };
    match req.verify(&public_key) {
        Ok(true) => {}
        _ => return Err(types::error::Error::bad_csr("CSR signature does not verify"))
    }
    check_public_key(&public_key)?;

    let common_name = match req.subject_name().entries_by_nid(Nid::COMMONNAME).next() {
        Some(entry) => match entry.data().as_utf8() {
            Ok(cn) => Some(cn.to_string()),
            Err(_) => return Err(types::error::Error::bad_csr("CSR common name is not valid UTF-8"))
        },
        None => None
    };

    let mut san_names = vec![];
    // Requests carry no extensions at all when no SAN was asked for
    if let Ok(extensions) = req.extensions() {
        // X509Req has no SAN accessor; reading the extensions back through a
        // scratch certificate does.
        let mut scratch = crate::try_db_result!(X509::builder(), "Unable to create scratch certificate: {}")?;
        for extension in extensions {
            if scratch.append_extension(extension).is_err() {
                return Err(types::error::Error::bad_csr("CSR contains an invalid extension"));
            }
        }
        let scratch = scratch.build();
        if let Some(sans) = scratch.subject_alt_names() {
            for san in sans.iter() {
                if let Some(dns) = san.dnsname() {
                    san_names.push(types::identifier::Identifier::dns(dns.to_ascii_lowercase()));
                } else if let Some(ip) = san.ipaddress() {
                    let addr = match ip.len() {
                        4 => std::net::IpAddr::from(<[u8; 4]>::try_from(ip).unwrap_or_default()),
                        16 => std::net::IpAddr::from(<[u8; 16]>::try_from(ip).unwrap_or_default()),
                        _ => return Err(types::error::Error::bad_csr("CSR contains a malformed IP address SAN"))
                    };
                    san_names.push(types::identifier::Identifier::ip(addr));
                } else {
                    return Err(types::error::Error::bad_csr("CSR contains an unsupported SAN type"));
                }
            }
        }
    }

    let mut names = san_names.clone();
    if let Some(cn) = &common_name {
        let cn_identifier = name_to_identifier(cn);
        if strict && !san_names.contains(&cn_identifier) {
            return Err(types::error::Error::bad_csr(format!(
                "CSR common name '{}' does not appear in its subject alternative names", cn
            )));
        }
        names.push(cn_identifier);
    }

    let mut errors = vec![];
    let mut normalized = vec![];
    for name in &names {
        match name.normalize(strict) {
            Ok(n) => normalized.push(n),
            Err(e) => errors.push(types::error::Error::bad_csr(e.detail).with_identifier(name.clone())),
        }
    }
    crate::util::error_list_to_result(errors, "CSR contains invalid names".to_string())?;

    normalized.sort();
    normalized.dedup();
    if normalized.is_empty() {
        return Err(types::error::Error::bad_csr("CSR requests no names"));
    }

    Ok(CertificateRequest {
        public_key,
        common_name,
        names: normalized,
    })
}

fn check_public_key(key: &PKey<Public>) -> ACMEResult<()> {
    let bad_key = |detail: String| types::error::Error::new(
        types::error::Type::BadPublicKey, 400, "Bad public key", detail,
    );
    match key.id() {
        Id::RSA if key.bits() < MIN_RSA_BITS => Err(bad_key(format!(
            "RSA keys must be at least {} bits, got {}", MIN_RSA_BITS, key.bits()
        ))),
        Id::RSA | Id::EC | Id::ED25519 => Ok(()),
        _ => Err(bad_key("Unsupported key type".to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use openssl::hash::MessageDigest;
    use openssl::pkey::Private;
    use openssl::stack::Stack;
    use openssl::x509::extension::SubjectAlternativeName;

    pub(crate) fn make_csr(key: &PKey<Private>, cn: Option<&str>, sans: &[&str]) -> Vec<u8> {
        let mut req_builder = X509Req::builder().unwrap();
        if let Some(cn) = cn {
            let mut name = openssl::x509::X509Name::builder().unwrap();
            name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
            req_builder.set_subject_name(&name.build()).unwrap();
        }
        if !sans.is_empty() {
            let mut san_builder = SubjectAlternativeName::new();
            for entry in sans {
                if entry.parse::<std::net::IpAddr>().is_ok() {
                    san_builder.ip(entry);
                } else {
                    san_builder.dns(entry);
                }
            }
            let san_extension = san_builder.build(&req_builder.x509v3_context(None)).unwrap();
            let mut stack = Stack::new().unwrap();
            stack.push(san_extension).unwrap();
            req_builder.add_extensions(&stack).unwrap();
        }
        req_builder.set_pubkey(key).unwrap();
        req_builder.sign(key, MessageDigest::sha256()).unwrap();
        req_builder.build().to_der().unwrap()
    }

    pub(crate) fn test_key() -> PKey<Private> {
        super::super::chain::generate_key().unwrap()
    }

    #[test]
    fn collects_cn_and_sans() {
        let csr = make_csr(&test_key(), Some("Example.com"), &["www.example.com", "example.com", "192.0.2.1"]);
        let parsed = parse(&csr, false).unwrap();
        assert_eq!(parsed.common_name.as_deref(), Some("Example.com"));
        assert_eq!(parsed.names, vec![
            types::identifier::Identifier::dns("example.com"),
            types::identifier::Identifier::dns("www.example.com"),
            types::identifier::Identifier::ip("192.0.2.1".parse().unwrap()),
        ]);
    }

    #[test]
    fn strict_requires_cn_in_sans() {
        let csr = make_csr(&test_key(), Some("other.example.com"), &["example.com"]);
        assert_eq!(parse(&csr, true).unwrap_err().error_type, types::error::Type::BadCSR);
        assert_eq!(parse(&csr, false).unwrap().names.len(), 2);
    }

    #[test]
    fn rejects_garbage_and_empty_requests() {
        assert_eq!(parse(b"not a csr", false).unwrap_err().error_type, types::error::Type::BadCSR);
        let csr = make_csr(&test_key(), None, &[]);
        assert_eq!(parse(&csr, false).unwrap_err().error_type, types::error::Type::BadCSR);
    }

    #[test]
    fn rejects_tampered_signature() {
        let mut csr = make_csr(&test_key(), Some("example.com"), &["example.com"]);
        let last = csr.len() - 1;
        csr[last] ^= 0xff;
        assert_eq!(parse(&csr, false).unwrap_err().error_type, types::error::Type::BadCSR);
    }

    #[test]
    fn rejects_short_rsa_keys() {
        let rsa = PKey::from_rsa(openssl::rsa::Rsa::generate(1024).unwrap()).unwrap();
        let csr = make_csr(&rsa, Some("example.com"), &["example.com"]);
        assert_eq!(parse(&csr, false).unwrap_err().error_type, types::error::Type::BadPublicKey);
    }
}
