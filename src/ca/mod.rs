//! Issuing side of the test CA.
//!
//! At startup a default chain plus any number of alternates are generated,
//! each a self-signed root and an intermediate. Every intermediate is also
//! cross-signed by every other root so a leaf can be served with a path to
//! any of the roots. Key material never changes after setup.

use chrono::prelude::*;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Extension, X509NameBuilder};
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use crate::acme::store::Store;
use crate::acme::ACMEResult;
use crate::ocsp;
use crate::types;

mod chain;
pub mod csr;

pub use chain::Chain;
pub use csr::CertificateRequest;

const SERIAL_ATTEMPTS: usize = 5;
const OCSP_VALIDITY_HOURS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unable to generate CA key material: {0}")]
    KeyMaterial(#[from] openssl::error::ErrorStack),
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("validations need a running tokio runtime")]
    NoRuntime,
}

/// Certificates returned for a download, leaf first.
#[derive(Debug, Clone)]
pub struct IssuedChain {
    pub certificates: Vec<Vec<u8>>,
    /// Number of alternate chains that can also be requested
    pub alternates: usize,
}

impl IssuedChain {
    pub fn to_pem(&self) -> String {
        crate::util::der_to_pem_chain(&self.certificates)
    }
}

pub struct CertificateAuthority {
    store: Arc<Store>,
    chains: Vec<Chain>,
    /// `cross_signed[i][j]` is intermediate `i` issued by root `j`
    cross_signed: Vec<Vec<X509>>,
    rng: Mutex<rand::rngs::StdRng>,
    ocsp_responder_url: Option<String>,
    cert_validity: chrono::Duration,
    strict: bool,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("chains", &self.chains)
            .field("ocsp_responder_url", &self.ocsp_responder_url)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    pub fn new(config: &crate::config::Config, store: Arc<Store>) -> Result<Self, SetupError> {
        config.validate()?;

        let mut rng = match config.rng_seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };

        let chains = (0..=config.alternate_roots)
            .map(|i| Chain::generate(i, &mut rng))
            .collect::<Result<Vec<_>, _>>()?;

        let mut cross_signed = Vec::with_capacity(chains.len());
        for (i, chain) in chains.iter().enumerate() {
            let mut row = Vec::with_capacity(chains.len());
            for (j, issuer) in chains.iter().enumerate() {
                row.push(if i == j {
                    chain.intermediate.clone()
                } else {
                    chain.cross_signed_by(issuer, &mut rng)?
                });
            }
            cross_signed.push(row);
        }

        info!("Generated {} certificate chain(s)", chains.len());

        Ok(CertificateAuthority {
            store,
            chains,
            cross_signed,
            rng: Mutex::new(rng),
            ocsp_responder_url: config.ocsp_responder_url.clone(),
            cert_validity: config.cert_validity(),
            strict: config.strict,
        })
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn root(&self, index: usize) -> Option<&X509> {
        self.chains.get(index).map(|c| &c.root)
    }

    pub fn root_pem(&self, index: usize) -> ACMEResult<String> {
        self.chain_pem(index, |c| &c.root)
    }

    pub fn intermediate_pem(&self, index: usize) -> ACMEResult<String> {
        self.chain_pem(index, |c| &c.intermediate)
    }

    fn chain_pem<F: Fn(&Chain) -> &X509>(&self, index: usize, f: F) -> ACMEResult<String> {
        let chain = match self.chains.get(index) {
            Some(c) => c,
            None => return Err(types::error::Error::not_found(format!("There is no chain {}", index)))
        };
        let pem = crate::try_db_result!(f(chain).to_pem(), "Unable to encode CA certificate: {}")?;
        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    pub fn parse_csr(&self, der: &[u8]) -> ACMEResult<CertificateRequest> {
        csr::parse(der, self.strict)
    }

    pub fn issue(&self, order: &types::order::Order, csr: &CertificateRequest) -> ACMEResult<types::certificate::Certificate> {
        let mut authorized = BTreeSet::new();
        for authz_id in &order.authorizations {
            let authz = self.store.authorizations().get(*authz_id)?;
            if authz.status != types::authorization::Status::Valid {
                return Err(types::error::Error::bad_csr(format!(
                    "Authorization for '{}' is not valid", authz.identifier.value
                )));
            }
            authorized.insert(authz.identifier.clone());
        }

        let requested = csr.names.iter().cloned().collect::<BTreeSet<_>>();
        if requested != authorized {
            let missing = requested.difference(&authorized).map(|i| i.value.as_str()).collect::<Vec<_>>();
            let extra = authorized.difference(&requested).map(|i| i.value.as_str()).collect::<Vec<_>>();
            return Err(types::error::Error::bad_csr(format!(
                "CSR names do not match the order; unauthorized: [{}], not requested: [{}]",
                missing.join(", "), extra.join(", ")
            )));
        }

        for _ in 0..SERIAL_ATTEMPTS {
            let (chain_index, serial) = {
                let mut rng = match self.rng.lock() {
                    Ok(r) => r,
                    Err(_) => {
                        error!("CA RNG lock poisoned");
                        return Err(crate::internal_server_error!());
                    }
                };
                let chain_index = rng.gen_range(0..self.chains.len());
                let serial = crate::try_db_result!(chain::random_serial(&mut *rng), "Unable to generate serial: {}")?;
                (chain_index, serial)
            };

            let now = self.store.now();
            let not_after = crate::util::checked_deadline(now, self.cert_validity)?;
            let der = crate::try_db_result!(
                self.sign_leaf(chain_index, &serial, csr, now, not_after),
                "Unable to sign certificate: {}"
            )?;

            let cert = types::certificate::Certificate {
                id: uuid::Uuid::new_v4(),
                order_id: order.id,
                account_id: order.account_id,
                der,
                chain_index,
                serial: hex::encode(serial.to_vec()),
                issued_at: now,
                not_before: now,
                not_after,
                status: types::certificate::Status::Valid,
                revocation: None,
            };
            match self.store.create_certificate(cert) {
                Ok(cert) => {
                    info!(
                        "Issued certificate {} (serial {}) for order {} from chain {}",
                        crate::util::uuid_as_b64(&cert.id), cert.serial,
                        crate::util::uuid_as_b64(&order.id), chain_index
                    );
                    return Ok(cert);
                }
                Err(err) if err.kind() == types::error::ErrorKind::Conflict => {
                    warn!("Serial collision issuing for order {}, retrying", crate::util::uuid_as_b64(&order.id));
                    continue;
                }
                Err(err) => return Err(err)
            }
        }

        error!("Unable to find a free serial after {} attempts", SERIAL_ATTEMPTS);
        Err(types::error::Error::new(
            types::error::Type::Issuance, 500, "Issuance failed", "Unable to allocate a serial number",
        ))
    }

    fn sign_leaf(
        &self, chain_index: usize, serial: &openssl::bn::BigNumRef, csr: &CertificateRequest,
        not_before: DateTime<Utc>, not_after: DateTime<Utc>,
    ) -> Result<Vec<u8>, openssl::error::ErrorStack> {
        let chain = &self.chains[chain_index];

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&*serial.to_asn1_integer()?)?;
        let mut subject = X509NameBuilder::new()?;
        if let Some(cn) = csr.common_name.as_ref().or_else(|| csr.names.first().map(|n| &n.value)) {
            // A CN is limited to 64 characters, long names only live in the SAN
            if cn.len() <= 64 {
                subject.append_entry_by_nid(Nid::COMMONNAME, &cn.to_ascii_lowercase())?;
            }
        }
        builder.set_subject_name(&subject.build())?;
        builder.set_issuer_name(chain.intermediate.subject_name())?;
        builder.set_pubkey(&csr.public_key)?;
        builder.set_not_before(&*Asn1Time::from_unix(not_before.timestamp())?)?;
        builder.set_not_after(&*Asn1Time::from_unix(not_after.timestamp())?)?;

        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        let mut key_usage = KeyUsage::new();
        key_usage.critical().digital_signature();
        if csr.public_key.id() == Id::RSA {
            key_usage.key_encipherment();
        }
        builder.append_extension(key_usage.build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;

        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(&chain.intermediate), None))?;
        builder.append_extension(ski)?;
        let aki = AuthorityKeyIdentifier::new().keyid(true)
            .build(&builder.x509v3_context(Some(&chain.intermediate), None))?;
        builder.append_extension(aki)?;

        let mut san = SubjectAlternativeName::new();
        for name in &csr.names {
            match types::identifier::Type::from_str(&name.id_type) {
                Some(types::identifier::Type::IP) => san.ip(&name.value),
                _ => san.dns(&name.value),
            };
        }
        let san = san.build(&builder.x509v3_context(Some(&chain.intermediate), None))?;
        builder.append_extension(san)?;

        if let Some(ocsp_url) = &self.ocsp_responder_url {
            #[allow(deprecated)]
            let aia = X509Extension::new_nid(
                None, None, Nid::INFO_ACCESS, &format!("OCSP;URI:{}", ocsp_url),
            )?;
            builder.append_extension(aia)?;
        }

        builder.sign(&chain.intermediate_key, MessageDigest::sha256())?;
        builder.build().to_der()
    }

    /// Leaf to root DER chain. `alternate` 0 is the chain the certificate was
    /// issued from; `1..` walk the other roots in order via cross-signed
    /// intermediates.
    pub fn get_chain(&self, cert: &types::certificate::Certificate, alternate: usize) -> ACMEResult<IssuedChain> {
        let issued_from = cert.chain_index;
        let alternates = self.chains.len() - 1;

        let (intermediate, root) = if alternate == 0 {
            let chain = match self.chains.get(issued_from) {
                Some(c) => c,
                None => {
                    error!("Certificate {} references unknown chain {}", cert.serial, issued_from);
                    return Err(crate::internal_server_error!());
                }
            };
            (&chain.intermediate, &chain.root)
        } else {
            let root_index = match (0..self.chains.len()).filter(|j| *j != issued_from).nth(alternate - 1) {
                Some(j) => j,
                None => return Err(types::error::Error::not_found(format!(
                    "There is no alternate chain {}, {} available", alternate, alternates
                )))
            };
            (&self.cross_signed[issued_from][root_index], &self.chains[root_index].root)
        };

        let mut certificates = vec![cert.der.clone()];
        for ca_cert in [intermediate, root] {
            certificates.push(crate::try_db_result!(ca_cert.to_der(), "Unable to encode CA certificate: {}")?);
        }

        Ok(IssuedChain {
            certificates,
            alternates,
        })
    }

    pub fn get_chain_by_serial(&self, serial: &str, alternate: usize) -> ACMEResult<IssuedChain> {
        match self.store.certificate_by_serial(serial)? {
            Some(cert) => self.get_chain(&cert, alternate),
            None => Err(types::error::Error::not_found(format!("No certificate with serial {}", serial)))
        }
    }

    /// Records a revocation. Repeating the same reason is a no-op and the only
    /// allowed change of reason is an upgrade to keyCompromise, which keeps the
    /// original revocation time.
    pub fn revoke(&self, cert_id: uuid::Uuid, reason_code: u8) -> ACMEResult<types::certificate::Certificate> {
        let reason = match ocsp::RevocationReason::from_code(reason_code) {
            Some(r) if r.subscriber_selectable() => r,
            _ => return Err(types::error::Error::new(
                types::error::Type::BadRevocationReason, 400, "Bad revocation reason",
                format!("Revocation reason {} is not allowed", reason_code),
            ))
        };

        let now = self.store.now();
        let cert = self.store.certificates().update_if_status_in(
            cert_id,
            &[types::certificate::Status::Valid, types::certificate::Status::Revoked],
            |cert| {
                cert.revocation = match cert.revocation {
                    None => Some(types::certificate::Revocation {
                        reason,
                        revoked_at: now,
                    }),
                    Some(existing) if existing.reason == reason => Some(existing),
                    Some(existing) if reason == ocsp::RevocationReason::KeyCompromise => Some(types::certificate::Revocation {
                        reason,
                        revoked_at: existing.revoked_at,
                    }),
                    Some(existing) => return Err(types::error::Error::new(
                        types::error::Type::AlreadyRevoked, 400, "Already revoked",
                        format!("Certificate is already revoked for {}", existing.reason),
                    ))
                };
                cert.status = types::certificate::Status::Revoked;
                Ok(())
            },
        )?;

        info!("Certificate {} revoked ({})", cert.serial, reason);
        Ok(cert)
    }

    pub fn ocsp_status(&self, serial: &str) -> ACMEResult<ocsp::OCSPStatus> {
        let now = self.store.now();
        let cert_status = match self.store.certificate_by_serial(serial)? {
            None => ocsp::CertStatus::Unknown,
            Some(cert) => match cert.revocation {
                None => ocsp::CertStatus::Good,
                Some(revocation) => ocsp::CertStatus::Revoked(ocsp::RevokedInfo {
                    revocation_time: revocation.revoked_at,
                    revocation_reason: Some(revocation.reason),
                }),
            }
        };

        Ok(ocsp::OCSPStatus {
            serial: serial.to_ascii_lowercase(),
            cert_status,
            this_update: now,
            next_update: now.checked_add_signed(chrono::Duration::hours(OCSP_VALIDITY_HOURS)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{authorization, identifier, order};
    use crate::util::SystemClock;

    fn ca(alternate_roots: usize) -> CertificateAuthority {
        let mut config = crate::config::Config::default();
        config.alternate_roots = alternate_roots;
        config.rng_seed = Some(42);
        config.ocsp_responder_url = Some("http://127.0.0.1:4002/".to_string());
        CertificateAuthority::new(&config, Arc::new(Store::new(Arc::new(SystemClock)))).unwrap()
    }

    fn valid_order(ca: &CertificateAuthority, names: &[&str]) -> order::Order {
        let now = ca.store.now();
        let account_id = uuid::Uuid::new_v4();
        let authorizations = names.iter().map(|n| {
            let authz = ca.store.create_authorization(authorization::Authorization {
                id: uuid::Uuid::new_v4(),
                account_id,
                identifier: identifier::Identifier::dns(*n),
                status: authorization::Status::Pending,
                expires: now + chrono::Duration::hours(1),
                challenges: vec![],
                wildcard: false,
            }).unwrap();
            ca.store.authorizations().update_if_status(authz.id, authorization::Status::Pending, |a| {
                a.status = authorization::Status::Valid;
                Ok(())
            }).unwrap().id
        }).collect();
        ca.store.create_order(order::Order {
            id: uuid::Uuid::new_v4(),
            account_id,
            status: order::Status::Processing,
            expires: now + chrono::Duration::hours(1),
            identifiers: names.iter().map(|n| identifier::Identifier::dns(*n)).collect(),
            not_before: None,
            not_after: None,
            error: None,
            authorizations,
            certificate: None,
            created_at: now,
        }).unwrap()
    }

    fn csr(ca: &CertificateAuthority, names: &[&str]) -> CertificateRequest {
        let key = chain::generate_key().unwrap();
        ca.parse_csr(&csr::tests::make_csr(&key, names.first().copied(), names)).unwrap()
    }

    #[test]
    fn issues_leaf_with_requested_names() {
        let ca = ca(0);
        let order = valid_order(&ca, &["example.com", "www.example.com"]);
        let cert = ca.issue(&order, &csr(&ca, &["www.example.com", "example.com"])).unwrap();

        let x509 = cert.x509().unwrap();
        let sans = x509.subject_alt_names().unwrap().iter()
            .filter_map(|n| n.dnsname().map(str::to_string)).collect::<Vec<_>>();
        assert_eq!(sans, vec!["example.com".to_string(), "www.example.com".to_string()]);
        assert!(x509.verify(&ca.chains[0].intermediate.public_key().unwrap()).unwrap());
        assert_eq!(ca.store.certificate_by_serial(&cert.serial).unwrap().unwrap().id, cert.id);
        assert!(hex::decode(&cert.serial).unwrap().len() == 16);
    }

    #[test]
    fn rejects_mismatched_names() {
        let ca = ca(0);
        let order = valid_order(&ca, &["example.com"]);
        let err = ca.issue(&order, &csr(&ca, &["example.com", "evil.example.com"])).unwrap_err();
        assert_eq!(err.error_type, types::error::Type::BadCSR);
        let err = ca.issue(&order, &csr(&ca, &["other.example.com"])).unwrap_err();
        assert_eq!(err.error_type, types::error::Type::BadCSR);
    }

    #[test]
    fn alternate_chains_end_at_every_root() {
        let ca = ca(2);
        let order = valid_order(&ca, &["example.com"]);
        let cert = ca.issue(&order, &csr(&ca, &["example.com"])).unwrap();

        let mut roots = BTreeSet::new();
        for alternate in 0..=2 {
            let issued = ca.get_chain(&cert, alternate).unwrap();
            assert_eq!(issued.alternates, 2);
            let certs = issued.certificates.iter().map(|c| X509::from_der(c).unwrap()).collect::<Vec<_>>();
            assert_eq!(certs.len(), 3);
            for pair in certs.windows(2) {
                assert!(pair[0].verify(&pair[1].public_key().unwrap()).unwrap());
            }
            let root = certs.last().unwrap();
            assert!(root.verify(&root.public_key().unwrap()).unwrap());
            roots.insert(root.to_der().unwrap());
        }
        assert_eq!(roots.len(), 3);
        assert_eq!(ca.get_chain(&cert, 3).unwrap_err().kind(), types::error::ErrorKind::NotFound);
    }

    #[test]
    fn revocation_rules() {
        let ca = ca(0);
        let order = valid_order(&ca, &["example.com"]);
        let cert = ca.issue(&order, &csr(&ca, &["example.com"])).unwrap();

        assert!(matches!(ca.ocsp_status(&cert.serial).unwrap().cert_status, ocsp::CertStatus::Good));
        assert_eq!(ca.revoke(cert.id, 7).unwrap_err().error_type, types::error::Type::BadRevocationReason);
        assert_eq!(ca.revoke(cert.id, 6).unwrap_err().error_type, types::error::Type::BadRevocationReason);

        let first = ca.revoke(cert.id, 4).unwrap();
        let again = ca.revoke(cert.id, 4).unwrap();
        assert_eq!(first.revocation, again.revocation);
        assert_eq!(ca.revoke(cert.id, 5).unwrap_err().error_type, types::error::Type::AlreadyRevoked);

        let upgraded = ca.revoke(cert.id, 1).unwrap().revocation.unwrap();
        assert_eq!(upgraded.reason, ocsp::RevocationReason::KeyCompromise);
        assert_eq!(upgraded.revoked_at, first.revocation.unwrap().revoked_at);

        match ca.ocsp_status(&cert.serial.to_ascii_uppercase()).unwrap().cert_status {
            ocsp::CertStatus::Revoked(info) => assert_eq!(info.revocation_reason, Some(ocsp::RevocationReason::KeyCompromise)),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(matches!(ca.ocsp_status("00ff").unwrap().cert_status, ocsp::CertStatus::Unknown));
    }

    #[test]
    fn seeded_chain_selection_is_deterministic() {
        let picks = |ca: &CertificateAuthority| {
            let order = valid_order(ca, &["example.com"]);
            (0..8).map(|_| ca.issue(&order, &csr(ca, &["example.com"])).unwrap().chain_index).collect::<Vec<_>>()
        };
        let a = ca(3);
        let b = ca(3);
        assert_eq!(picks(&a), picks(&b));
    }

    #[test]
    fn exposes_root_pem() {
        let ca = ca(1);
        assert!(ca.root_pem(1).unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ca.intermediate_pem(0).is_ok());
        assert_eq!(ca.root_pem(2).unwrap_err().kind(), types::error::ErrorKind::NotFound);
    }
}
