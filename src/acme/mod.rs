//! The ACME protocol state machine.
//!
//! [`Engine`] is what a router calls once it has parsed and authenticated a
//! request. Every operation returns its result wrapped in a [`ReplayNonce`]
//! carrying the next nonce for the client; mutating operations first redeem
//! the nonce the client sent.

use chrono::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use crate::types;

pub mod links;
pub mod processing;
pub mod replay;
pub mod store;

pub use links::LinkHeader;
pub use replay::{NonceManager, RedeemError, ReplayNonce};

pub type ACMEResult<I> = Result<I, types::error::Error>;

/// How a revocation request proves it may revoke a certificate.
#[derive(Debug)]
pub enum RevocationProof {
    /// Signed by an account; it must own the certificate or hold valid
    /// authorizations for every name in it
    Account(uuid::Uuid),
    /// Signed by the certificate's own key
    CertificateKey(openssl::pkey::PKey<openssl::pkey::Public>),
}

#[derive(Debug, Clone)]
pub struct AuthorizationDetail {
    pub authorization: types::authorization::Authorization,
    pub challenges: Vec<types::challenge::Challenge>,
}

#[derive(Debug, Clone)]
pub struct CertificateDownload {
    pub certificate: types::certificate::Certificate,
    pub chain: crate::ca::IssuedChain,
    pub links: Vec<LinkHeader>,
}

impl CertificateDownload {
    pub fn to_pem(&self) -> String {
        self.chain.to_pem()
    }
}

#[derive(Debug)]
pub struct Engine {
    config: crate::config::Config,
    store: Arc<store::Store>,
    nonces: NonceManager,
    ca: Arc<crate::ca::CertificateAuthority>,
    validations: mpsc::UnboundedSender<processing::ValidationTask>,
}

impl Engine {
    /// Must be called from within a tokio runtime, validations run on it.
    pub fn new(
        config: crate::config::Config, validator: Arc<dyn crate::validator::ValidationClient>,
    ) -> Result<Engine, crate::ca::SetupError> {
        Self::with_clock(config, validator, Arc::new(crate::util::SystemClock))
    }

    pub fn with_clock(
        config: crate::config::Config, validator: Arc<dyn crate::validator::ValidationClient>,
        clock: Arc<dyn crate::util::Clock>,
    ) -> Result<Engine, crate::ca::SetupError> {
        config.validate()?;
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(r) => r,
            Err(_) => return Err(crate::ca::SetupError::NoRuntime)
        };

        let store = Arc::new(store::Store::new(clock.clone()));
        let ca = Arc::new(crate::ca::CertificateAuthority::new(&config, store.clone())?);
        let nonces = NonceManager::new(config.nonce_lifetime(), clock);
        let validations = processing::spawn(&runtime, store.clone(), validator, config.valid_authz_lifetime());

        info!(
            "ACME engine ready: {} chain(s), strict mode {}",
            ca.chain_count(), if config.strict { "on" } else { "off" }
        );

        Ok(Engine {
            config,
            store,
            nonces,
            ca,
            validations,
        })
    }

    pub fn store(&self) -> &Arc<store::Store> {
        &self.store
    }

    pub fn ca(&self) -> &Arc<crate::ca::CertificateAuthority> {
        &self.ca
    }

    pub fn config(&self) -> &crate::config::Config {
        &self.config
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    fn respond<T>(&self, inner: ACMEResult<T>) -> ReplayNonce<ACMEResult<T>> {
        if let Err(err) = &inner {
            debug!("Request failed: {}", err);
        }
        ReplayNonce {
            nonce: self.nonces.issue(),
            inner,
        }
    }

    fn redeem(&self, nonce: &str) -> ACMEResult<()> {
        match self.nonces.redeem(nonce) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!("Rejecting nonce '{}': {:?}", nonce, err);
                Err(err.into())
            }
        }
    }

    fn active_account(&self, account_id: uuid::Uuid) -> ACMEResult<types::account::Account> {
        let account = match self.store.accounts().get(account_id) {
            Ok(a) => a,
            Err(err) if err.kind() == types::error::ErrorKind::NotFound => {
                return Err(types::error::Error::new(
                    types::error::Type::AccountDoesNotExist, 400, "Account does not exist",
                    "No account exists with the provided ID",
                ));
            }
            Err(err) => return Err(err)
        };
        if account.status != types::account::Status::Valid {
            return Err(types::error::Error::unauthorized(format!("Account is {:?}", account.status)));
        }
        Ok(account)
    }

    fn check_owner(account: &types::account::Account, owner: uuid::Uuid, what: &str) -> ACMEResult<()> {
        if account.id != owner {
            return Err(types::error::Error::unauthorized(format!("Account does not own this {}", what)));
        }
        Ok(())
    }

    pub fn new_nonce(&self) -> ReplayNonce<()> {
        ReplayNonce {
            nonce: self.nonces.issue(),
            inner: (),
        }
    }

    pub fn capabilities(&self) -> types::directory::Capabilities {
        types::directory::Capabilities {
            meta: types::directory::Meta {
                terms_of_service: self.config.terms_of_service.clone(),
                website: self.config.website.clone(),
                caa_identities: self.config.caa_identities.clone(),
                external_account_required: false,
            },
            strict_mode: self.config.strict,
            alternate_chains: self.ca.chain_count() - 1,
            challenge_types: vec![
                types::challenge::Type::HTTP01, types::challenge::Type::DNS01, types::challenge::Type::TLSALPN01,
            ],
            ocsp_responder: self.config.ocsp_responder_url.clone(),
        }
    }

    pub fn new_account(
        &self, nonce: &str, key: &openssl::pkey::PKeyRef<openssl::pkey::Public>, contacts: &[String],
        only_return_existing: bool,
    ) -> ReplayNonce<ACMEResult<types::account::Account>> {
        self.respond(self.redeem(nonce).and_then(|_| self.create_account(key, contacts, only_return_existing)))
    }

    fn create_account(
        &self, key: &openssl::pkey::PKeyRef<openssl::pkey::Public>, contacts: &[String], only_return_existing: bool,
    ) -> ACMEResult<types::account::Account> {
        let bad_key = |detail: String| types::error::Error::new(
            types::error::Type::BadPublicKey, 400, "Bad public key", detail,
        );
        let key_fingerprint = types::jose::key_thumbprint(key).map_err(bad_key)?;
        let public_key = key.public_key_to_der().map_err(|e| bad_key(e.to_string()))?;

        match self.store.account_by_key(&key_fingerprint)? {
            Some(existing) if only_return_existing => return Ok(existing),
            Some(_) => return Err(types::error::Error::conflict("An account with this key already exists")),
            None if only_return_existing => return Err(types::error::Error::new(
                types::error::Type::AccountDoesNotExist, 400, "Account does not exist",
                "Account with the provided key does not exist, and onlyReturnExisting field set",
            )),
            None => {}
        }

        let contact = types::account::parse_contacts(contacts)?;
        let account = self.store.create_account(types::account::Account {
            id: uuid::Uuid::new_v4(),
            status: types::account::Status::Valid,
            contact,
            key_fingerprint,
            public_key,
            created_at: self.store.now(),
        })?;
        info!("Created account {}", crate::util::uuid_as_b64(&account.id));
        Ok(account)
    }

    pub fn update_account(
        &self, nonce: &str, account_id: uuid::Uuid, contacts: &[String],
    ) -> ReplayNonce<ACMEResult<types::account::Account>> {
        self.respond(self.redeem(nonce).and_then(|_| {
            self.active_account(account_id)?;
            let contact = types::account::parse_contacts(contacts)?;
            self.store.accounts().update_if_status(account_id, types::account::Status::Valid, |a| {
                a.contact = contact;
                Ok(())
            })
        }))
    }

    pub fn deactivate_account(
        &self, nonce: &str, account_id: uuid::Uuid,
    ) -> ReplayNonce<ACMEResult<types::account::Account>> {
        self.respond(self.redeem(nonce).and_then(|_| self.do_deactivate_account(account_id)))
    }

    fn do_deactivate_account(&self, account_id: uuid::Uuid) -> ACMEResult<types::account::Account> {
        self.active_account(account_id)?;
        let account = self.store.accounts().update_if_status(account_id, types::account::Status::Valid, |a| {
            a.status = types::account::Status::Deactivated;
            Ok(())
        })?;
        info!("Deactivated account {}", crate::util::uuid_as_b64(&account_id));

        let error = types::error::Error::unauthorized("The account was deactivated");
        for order in self.store.orders_for_account(account_id)? {
            processing::ignore_conflict(self.store.orders().update_if_status_in(
                order.id, &[types::order::Status::Pending, types::order::Status::Ready], |o| {
                    o.status = types::order::Status::Invalid;
                    o.error = Some(error.clone());
                    Ok(())
                },
            ))?;
        }
        for authz in self.store.authorizations_for_account(account_id)? {
            processing::ignore_conflict(self.store.authorizations().update_if_status(
                authz.id, types::authorization::Status::Pending, |a| {
                    a.status = types::authorization::Status::Invalid;
                    Ok(())
                },
            ))?;
        }

        Ok(account)
    }

    pub fn new_order(
        &self, nonce: &str, account_id: uuid::Uuid, order: &types::order::OrderCreate,
    ) -> ReplayNonce<ACMEResult<types::order::Order>> {
        self.respond(self.redeem(nonce).and_then(|_| self.create_order(account_id, order)))
    }

    fn create_order(&self, account_id: uuid::Uuid, order: &types::order::OrderCreate) -> ACMEResult<types::order::Order> {
        let account = self.active_account(account_id)?;

        if order.identifiers.is_empty() {
            return Err(types::error::Error::malformed("An order must contain at least one identifier"));
        }
        if let (Some(not_before), Some(not_after)) = (order.not_before, order.not_after) {
            if not_after <= not_before {
                return Err(types::error::Error::malformed("notAfter must be later than notBefore"));
            }
        }

        let mut errors = vec![];
        let mut identifiers = vec![];
        for identifier in &order.identifiers {
            match identifier.normalize(self.config.strict) {
                Ok(i) => identifiers.push(i),
                Err(e) => errors.push(e),
            }
        }
        crate::util::error_list_to_result(errors, "Multiple errors make this order invalid".to_string())?;
        identifiers.sort();
        identifiers.dedup();

        if let Some(max_pending) = self.config.max_pending_orders {
            let pending = self.store.orders_for_account(account.id)?.into_iter()
                .filter(|o| o.status == types::order::Status::Pending)
                .count();
            if pending >= max_pending {
                return Err(types::error::Error::new(
                    types::error::Type::RateLimited, 429, "Rate limited",
                    format!("Account has {} pending orders, the limit is {}", pending, max_pending),
                ));
            }
        }

        let now = self.store.now();
        let mut expires = crate::util::checked_deadline(now, self.config.order_lifetime())?;
        let mut authorizations = vec![];
        let mut all_valid = true;
        for identifier in &identifiers {
            let authz = self.authorization_for(&account, identifier)?;
            expires = std::cmp::min(expires, authz.expires);
            all_valid &= authz.status == types::authorization::Status::Valid;
            authorizations.push(authz.id);
        }

        let order = self.store.create_order(types::order::Order {
            id: uuid::Uuid::new_v4(),
            account_id: account.id,
            status: if all_valid {
                types::order::Status::Ready
            } else {
                types::order::Status::Pending
            },
            expires,
            identifiers,
            not_before: order.not_before,
            not_after: order.not_after,
            error: None,
            authorizations,
            certificate: None,
            created_at: now,
        })?;
        info!(
            "Created order {} for account {} ({:?})",
            crate::util::uuid_as_b64(&order.id), crate::util::uuid_as_b64(&account.id), order.status
        );
        Ok(order)
    }

    /// Reuses the account's valid authorization for `identifier` if there is
    /// one, otherwise creates a pending one with a challenge per offered type.
    fn authorization_for(
        &self, account: &types::account::Account, identifier: &types::identifier::Identifier,
    ) -> ACMEResult<types::authorization::Authorization> {
        // A second pass covers a reusable authorization appearing between the
        // lookup and the insert.
        for _ in 0..2 {
            if let Some(existing) = self.store.find_reusable_authorization(account.id, &identifier.value)? {
                debug!("Reusing authorization {} for '{}'", crate::util::uuid_as_b64(&existing.id), identifier.value);
                return Ok(existing);
            }

            let authz_id = uuid::Uuid::new_v4();
            let expires = crate::util::checked_deadline(self.store.now(), self.config.pending_authz_lifetime())?;
            let mut challenges = vec![];
            for challenge_type in types::challenge::Type::offered_for(identifier) {
                challenges.push(types::challenge::Challenge {
                    id: uuid::Uuid::new_v4(),
                    authorization_id: authz_id,
                    challenge_type,
                    status: types::challenge::Status::Pending,
                    validated: None,
                    error: None,
                    token: crate::util::new_token()?,
                });
            }

            let created = self.store.create_authorization(types::authorization::Authorization {
                id: authz_id,
                account_id: account.id,
                identifier: identifier.clone(),
                status: types::authorization::Status::Pending,
                expires,
                challenges: challenges.iter().map(|c| c.id).collect(),
                wildcard: identifier.is_wildcard(),
            });
            match created {
                Ok(authz) => {
                    for challenge in challenges {
                        self.store.create_challenge(challenge)?;
                    }
                    return Ok(authz);
                }
                Err(err) if err.kind() == types::error::ErrorKind::Conflict => continue,
                Err(err) => return Err(err)
            }
        }

        error!("Unable to settle an authorization for '{}'", identifier.value);
        Err(crate::internal_server_error!())
    }

    pub fn get_order(
        &self, account_id: uuid::Uuid, order_id: uuid::Uuid,
    ) -> ReplayNonce<ACMEResult<types::order::Order>> {
        self.respond(self.owned_order(account_id, order_id))
    }

    fn owned_order(&self, account_id: uuid::Uuid, order_id: uuid::Uuid) -> ACMEResult<types::order::Order> {
        let account = self.active_account(account_id)?;
        let order = self.store.orders().get(order_id)?;
        Self::check_owner(&account, order.account_id, "order")?;
        Ok(order)
    }

    pub fn list_orders(&self, account_id: uuid::Uuid) -> ReplayNonce<ACMEResult<Vec<types::order::Order>>> {
        self.respond(self.active_account(account_id).and_then(|a| self.store.orders_for_account(a.id)))
    }

    pub fn get_authorization(
        &self, account_id: uuid::Uuid, authz_id: uuid::Uuid,
    ) -> ReplayNonce<ACMEResult<AuthorizationDetail>> {
        self.respond(self.owned_authorization(account_id, authz_id).and_then(|authorization| {
            let challenges = self.store.challenges_for_authorization(&authorization)?;
            Ok(AuthorizationDetail {
                authorization,
                challenges,
            })
        }))
    }

    fn owned_authorization(
        &self, account_id: uuid::Uuid, authz_id: uuid::Uuid,
    ) -> ACMEResult<types::authorization::Authorization> {
        let account = self.active_account(account_id)?;
        let authz = self.store.authorizations().get(authz_id)?;
        Self::check_owner(&account, authz.account_id, "authorization")?;
        Ok(authz)
    }

    pub fn deactivate_authorization(
        &self, nonce: &str, account_id: uuid::Uuid, authz_id: uuid::Uuid,
    ) -> ReplayNonce<ACMEResult<types::authorization::Authorization>> {
        self.respond(self.redeem(nonce).and_then(|_| {
            self.owned_authorization(account_id, authz_id)?;
            let authz = self.store.authorizations().update_if_status_in(
                authz_id, &[types::authorization::Status::Pending, types::authorization::Status::Valid], |a| {
                    a.status = types::authorization::Status::Deactivated;
                    Ok(())
                },
            )?;
            info!("Deactivated authorization {}", crate::util::uuid_as_b64(&authz_id));

            let error = types::error::Error::unauthorized(format!(
                "Authorization for '{}' was deactivated", authz.identifier.value
            )).with_identifier(authz.identifier.clone());
            for order in self.store.orders_for_authorization(authz_id)? {
                processing::ignore_conflict(self.store.orders().update_if_status_in(
                    order.id, &[types::order::Status::Pending, types::order::Status::Ready], |o| {
                        o.status = types::order::Status::Invalid;
                        o.error = Some(error.clone());
                        Ok(())
                    },
                ))?;
            }
            Ok(authz)
        }))
    }

    pub fn get_challenge(
        &self, account_id: uuid::Uuid, challenge_id: uuid::Uuid,
    ) -> ReplayNonce<ACMEResult<types::challenge::Challenge>> {
        self.respond(self.owned_challenge(account_id, challenge_id).map(|(_, _, c)| c))
    }

    fn owned_challenge(
        &self, account_id: uuid::Uuid, challenge_id: uuid::Uuid,
    ) -> ACMEResult<(types::account::Account, types::authorization::Authorization, types::challenge::Challenge)> {
        let account = self.active_account(account_id)?;
        let challenge = self.store.challenges().get(challenge_id)?;
        let authz = self.store.authorizations().get(challenge.authorization_id)?;
        Self::check_owner(&account, authz.account_id, "challenge")?;
        Ok((account, authz, challenge))
    }

    /// Accepts the client's go-ahead for a challenge and queues its
    /// validation; the result is observed by polling the challenge.
    pub fn respond_to_challenge(
        &self, nonce: &str, account_id: uuid::Uuid, challenge_id: uuid::Uuid,
    ) -> ReplayNonce<ACMEResult<types::challenge::Challenge>> {
        self.respond(self.redeem(nonce).and_then(|_| self.start_validation(account_id, challenge_id)))
    }

    fn start_validation(&self, account_id: uuid::Uuid, challenge_id: uuid::Uuid) -> ACMEResult<types::challenge::Challenge> {
        let (account, authz, _) = self.owned_challenge(account_id, challenge_id)?;
        if authz.status != types::authorization::Status::Pending {
            return Err(types::error::Error::malformed(format!(
                "Authorization is {:?}, only pending authorizations can be validated", authz.status
            )));
        }
        // A challenge already taken is refused by the store with Conflict
        let challenge = self.store.challenges().update_if_status(challenge_id, types::challenge::Status::Pending, |c| {
            c.status = types::challenge::Status::Processing;
            Ok(())
        })?;

        let task = processing::ValidationTask {
            authorization_id: authz.id,
            request: crate::validator::ValidationRequest {
                challenge_id,
                challenge_type: challenge.challenge_type,
                identifier: authz.identifier.clone(),
                token: challenge.token.clone(),
                account_thumbprint: account.key_fingerprint.clone(),
                http_port: self.config.http_port,
                tls_port: self.config.tls_port,
                strict: self.config.strict,
            },
        };
        if self.validations.send(task).is_err() {
            error!("Validation dispatcher is gone, failing challenge {}", crate::util::uuid_as_b64(&challenge_id));
            processing::apply_validation_outcome(
                &self.store, self.config.valid_authz_lifetime(), challenge_id, authz.id,
                crate::validator::ValidationOutcome::Invalid(crate::internal_server_error!()),
            )?;
            return Err(crate::internal_server_error!());
        }

        debug!("Queued validation of challenge {}", crate::util::uuid_as_b64(&challenge_id));
        Ok(challenge)
    }

    pub fn finalize_order(
        &self, nonce: &str, account_id: uuid::Uuid, order_id: uuid::Uuid, csr: &[u8],
    ) -> ReplayNonce<ACMEResult<types::order::Order>> {
        self.respond(self.redeem(nonce).and_then(|_| self.do_finalize(account_id, order_id, csr)))
    }

    fn do_finalize(&self, account_id: uuid::Uuid, order_id: uuid::Uuid, csr: &[u8]) -> ACMEResult<types::order::Order> {
        let order = self.owned_order(account_id, order_id)?;
        if order.status != types::order::Status::Ready {
            return Err(types::error::Error::order_not_ready(format!(
                "Order is {:?}, it must be ready to finalize", order.status
            )));
        }

        let account = self.active_account(account_id)?;
        let csr = self.ca.parse_csr(csr)?;
        let account_key = crate::try_db_result!(account.public_key(), "Unable to decode stored account key: {}")?;
        if csr.public_key.public_eq(&account_key) {
            return Err(types::error::Error::bad_csr("Certificate public key must differ from the account key"));
        }

        let order = self.store.orders().update_if_status(order_id, types::order::Status::Ready, |o| {
            o.status = types::order::Status::Processing;
            Ok(())
        })?;

        match self.ca.issue(&order, &csr) {
            Ok(cert) => self.commit_issuance(order_id, &cert),
            Err(err) => {
                warn!("Issuance for order {} failed: {}", crate::util::uuid_as_b64(&order_id), err);
                processing::ignore_conflict(self.store.orders().update_if_status(
                    order_id, types::order::Status::Processing, |o| {
                        o.status = types::order::Status::Invalid;
                        o.error = Some(err.clone());
                        Ok(())
                    },
                ))?;
                Err(err)
            }
        }
    }

    /// Attaches an issued certificate to its order. Should the order have
    /// left processing meanwhile (its deadline passed) the certificate is
    /// revoked, so nothing valid is left without an order pointing at it.
    fn commit_issuance(
        &self, order_id: uuid::Uuid, cert: &types::certificate::Certificate,
    ) -> ACMEResult<types::order::Order> {
        let committed = self.store.orders().update_if_status(order_id, types::order::Status::Processing, |o| {
            o.status = types::order::Status::Valid;
            o.certificate = Some(cert.id);
            Ok(())
        });
        if let Err(err) = &committed {
            warn!(
                "Order {} left processing during issuance, revoking certificate {}: {}",
                crate::util::uuid_as_b64(&order_id), cert.serial, err
            );
            self.ca.revoke(cert.id, crate::ocsp::RevocationReason::Superseded.code())?;
        }
        committed
    }

    pub fn get_certificate(
        &self, account_id: uuid::Uuid, cert_id: uuid::Uuid, alternate: usize,
    ) -> ReplayNonce<ACMEResult<CertificateDownload>> {
        self.respond(self.download_certificate(account_id, cert_id, alternate))
    }

    fn download_certificate(
        &self, account_id: uuid::Uuid, cert_id: uuid::Uuid, alternate: usize,
    ) -> ACMEResult<CertificateDownload> {
        let account = self.active_account(account_id)?;
        let certificate = self.store.certificates().get(cert_id)?;
        Self::check_owner(&account, certificate.account_id, "certificate")?;

        let chain = self.ca.get_chain(&certificate, alternate)?;
        let links = (0..=chain.alternates)
            .filter(|i| *i != alternate)
            .map(|i| LinkHeader {
                url: format!("{}/{}", crate::util::uuid_as_b64(&cert_id), i),
                relative: true,
                relation: "alternate".to_string(),
            })
            .collect();

        Ok(CertificateDownload {
            certificate,
            chain,
            links,
        })
    }

    /// `certificate` is the DER of the certificate to revoke, `reason` an
    /// RFC 5280 reason code (0 when omitted).
    pub fn revoke_certificate(
        &self, nonce: &str, certificate: &[u8], reason: Option<u8>, proof: RevocationProof,
    ) -> ReplayNonce<ACMEResult<types::certificate::Certificate>> {
        self.respond(self.redeem(nonce).and_then(|_| self.do_revoke(certificate, reason.unwrap_or(0), proof)))
    }

    fn do_revoke(&self, der: &[u8], reason: u8, proof: RevocationProof) -> ACMEResult<types::certificate::Certificate> {
        let x509 = match openssl::x509::X509::from_der(der) {
            Ok(c) => c,
            Err(_) => return Err(types::error::Error::malformed("Unable to decode certificate"))
        };
        let serial = crate::try_db_result!(x509.serial_number().to_bn(), "Unable to read certificate serial: {}")?;
        let cert = match self.store.certificate_by_serial(&hex::encode(serial.to_vec()))? {
            Some(c) if c.der == der => c,
            _ => return Err(types::error::Error::not_found("Certificate was not issued by this CA"))
        };

        match proof {
            RevocationProof::Account(account_id) => {
                let account = self.active_account(account_id)?;
                if account.id != cert.account_id && !self.holds_authorizations_for(&account, &cert)? {
                    return Err(types::error::Error::unauthorized(
                        "Account neither owns the certificate nor holds valid authorizations for its names"
                    ));
                }
            }
            RevocationProof::CertificateKey(key) => {
                let cert_key = crate::try_db_result!(x509.public_key(), "Unable to read certificate key: {}")?;
                if !cert_key.public_eq(&key) {
                    return Err(types::error::Error::unauthorized("Request was not signed by the certificate key"));
                }
            }
        }

        self.ca.revoke(cert.id, reason)
    }

    fn holds_authorizations_for(
        &self, account: &types::account::Account, cert: &types::certificate::Certificate,
    ) -> ACMEResult<bool> {
        let order = self.store.orders().get(cert.order_id)?;
        for identifier in &order.identifiers {
            if self.store.find_reusable_authorization(account.id, &identifier.value)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn ocsp_status(&self, serial: &str) -> ACMEResult<crate::ocsp::OCSPStatus> {
        self.ca.ocsp_status(serial)
    }

    /// Nothing expires on a timer; this just forces every pending deadline to
    /// be applied now, e.g. before inspecting the store.
    pub fn sweep_expired(&self) -> ACMEResult<()> {
        self.nonces.prune();
        self.store.orders().list(|_| false)?;
        self.store.authorizations().list(|_| false)?;
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }
}
