#![allow(dead_code)]

use chrono::prelude::*;
use openssl::pkey::{PKey, Private, Public};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use testca::types;
use testca::util::ManualClock;
use testca::validator::{ValidationClient, ValidationOutcome, ValidationRequest};

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Passes every challenge except those for identifiers marked as failing.
/// While held, validations wait until released.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
    held: AtomicBool,
    resume: tokio::sync::Notify,
}

impl ScriptedValidator {
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    pub fn fail(&self, identifier: &str) {
        self.failing.lock().unwrap().insert(identifier.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ValidationClient for ScriptedValidator {
    async fn validate(&self, request: ValidationRequest) -> ValidationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        loop {
            let resumed = self.resume.notified();
            if !self.held.load(Ordering::SeqCst) {
                break;
            }
            resumed.await;
        }
        if self.failing.lock().unwrap().contains(&request.identifier.value) {
            ValidationOutcome::Invalid(types::error::Error::new(
                types::error::Type::IncorrectResponse, 403, "Validation failed",
                format!("Expected '{}'", request.key_authorization()),
            ).with_identifier(request.identifier))
        } else {
            ValidationOutcome::Valid
        }
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub validator: Arc<ScriptedValidator>,
    pub engine: Arc<testca::Engine>,
}

pub fn harness() -> Harness {
    harness_with(testca::Config::default())
}

pub fn harness_with(mut config: testca::Config) -> Harness {
    init_logging();
    if config.rng_seed.is_none() {
        config.rng_seed = Some(1234);
    }
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let validator = Arc::new(ScriptedValidator::default());
    let engine = testca::Engine::with_clock(config, validator.clone(), clock.clone()).unwrap();
    Harness {
        clock,
        validator,
        engine: Arc::new(engine),
    }
}

pub fn generate_key() -> PKey<Private> {
    let group = openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(openssl::ec::EcKey::generate(&group).unwrap()).unwrap()
}

pub fn public(key: &PKey<Private>) -> PKey<Public> {
    PKey::public_key_from_der(&key.public_key_to_der().unwrap()).unwrap()
}

pub fn nonce(engine: &testca::Engine) -> String {
    engine.new_nonce().nonce
}

pub fn new_account(engine: &testca::Engine) -> (PKey<Private>, types::account::Account) {
    let key = generate_key();
    let account = engine.new_account(&nonce(engine), &public(&key), &[], false).into_result().unwrap();
    (key, account)
}

pub fn new_order(engine: &testca::Engine, account: &types::account::Account, names: &[&str]) -> types::order::Order {
    engine.new_order(&nonce(engine), account.id, &types::order::OrderCreate {
        identifiers: names.iter().map(|n| types::identifier::Identifier::dns(*n)).collect(),
        ..Default::default()
    }).into_result().unwrap()
}

pub fn make_csr(key: &PKey<Private>, names: &[&str]) -> Vec<u8> {
    let mut req_builder = openssl::x509::X509Req::builder().unwrap();
    let mut san_builder = openssl::x509::extension::SubjectAlternativeName::new();
    for name in names {
        san_builder.dns(name);
    }
    let san_extension = san_builder.build(&req_builder.x509v3_context(None)).unwrap();
    let mut stack = openssl::stack::Stack::new().unwrap();
    stack.push(san_extension).unwrap();
    req_builder.add_extensions(&stack).unwrap();
    req_builder.set_pubkey(key).unwrap();
    req_builder.sign(key, openssl::hash::MessageDigest::sha256()).unwrap();
    req_builder.build().to_der().unwrap()
}

/// The first challenge of `challenge_type` in an authorization
pub fn challenge_of(
    engine: &testca::Engine, account: &types::account::Account, authz_id: uuid::Uuid,
    challenge_type: types::challenge::Type,
) -> types::challenge::Challenge {
    engine.get_authorization(account.id, authz_id).into_result().unwrap()
        .challenges.into_iter()
        .find(|c| c.challenge_type == challenge_type)
        .unwrap()
}

pub async fn wait_for_challenge(
    engine: &testca::Engine, account: &types::account::Account, challenge_id: uuid::Uuid,
) -> types::challenge::Challenge {
    for _ in 0..500 {
        let challenge = engine.get_challenge(account.id, challenge_id).into_result().unwrap();
        if challenge.status != types::challenge::Status::Processing {
            return challenge;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("challenge never left processing");
}

/// Responds to the dns-01 challenge of every pending authorization on the
/// order and waits for each validation to finish.
pub async fn complete_challenges(engine: &testca::Engine, account: &types::account::Account, order: &types::order::Order) {
    for authz_id in &order.authorizations {
        let authz = engine.get_authorization(account.id, *authz_id).into_result().unwrap();
        if authz.authorization.status != types::authorization::Status::Pending {
            continue;
        }
        let challenge = challenge_of(engine, account, *authz_id, types::challenge::Type::DNS01);
        engine.respond_to_challenge(&nonce(engine), account.id, challenge.id).into_result().unwrap();
        wait_for_challenge(engine, account, challenge.id).await;
    }
}
