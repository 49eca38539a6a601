//! Expiry driven by a manual clock and races between concurrent requests for
//! the same resource.

mod common;

use common::*;
use testca::types;

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn unfinished_orders_expire() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);

    h.clock.advance(chrono::Duration::seconds(h.engine.config().order_lifetime + 1));

    let order = h.engine.get_order(account.id, order.id).into_result().unwrap();
    assert_eq!(order.status, types::order::Status::Invalid);
    assert!(order.error.is_some());
    let authz = h.engine.get_authorization(account.id, order.authorizations[0]).into_result().unwrap();
    assert_eq!(authz.authorization.status, types::authorization::Status::Expired);
}

#[tokio::test]
async fn expired_authorization_cannot_be_validated() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);
    let challenge = challenge_of(&h.engine, &account, order.authorizations[0], types::challenge::Type::HTTP01);

    h.clock.advance(chrono::Duration::seconds(h.engine.config().pending_authz_lifetime + 1));

    let err = h.engine.respond_to_challenge(&nonce(&h.engine), account.id, challenge.id).into_result().unwrap_err();
    assert_eq!(err.error_type, types::error::Type::Malformed);
    assert_eq!(h.validator.calls(), 0);
}

#[tokio::test]
async fn expired_authorizations_are_not_reused() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let first = new_order(&h.engine, &account, &["example.com"]);
    complete_challenges(&h.engine, &account, &first).await;

    h.clock.advance(chrono::Duration::seconds(h.engine.config().valid_authz_lifetime + 1));

    let second = new_order(&h.engine, &account, &["example.com"]);
    assert_ne!(second.authorizations, first.authorizations);
    assert_eq!(second.status, types::order::Status::Pending);
    let old = h.engine.get_authorization(account.id, first.authorizations[0]).into_result().unwrap();
    assert_eq!(old.authorization.status, types::authorization::Status::Expired);
}

#[tokio::test]
async fn ready_order_expires_before_finalization() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);
    complete_challenges(&h.engine, &account, &order).await;
    let order = h.engine.get_order(account.id, order.id).into_result().unwrap();
    assert_eq!(order.status, types::order::Status::Ready);

    h.clock.set(order.expires);

    let err = h.engine.finalize_order(
        &nonce(&h.engine), account.id, order.id, &make_csr(&generate_key(), &["example.com"]),
    ).into_result().unwrap_err();
    assert_eq!(err.error_type, types::error::Type::OrderNotReady);
    assert_eq!(
        h.engine.get_order(account.id, order.id).into_result().unwrap().status,
        types::order::Status::Invalid
    );
}

#[tokio::test]
async fn stale_nonces_are_rejected() {
    let h = harness();
    let stale = nonce(&h.engine);
    h.clock.advance(chrono::Duration::seconds(h.engine.config().nonce_lifetime));

    let key = generate_key();
    let response = h.engine.new_account(&stale, &public(&key), &[], false);
    assert_eq!(response.inner.unwrap_err().error_type, types::error::Type::BadNonce);

    // The rejection still carries a usable nonce
    let account = h.engine.new_account(&response.nonce, &public(&key), &[], false).into_result().unwrap();
    assert_eq!(account.status, types::account::Status::Valid);
}

#[tokio::test]
async fn issued_certificates_do_not_expire_orders() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);
    complete_challenges(&h.engine, &account, &order).await;
    h.engine.finalize_order(
        &nonce(&h.engine), account.id, order.id, &make_csr(&generate_key(), &["example.com"]),
    ).into_result().unwrap();

    h.clock.advance(chrono::Duration::days(365));
    h.engine.sweep_expired().unwrap();

    assert_eq!(
        h.engine.get_order(account.id, order.id).into_result().unwrap().status,
        types::order::Status::Valid
    );
}

// =============================================================================
// Races
// =============================================================================

/// Runs `attempts` copies of `f` on the multi-threaded runtime at once.
async fn race<T, F>(h: &Harness, attempts: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(std::sync::Arc<testca::Engine>, String) -> T + Send + Sync + Clone + 'static,
{
    let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(attempts));
    let tasks = (0..attempts).map(|_| {
        let engine = h.engine.clone();
        let barrier = barrier.clone();
        let f = f.clone();
        let nonce = nonce(&h.engine);
        tokio::spawn(async move {
            barrier.wait().await;
            f(engine, nonce)
        })
    }).collect::<Vec<_>>();

    futures::future::join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_response_per_challenge() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);
    let challenge = challenge_of(&h.engine, &account, order.authorizations[0], types::challenge::Type::HTTP01);

    // Keep the winner in processing until every loser has been refused
    h.validator.hold();
    let (account_id, challenge_id) = (account.id, challenge.id);
    let results = race(&h, 8, move |engine, nonce| {
        engine.respond_to_challenge(&nonce, account_id, challenge_id).into_result()
    }).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert_eq!(err.kind(), types::error::ErrorKind::Conflict, "unexpected error {:?}", err);
    }

    h.validator.release();
    let challenge = wait_for_challenge(&h.engine, &account, challenge_id).await;
    assert_eq!(challenge.status, types::challenge::Status::Valid);
    assert_eq!(h.validator.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_certificate_per_order() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);
    complete_challenges(&h.engine, &account, &order).await;
    let csr = make_csr(&generate_key(), &["example.com"]);

    let (account_id, order_id) = (account.id, order.id);
    let results = race(&h, 8, move |engine, nonce| {
        engine.finalize_order(&nonce, account_id, order_id, &csr).into_result()
    }).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            err.error_type == types::error::Type::OrderNotReady || err.error_type == types::error::Type::Conflict,
            "unexpected error {:?}", err
        );
    }

    let issued = h.engine.store().certificates().list(|c| c.order_id == order_id).unwrap();
    assert_eq!(issued.len(), 1);
    let order = h.engine.get_order(account_id, order_id).into_result().unwrap();
    assert_eq!(order.certificate, Some(issued[0].id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_account_per_key() {
    let h = harness();
    let key = public(&generate_key());

    let results = race(&h, 8, move |engine, nonce| {
        engine.new_account(&nonce, &key, &[], false).into_result()
    }).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| e.error_type == types::error::Type::Conflict));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nonces_are_single_use_under_contention() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let shared = nonce(&h.engine);

    let account_id = account.id;
    let results = race(&h, 8, move |engine, _| {
        engine.update_account(&shared, account_id, &["mailto:admin@example.com".to_string()]).into_result()
    }).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| e.error_type == types::error::Type::BadNonce));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deactivation_during_validation() {
    let h = harness();
    let (_, account) = new_account(&h.engine);
    let order = new_order(&h.engine, &account, &["example.com"]);
    let authz_id = order.authorizations[0];
    let challenge = challenge_of(&h.engine, &account, authz_id, types::challenge::Type::DNS01);

    h.engine.respond_to_challenge(&nonce(&h.engine), account.id, challenge.id).into_result().unwrap();
    let deactivated = h.engine.deactivate_authorization(&nonce(&h.engine), account.id, authz_id).into_result().unwrap();
    assert_eq!(deactivated.status, types::authorization::Status::Deactivated);

    // The challenge still settles, whichever side landed first
    let challenge = wait_for_challenge(&h.engine, &account, challenge.id).await;
    assert_eq!(challenge.status, types::challenge::Status::Valid);

    let authz = h.engine.get_authorization(account.id, authz_id).into_result().unwrap().authorization;
    assert_eq!(authz.status, types::authorization::Status::Deactivated);
    let order = h.engine.get_order(account.id, order.id).into_result().unwrap();
    assert_eq!(order.status, types::order::Status::Invalid);

    let fresh = new_order(&h.engine, &account, &["example.com"]);
    assert_ne!(fresh.authorizations, order.authorizations);
}
