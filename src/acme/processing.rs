//! Asynchronous challenge validation.
//!
//! Responding to a challenge only queues a [`ValidationTask`]. A dispatcher
//! task runs every queued validation concurrently and forwards each outcome to
//! a single event loop, which applies the result through status-checked store
//! updates. Losing a race against another transition is logged and dropped.

use std::sync::Arc;
use tokio::sync::mpsc;
use crate::types;
use crate::validator::{ValidationClient, ValidationOutcome, ValidationRequest};
use super::store::Store;
use super::ACMEResult;

#[derive(Debug)]
pub(crate) struct ValidationTask {
    pub authorization_id: uuid::Uuid,
    pub request: ValidationRequest,
}

#[derive(Debug)]
struct ValidationEvent {
    task: ValidationTask,
    outcome: ValidationOutcome,
}

pub(crate) fn spawn(
    runtime: &tokio::runtime::Handle, store: Arc<Store>, validator: Arc<dyn ValidationClient>,
    valid_authz_lifetime: chrono::Duration,
) -> mpsc::UnboundedSender<ValidationTask> {
    let (task_tx, task_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    runtime.spawn(dispatch(task_rx, validator, event_tx));
    runtime.spawn(apply_events(event_rx, store, valid_authz_lifetime));
    task_tx
}

async fn dispatch(
    mut tasks: mpsc::UnboundedReceiver<ValidationTask>, validator: Arc<dyn ValidationClient>,
    events: mpsc::UnboundedSender<ValidationEvent>,
) {
    while let Some(task) = tasks.recv().await {
        let validator = validator.clone();
        let events = events.clone();
        tokio::spawn(async move {
            debug!(
                "Validating {} challenge {} for {}", task.request.challenge_type,
                crate::util::uuid_as_b64(&task.request.challenge_id), task.request.identifier.value
            );
            let outcome = validator.validate(task.request.clone()).await;
            if events.send(ValidationEvent { task, outcome }).is_err() {
                warn!("Validation finished after the engine shut down");
            }
        });
    }
    debug!("Validation dispatcher stopped");
}

async fn apply_events(
    mut events: mpsc::UnboundedReceiver<ValidationEvent>, store: Arc<Store>, valid_authz_lifetime: chrono::Duration,
) {
    while let Some(event) = events.recv().await {
        let challenge_id = event.task.request.challenge_id;
        if let Err(err) = apply_validation_outcome(
            &store, valid_authz_lifetime, challenge_id, event.task.authorization_id, event.outcome,
        ) {
            warn!("Unable to apply validation outcome for challenge {}: {}", crate::util::uuid_as_b64(&challenge_id), err);
        }
    }
    debug!("Validation event loop stopped");
}

/// Lost races are not errors; the other transition already decided the entity's fate.
pub(crate) fn ignore_conflict<T>(result: ACMEResult<T>) -> ACMEResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(err) if err.kind() == types::error::ErrorKind::Conflict => {
            debug!("Skipping transition: {}", err.detail);
            Ok(None)
        }
        Err(err) => Err(err)
    }
}

pub(crate) fn apply_validation_outcome(
    store: &Store, valid_authz_lifetime: chrono::Duration,
    challenge_id: uuid::Uuid, authz_id: uuid::Uuid, outcome: ValidationOutcome,
) -> ACMEResult<()> {
    let now = store.now();

    match outcome {
        ValidationOutcome::Valid => {
            // An authorization that cannot be given an expiry fails its challenge
            let valid_until = match crate::util::checked_deadline(now, valid_authz_lifetime) {
                Ok(d) => d,
                Err(err) => return apply_validation_outcome(
                    store, valid_authz_lifetime, challenge_id, authz_id, ValidationOutcome::Invalid(err),
                )
            };
            store.challenges().update_if_status(challenge_id, types::challenge::Status::Processing, |c| {
                c.status = types::challenge::Status::Valid;
                c.validated = Some(now);
                Ok(())
            })?;

            let authz = match ignore_conflict(store.authorizations().update_if_status(
                authz_id, types::authorization::Status::Pending, |a| {
                    a.status = types::authorization::Status::Valid;
                    a.expires = valid_until;
                    Ok(())
                },
            ))? {
                Some(a) => a,
                None => return Ok(())
            };
            info!("Authorization {} for '{}' is now valid", crate::util::uuid_as_b64(&authz.id), authz.identifier.value);
            store.register_reusable_authorization(&authz)?;

            for order in store.orders_for_authorization(authz.id)? {
                if order.status != types::order::Status::Pending {
                    continue;
                }
                let mut all_valid = true;
                for order_authz in &order.authorizations {
                    if store.authorizations().get(*order_authz)?.status != types::authorization::Status::Valid {
                        all_valid = false;
                        break;
                    }
                }
                if all_valid {
                    if ignore_conflict(store.orders().update_if_status(order.id, types::order::Status::Pending, |o| {
                        o.status = types::order::Status::Ready;
                        Ok(())
                    }))?.is_some() {
                        info!("Order {} is ready", crate::util::uuid_as_b64(&order.id));
                    }
                }
            }
        }
        ValidationOutcome::Invalid(err) => {
            let challenge = store.challenges().update_if_status(challenge_id, types::challenge::Status::Processing, |c| {
                c.status = types::challenge::Status::Invalid;
                c.error = Some(err.clone());
                Ok(())
            })?;
            info!(
                "{} challenge {} failed: {}", challenge.challenge_type,
                crate::util::uuid_as_b64(&challenge.id), err.detail
            );

            let authz = match ignore_conflict(store.authorizations().update_if_status(
                authz_id, types::authorization::Status::Pending, |a| {
                    a.status = types::authorization::Status::Invalid;
                    Ok(())
                },
            ))? {
                Some(a) => a,
                None => return Ok(())
            };

            let mut order_error = types::error::Error::unauthorized(format!(
                "Authorization for '{}' failed", authz.identifier.value
            )).with_identifier(authz.identifier.clone());
            order_error.sub_problems.push(err);

            for order in store.orders_for_authorization(authz.id)? {
                if ignore_conflict(store.orders().update_if_status(order.id, types::order::Status::Pending, |o| {
                    o.status = types::order::Status::Invalid;
                    o.error = Some(order_error.clone());
                    Ok(())
                }))?.is_some() {
                    info!("Order {} is invalid", crate::util::uuid_as_b64(&order.id));
                }
            }
        }
    }

    Ok(())
}
