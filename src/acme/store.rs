//! In-memory entity repository.
//!
//! Every entity lives behind its own mutex inside a per-type table, so
//! transitions on different entities never contend. All state changes go
//! through [`Table::update_if_status`], which checks the current status (after
//! applying any due expiry), runs the mutation on a copy, and only commits it
//! if the resulting transition is one the entity allows.

use chrono::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use crate::types;
use crate::util::Clock;
use super::ACMEResult;

pub trait Entity: Clone + std::fmt::Debug + Send + 'static {
    type Status: Copy + Eq + std::fmt::Debug + Send;
    const NAME: &'static str;

    fn id(&self) -> uuid::Uuid;
    fn status(&self) -> Self::Status;
    fn transition_allowed(from: Self::Status, to: Self::Status) -> bool;

    /// Applies the deadline transition if it is due, returning whether anything changed.
    fn expire(&mut self, _now: DateTime<Utc>) -> bool {
        false
    }
}

fn lock<T>(mutex: &Mutex<T>) -> ACMEResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("Store lock poisoned");
        crate::internal_server_error!()
    })
}

#[derive(Debug)]
pub struct Table<T: Entity> {
    rows: RwLock<HashMap<uuid::Uuid, Arc<Mutex<T>>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Entity> Table<T> {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Table {
            rows: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn row(&self, id: uuid::Uuid) -> ACMEResult<Arc<Mutex<T>>> {
        let rows = self.rows.read().map_err(|_| {
            error!("Store table lock poisoned");
            crate::internal_server_error!()
        })?;
        match rows.get(&id) {
            Some(r) => Ok(r.clone()),
            None => Err(types::error::Error::not_found(format!(
                "{} {} does not exist", T::NAME, crate::util::uuid_as_b64(&id)
            )))
        }
    }

    fn expire_locked(&self, entity: &mut T) {
        if entity.expire(self.clock.now()) {
            info!("{} {} expired, now {:?}", T::NAME, crate::util::uuid_as_b64(&entity.id()), entity.status());
        }
    }

    pub(crate) fn insert(&self, entity: T) -> ACMEResult<T> {
        let mut rows = self.rows.write().map_err(|_| {
            error!("Store table lock poisoned");
            crate::internal_server_error!()
        })?;
        let id = entity.id();
        if rows.contains_key(&id) {
            return Err(types::error::Error::conflict(format!(
                "{} {} already exists", T::NAME, crate::util::uuid_as_b64(&id)
            )));
        }
        rows.insert(id, Arc::new(Mutex::new(entity.clone())));
        debug!("Created {} {}", T::NAME, crate::util::uuid_as_b64(&id));
        Ok(entity)
    }

    pub fn get(&self, id: uuid::Uuid) -> ACMEResult<T> {
        let row = self.row(id)?;
        let mut entity = lock(&row)?;
        self.expire_locked(&mut entity);
        Ok(entity.clone())
    }

    pub fn list<F: Fn(&T) -> bool>(&self, filter: F) -> ACMEResult<Vec<T>> {
        let rows = {
            let rows = self.rows.read().map_err(|_| {
                error!("Store table lock poisoned");
                crate::internal_server_error!()
            })?;
            rows.values().cloned().collect::<Vec<_>>()
        };

        let mut out = vec![];
        for row in rows {
            let mut entity = lock(&row)?;
            self.expire_locked(&mut entity);
            if filter(&entity) {
                out.push(entity.clone());
            }
        }
        Ok(out)
    }

    pub fn update_if_status<F>(&self, id: uuid::Uuid, expected: T::Status, mutation: F) -> ACMEResult<T>
        where F: FnOnce(&mut T) -> ACMEResult<()>
    {
        self.update_if_status_in(id, &[expected], mutation)
    }

    /// Applies `mutation` only if the entity's status is one of `expected`,
    /// failing with a conflict otherwise. Nothing is written if the mutation
    /// fails.
    pub fn update_if_status_in<F>(&self, id: uuid::Uuid, expected: &[T::Status], mutation: F) -> ACMEResult<T>
        where F: FnOnce(&mut T) -> ACMEResult<()>
    {
        let row = self.row(id)?;
        let mut entity = lock(&row)?;
        self.expire_locked(&mut entity);

        let current = entity.status();
        if !expected.contains(&current) {
            debug!(
                "Status check failed for {} {}: is {:?}, expected one of {:?}",
                T::NAME, crate::util::uuid_as_b64(&id), current, expected
            );
            return Err(types::error::Error::conflict(format!(
                "{} {} is {:?}, expected one of {:?}", T::NAME, crate::util::uuid_as_b64(&id), current, expected
            )));
        }

        let mut updated = entity.clone();
        mutation(&mut updated)?;

        if updated.id() != id || !T::transition_allowed(current, updated.status()) {
            error!(
                "Refusing illegal {} transition {:?} -> {:?} for {}",
                T::NAME, current, updated.status(), crate::util::uuid_as_b64(&id)
            );
            return Err(crate::internal_server_error!());
        }

        if current != updated.status() {
            debug!("{} {}: {:?} -> {:?}", T::NAME, crate::util::uuid_as_b64(&id), current, updated.status());
        }
        *entity = updated.clone();
        Ok(updated)
    }
}

#[derive(Debug)]
pub struct Store {
    clock: Arc<dyn Clock>,
    accounts: Table<types::account::Account>,
    orders: Table<types::order::Order>,
    authorizations: Table<types::authorization::Authorization>,
    challenges: Table<types::challenge::Challenge>,
    certificates: Table<types::certificate::Certificate>,
    account_keys: Mutex<HashMap<String, uuid::Uuid>>,
    reusable_authorizations: Mutex<HashMap<(uuid::Uuid, String), uuid::Uuid>>,
    certificate_serials: Mutex<HashMap<String, uuid::Uuid>>,
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>) -> Store {
        Store {
            accounts: Table::new(clock.clone()),
            orders: Table::new(clock.clone()),
            authorizations: Table::new(clock.clone()),
            challenges: Table::new(clock.clone()),
            certificates: Table::new(clock.clone()),
            account_keys: Mutex::new(HashMap::new()),
            reusable_authorizations: Mutex::new(HashMap::new()),
            certificate_serials: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn accounts(&self) -> &Table<types::account::Account> {
        &self.accounts
    }

    pub fn orders(&self) -> &Table<types::order::Order> {
        &self.orders
    }

    pub fn authorizations(&self) -> &Table<types::authorization::Authorization> {
        &self.authorizations
    }

    pub fn challenges(&self) -> &Table<types::challenge::Challenge> {
        &self.challenges
    }

    pub fn certificates(&self) -> &Table<types::certificate::Certificate> {
        &self.certificates
    }

    pub fn create_account(&self, account: types::account::Account) -> ACMEResult<types::account::Account> {
        let mut keys = lock(&self.account_keys)?;
        if keys.contains_key(&account.key_fingerprint) {
            return Err(types::error::Error::conflict("An account with this key already exists"));
        }
        let account = self.accounts.insert(account)?;
        keys.insert(account.key_fingerprint.clone(), account.id);
        Ok(account)
    }

    pub fn account_by_key(&self, fingerprint: &str) -> ACMEResult<Option<types::account::Account>> {
        let account_id = match lock(&self.account_keys)?.get(fingerprint) {
            Some(i) => *i,
            None => return Ok(None)
        };
        Ok(Some(self.accounts.get(account_id)?))
    }

    pub fn create_order(&self, order: types::order::Order) -> ACMEResult<types::order::Order> {
        self.orders.insert(order)
    }

    pub fn create_challenge(&self, challenge: types::challenge::Challenge) -> ACMEResult<types::challenge::Challenge> {
        self.challenges.insert(challenge)
    }

    /// Rejects the new authorization while a valid, unexpired one is
    /// registered for the same account and identifier; that one must be
    /// reused instead.
    pub fn create_authorization(
        &self, authz: types::authorization::Authorization,
    ) -> ACMEResult<types::authorization::Authorization> {
        let reusable = lock(&self.reusable_authorizations)?;
        if let Some(existing_id) = reusable.get(&authz.reuse_key()) {
            let existing = self.authorizations.get(*existing_id)?;
            if existing.is_reusable(self.now()) {
                return Err(types::error::Error::conflict(format!(
                    "A valid authorization for '{}' already exists", authz.identifier.value
                )));
            }
        }
        let authz = self.authorizations.insert(authz)?;
        std::mem::drop(reusable);
        Ok(authz)
    }

    pub fn find_reusable_authorization(
        &self, account_id: uuid::Uuid, identifier_value: &str,
    ) -> ACMEResult<Option<types::authorization::Authorization>> {
        let reusable = lock(&self.reusable_authorizations)?;
        let existing_id = match reusable.get(&(account_id, identifier_value.to_string())) {
            Some(i) => *i,
            None => return Ok(None)
        };
        let existing = self.authorizations.get(existing_id)?;
        Ok(if existing.is_reusable(self.now()) {
            Some(existing)
        } else {
            None
        })
    }

    /// Records a freshly validated authorization for reuse, unless another
    /// valid one already holds the slot.
    pub fn register_reusable_authorization(&self, authz: &types::authorization::Authorization) -> ACMEResult<()> {
        let now = self.now();
        if !authz.is_reusable(now) {
            return Ok(());
        }
        let mut reusable = lock(&self.reusable_authorizations)?;
        let key = authz.reuse_key();
        if let Some(existing_id) = reusable.get(&key) {
            if *existing_id != authz.id && self.authorizations.get(*existing_id)?.is_reusable(now) {
                return Ok(());
            }
        }
        reusable.insert(key, authz.id);
        Ok(())
    }

    pub fn create_certificate(
        &self, cert: types::certificate::Certificate,
    ) -> ACMEResult<types::certificate::Certificate> {
        let mut serials = lock(&self.certificate_serials)?;
        if serials.contains_key(&cert.serial) {
            return Err(types::error::Error::conflict(format!("Serial {} already issued", cert.serial)));
        }
        let cert = self.certificates.insert(cert)?;
        serials.insert(cert.serial.clone(), cert.id);
        Ok(cert)
    }

    pub fn certificate_by_serial(&self, serial: &str) -> ACMEResult<Option<types::certificate::Certificate>> {
        let cert_id = match lock(&self.certificate_serials)?.get(&serial.to_ascii_lowercase()) {
            Some(i) => *i,
            None => return Ok(None)
        };
        Ok(Some(self.certificates.get(cert_id)?))
    }

    pub fn orders_for_account(&self, account_id: uuid::Uuid) -> ACMEResult<Vec<types::order::Order>> {
        let mut orders = self.orders.list(|o| o.account_id == account_id)?;
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    pub fn orders_for_authorization(&self, authz_id: uuid::Uuid) -> ACMEResult<Vec<types::order::Order>> {
        self.orders.list(|o| o.authorizations.contains(&authz_id))
    }

    pub fn authorizations_for_account(
        &self, account_id: uuid::Uuid,
    ) -> ACMEResult<Vec<types::authorization::Authorization>> {
        self.authorizations.list(|a| a.account_id == account_id)
    }

    pub fn challenges_for_authorization(
        &self, authz: &types::authorization::Authorization,
    ) -> ACMEResult<Vec<types::challenge::Challenge>> {
        authz.challenges.iter().map(|c| self.challenges.get(*c)).collect()
    }
}
