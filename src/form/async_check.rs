use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_timer::Delay;
use tracing::{debug, trace, warn};

use super::controller::{FormController, FormError, FormResult, ValidationTicket, read_lock, write_lock};
use super::validation::{AsyncFieldCheck, BoxedCheckFuture, CheckFailure, CheckVerdict, FieldError};
use super::value::{FieldKey, Value, ValueMap};

pub const DUPLICATE: &str = "duplicate";

pub(super) type AsyncCheckFn =
    Arc<dyn Fn(Value, ValueMap) -> BoxedCheckFuture<'static> + Send + Sync>;

#[derive(Clone)]
pub(super) struct AsyncCheckEntry {
    pub(super) debounce: Option<Duration>,
    pub(super) check: AsyncCheckFn,
}

impl AsyncCheckEntry {
    pub(super) fn new<C>(debounce: Option<Duration>, check: C) -> Self
    where
        C: AsyncFieldCheck + 'static,
    {
        let check = Arc::new(check);
        let wrapped: AsyncCheckFn =
            Arc::new(move |value: Value, values: ValueMap| -> BoxedCheckFuture<'static> {
                let check = check.clone();
                Box::pin(async move { check.check(&value, &values).await })
            });
        Self {
            debounce,
            check: wrapped,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsyncCheckStatus {
    Idle,
    Checking,
    Accepted,
    Rejected,
}

/// Per-field async state as seen by a renderer. `query` is the value the
/// current status was produced for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsyncCheckState {
    pub status: AsyncCheckStatus,
    pub query: Option<Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AsyncCheckOutcome {
    /// The field has no async check.
    NotConfigured,
    /// The synchronous chain fails, so no remote call was made.
    LocallyInvalid,
    /// A newer change arrived within the debounce window.
    Superseded,
    /// The response arrived for a value the field no longer holds.
    Stale,
    Accepted,
    Rejected,
    /// The remote call failed. The field is left idle.
    Failed,
}

/// In-flight token for one async-checked field. Every schedule or
/// invalidation bumps `ticket`, which is what cancels a pending debounce.
#[derive(Clone, Debug)]
pub(super) struct AsyncSlot {
    ticket: ValidationTicket,
    status: AsyncCheckStatus,
    query: Option<Value>,
    rejection: Option<FieldError>,
}

impl Default for AsyncSlot {
    fn default() -> Self {
        Self {
            ticket: ValidationTicket(0),
            status: AsyncCheckStatus::Idle,
            query: None,
            rejection: None,
        }
    }
}

impl AsyncSlot {
    pub(super) fn state(&self) -> AsyncCheckState {
        AsyncCheckState {
            status: self.status,
            query: self.query.clone(),
        }
    }

    pub(super) fn status(&self) -> AsyncCheckStatus {
        self.status
    }

    pub(super) fn query(&self) -> Option<&Value> {
        self.query.as_ref()
    }

    pub(super) fn rejection(&self) -> Option<&FieldError> {
        self.rejection.as_ref()
    }

    /// Starts a new check and hands back the previous rejection, if any, so
    /// the caller can clear it from the error map.
    fn issue(&mut self, query: Value) -> (ValidationTicket, Option<FieldError>) {
        self.ticket = self.ticket.next();
        self.status = AsyncCheckStatus::Checking;
        self.query = Some(query);
        (self.ticket, self.rejection.take())
    }

    pub(super) fn invalidate(&mut self) -> Option<FieldError> {
        self.ticket = self.ticket.next();
        self.status = AsyncCheckStatus::Idle;
        self.query = None;
        self.rejection.take()
    }
}

impl FormController {
    /// `handle_change` followed by a debounced async check of the new value.
    pub async fn handle_change_async(
        &self,
        field: &str,
        value: impl Into<Value>,
    ) -> FormResult<AsyncCheckOutcome> {
        self.handle_change(field, value)?;
        self.check_field_async(field).await
    }

    /// Runs the field's async check for its current value.
    pub async fn check_field_async(&self, field: &str) -> FormResult<AsyncCheckOutcome> {
        let (key, spec) = self.config.resolve(field)?;
        let Some(entry) = spec.async_entry().cloned() else {
            return Ok(AsyncCheckOutcome::NotConfigured);
        };

        let values = read_lock(&self.state, "reading values for async check")?
            .values
            .clone();
        let Some(query) = values.get(key.as_str()).cloned() else {
            return Err(FormError::UnknownField(key.to_string()));
        };
        let locally_valid = spec.chain().evaluate(&query, &values).is_ok();

        let ticket = {
            let mut guard = write_lock(&self.state, "scheduling async check")?;
            let state = &mut *guard;
            if state.values.get(key.as_str()) != Some(&query) {
                return Ok(AsyncCheckOutcome::Superseded);
            }
            let Some(slot) = state.async_slots.get_mut(&key) else {
                return Ok(AsyncCheckOutcome::NotConfigured);
            };
            let (ticket, previous) = if locally_valid {
                let (ticket, previous) = slot.issue(query.clone());
                (Some(ticket), previous)
            } else {
                (None, slot.invalidate())
            };
            if let Some(previous) = previous
                && state.errors.get(&key) == Some(&previous)
            {
                state.errors.remove(&key);
            }
            match ticket {
                Some(ticket) => ticket,
                None => {
                    trace!(form = self.config.name(), field = %key, "async check skipped, field invalid");
                    return Ok(AsyncCheckOutcome::LocallyInvalid);
                }
            }
        };

        let debounce = entry
            .debounce
            .unwrap_or(self.config.options().async_debounce);
        trace!(
            form = self.config.name(),
            field = %key,
            ticket = ticket.0,
            ?debounce,
            "async check scheduled"
        );
        if !debounce.is_zero() {
            Delay::new(debounce).await;
            if !self.is_latest_ticket(key, ticket)? {
                trace!(form = self.config.name(), field = %key, ticket = ticket.0, "async check superseded");
                return Ok(AsyncCheckOutcome::Superseded);
            }
        }

        let values = read_lock(&self.state, "reading values for remote check")?
            .values
            .clone();
        debug!(form = self.config.name(), field = %key, ticket = ticket.0, "async check started");
        let result = (entry.check)(query.clone(), values).await;
        self.finish_async_check(key, ticket, &query, result)
    }

    fn is_latest_ticket(&self, key: FieldKey, ticket: ValidationTicket) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking latest validation ticket")?
            .async_slots
            .get(&key)
            .is_some_and(|slot| slot.ticket == ticket))
    }

    fn finish_async_check(
        &self,
        key: FieldKey,
        ticket: ValidationTicket,
        query: &Value,
        result: Result<CheckVerdict, CheckFailure>,
    ) -> FormResult<AsyncCheckOutcome> {
        let mut guard = write_lock(&self.state, "finishing async check")?;
        let state = &mut *guard;
        let current = state.values.get(key.as_str());
        let Some(slot) = state.async_slots.get_mut(&key) else {
            return Ok(AsyncCheckOutcome::NotConfigured);
        };
        if slot.ticket != ticket
            || current != Some(query)
            || slot.status != AsyncCheckStatus::Checking
            || slot.query.as_ref() != Some(query)
        {
            debug!(form = self.config.name(), field = %key, ticket = ticket.0, "discarding stale async check result");
            return Ok(AsyncCheckOutcome::Stale);
        }

        match result {
            Ok(CheckVerdict::Accepted) => {
                slot.status = AsyncCheckStatus::Accepted;
                debug!(form = self.config.name(), field = %key, "async check accepted");
                Ok(AsyncCheckOutcome::Accepted)
            }
            Ok(CheckVerdict::Rejected(error)) => {
                slot.status = AsyncCheckStatus::Rejected;
                slot.rejection = Some(error.clone());
                state.errors.insert(key, error);
                debug!(form = self.config.name(), field = %key, "async check rejected");
                Ok(AsyncCheckOutcome::Rejected)
            }
            Err(failure) => {
                slot.status = AsyncCheckStatus::Idle;
                slot.query = None;
                warn!(form = self.config.name(), field = %key, %failure, "async check failed, leaving field idle");
                Ok(AsyncCheckOutcome::Failed)
            }
        }
    }
}

/// Adapts an "already exists?" lookup into an [`AsyncFieldCheck`]. A `true`
/// answer rejects the value with a [`DUPLICATE`] error.
pub fn duplicate_check<F, Fut>(
    message: impl Into<Cow<'static, str>>,
    lookup: F,
) -> DuplicateCheck<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CheckFailure>> + Send + 'static,
{
    DuplicateCheck {
        message: message.into(),
        lookup,
    }
}

pub struct DuplicateCheck<F> {
    message: Cow<'static, str>,
    lookup: F,
}

impl<F, Fut> AsyncFieldCheck for DuplicateCheck<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, CheckFailure>> + Send + 'static,
{
    type Fut<'a>
        = BoxedCheckFuture<'a>
    where
        Self: 'a;

    fn check<'a>(&'a self, value: &'a Value, _values: &'a ValueMap) -> Self::Fut<'a> {
        let Some(candidate) = value.as_text() else {
            let found = value.kind();
            return Box::pin(async move {
                Err::<CheckVerdict, _>(CheckFailure::new(format!(
                    "duplicate lookup needs a text value, got {found:?}"
                )))
            });
        };
        let pending = (self.lookup)(candidate.to_string());
        Box::pin(async move {
            if pending.await? {
                Ok(CheckVerdict::Rejected(FieldError::new(
                    DUPLICATE,
                    self.message.clone(),
                )))
            } else {
                Ok(CheckVerdict::Accepted)
            }
        })
    }
}
