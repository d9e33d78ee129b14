use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, trace, warn};

use super::async_check::{AsyncCheckState, AsyncCheckStatus, AsyncSlot};
use super::config::{FormConfig, RevalidateScope};
use super::model::FormModel;
use super::validation::{FieldError, validate_fields};
use super::value::{FieldKey, Value, ValueKind, ValueMap};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

impl ValidationTicket {
    pub(super) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("field `{0}` is declared more than once")]
    DuplicateField(FieldKey),
    #[error("field `{field}` depends on undeclared field `{dependency}`")]
    UnknownDependency {
        field: FieldKey,
        dependency: FieldKey,
    },
    #[error("field `{field}` holds {expected:?} values, got {found:?}")]
    ValueKindMismatch {
        field: FieldKey,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("failed to load draft: {0}")]
    DraftLoadFailed(String),
    #[error("failed to save draft: {0}")]
    DraftSaveFailed(String),
    #[error("failed to clear draft: {0}")]
    DraftClearFailed(String),
}

pub type FormResult<T> = Result<T, FormError>;

/// Why a valid form was still not handed to the submit handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitBlock {
    PendingCheck(FieldKey),
    Rejected(FieldKey),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome<E> {
    Submitted,
    Invalid,
    Blocked(SubmitBlock),
    AlreadySubmitting,
    /// The handler ran and failed. The form is usable again.
    HandlerFailed(E),
}

impl<E> SubmitOutcome<E> {
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmitOutcome::Submitted)
    }
}

#[derive(Clone, Debug)]
pub struct FormSnapshot {
    pub values: ValueMap,
    pub errors: BTreeMap<FieldKey, FieldError>,
    pub touched: BTreeSet<FieldKey>,
    pub dirty: BTreeSet<FieldKey>,
    pub is_valid: bool,
    pub is_submitting: bool,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub async_checks: BTreeMap<FieldKey, AsyncCheckState>,
    /// First failing field in declaration order.
    pub first_error: Option<FieldKey>,
}

impl FormSnapshot {
    pub fn error(&self, field: &str) -> Option<&FieldError> {
        self.errors.get(field)
    }

    /// The error a renderer should show: only once the field was touched or a
    /// submit was attempted.
    pub fn visible_error(&self, field: &str) -> Option<&FieldError> {
        if self.touched.contains(field) || self.submit_count > 0 {
            self.error(field)
        } else {
            None
        }
    }

    pub fn is_touched(&self, field: &str) -> bool {
        self.touched.contains(field)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn async_status(&self, field: &str) -> Option<AsyncCheckStatus> {
        self.async_checks.get(field).map(|state| state.status)
    }

    /// Synchronous validity plus no async check pending or rejected.
    pub fn can_submit(&self) -> bool {
        self.is_valid
            && !self.is_submitting
            && self.async_checks.values().all(|state| {
                !matches!(
                    state.status,
                    AsyncCheckStatus::Checking | AsyncCheckStatus::Rejected
                )
            })
    }
}

pub(super) struct FormState {
    pub(super) values: ValueMap,
    pub(super) errors: BTreeMap<FieldKey, FieldError>,
    pub(super) touched: BTreeSet<FieldKey>,
    pub(super) dirty: BTreeSet<FieldKey>,
    pub(super) submit_state: SubmitState,
    pub(super) submit_count: u32,
    pub(super) async_slots: BTreeMap<FieldKey, AsyncSlot>,
}

impl FormState {
    fn initial(config: &FormConfig) -> Self {
        Self {
            values: config.initial_values(),
            errors: BTreeMap::new(),
            touched: BTreeSet::new(),
            dirty: BTreeSet::new(),
            submit_state: SubmitState::Idle,
            submit_count: 0,
            async_slots: config
                .async_keys()
                .map(|key| (key, AsyncSlot::default()))
                .collect(),
        }
    }

    /// Stores a value, keeps the dirty set current and drops any async result
    /// that was produced for a different value.
    pub(super) fn write_value(&mut self, key: FieldKey, value: Value, initial: &Value) {
        if &value == initial {
            self.dirty.remove(&key);
        } else {
            self.dirty.insert(key);
        }
        if let Some(slot) = self.async_slots.get_mut(&key)
            && slot.query() != Some(&value)
            && let Some(rejection) = slot.invalidate()
            && self.errors.get(&key) == Some(&rejection)
        {
            self.errors.remove(&key);
        }
        self.values.insert(key, value);
    }

    pub(super) fn invalidate_async_slots(&mut self) {
        for slot in self.async_slots.values_mut() {
            let _ = slot.invalidate();
        }
    }
}

enum SubmitGate<'a> {
    Proceed(ValueMap, SubmitRollback<'a>),
    Stop(SubmitStop),
}

/// Puts back the submit state held before a submit started unless the submit
/// settles normally. Covers a panicking validator or handler and a dropped
/// async submit.
struct SubmitRollback<'a> {
    form: &'static str,
    state: &'a RwLock<FormState>,
    prior: SubmitState,
    armed: bool,
}

impl SubmitRollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SubmitRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if matches!(
            state.submit_state,
            SubmitState::Validating | SubmitState::Submitting
        ) {
            warn!(form = self.form, from = ?state.submit_state, to = ?self.prior, "submit unwound, restoring submit state");
            state.submit_state = self.prior;
        }
    }
}

enum SubmitStop {
    Busy,
    Invalid,
    Blocked(SubmitBlock),
}

impl SubmitStop {
    fn into_outcome<E>(self) -> SubmitOutcome<E> {
        match self {
            SubmitStop::Busy => SubmitOutcome::AlreadySubmitting,
            SubmitStop::Invalid => SubmitOutcome::Invalid,
            SubmitStop::Blocked(block) => SubmitOutcome::Blocked(block),
        }
    }
}

/// Owns the runtime state of one form instance.
///
/// Clones are handles to the same form; create a new controller for every
/// form activation and drop it on teardown.
#[derive(Clone)]
pub struct FormController {
    pub(super) config: Arc<FormConfig>,
    pub(super) state: Arc<RwLock<FormState>>,
}

impl FormController {
    pub fn new(config: FormConfig) -> Self {
        let state = FormState::initial(&config);
        debug!(form = config.name(), fields = config.len(), "form created");
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn handle_change(&self, field: &str, value: impl Into<Value>) -> FormResult<()> {
        let (key, spec) = self.config.resolve(field)?;
        let value = spec.normalized(value.into());
        spec.ensure_kind(key, &value)?;
        let revalidate = {
            let mut state = write_lock(&self.state, "applying field change")?;
            state.write_value(key, value, spec.initial());
            !state.touched.is_empty()
        };
        trace!(form = self.config.name(), field = %key, revalidate, "field changed");

        if revalidate {
            self.revalidate_after_change(key)?;
        }
        Ok(())
    }

    pub fn handle_blur(&self, field: &str) -> FormResult<()> {
        let (key, _) = self.config.resolve(field)?;
        {
            let mut state = write_lock(&self.state, "touching field")?;
            state.touched.insert(key);
        }
        trace!(form = self.config.name(), field = %key, "field blurred");
        let _ = self.validate_key(key)?;
        Ok(())
    }

    pub fn handle_submit<F, E>(&self, on_valid: F) -> FormResult<SubmitOutcome<E>>
    where
        F: FnOnce(&ValueMap) -> Result<(), E>,
    {
        let (values, rollback) = match self.prepare_submit()? {
            SubmitGate::Proceed(values, rollback) => (values, rollback),
            SubmitGate::Stop(stop) => return Ok(stop.into_outcome()),
        };
        let result = on_valid(&values);
        rollback.disarm();
        self.finish_submit(result)
    }

    pub async fn handle_submit_async<F, Fut, E>(&self, on_valid: F) -> FormResult<SubmitOutcome<E>>
    where
        F: FnOnce(ValueMap) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let (values, rollback) = match self.prepare_submit()? {
            SubmitGate::Proceed(values, rollback) => (values, rollback),
            SubmitGate::Stop(stop) => return Ok(stop.into_outcome()),
        };
        let result = on_valid(values).await;
        rollback.disarm();
        self.finish_submit(result)
    }

    /// Writes a value without normalization or validation.
    pub fn set_field_value(&self, field: &str, value: impl Into<Value>) -> FormResult<()> {
        let (key, spec) = self.config.resolve(field)?;
        let value = value.into();
        spec.ensure_kind(key, &value)?;
        let mut state = write_lock(&self.state, "imposing field value")?;
        state.write_value(key, value, spec.initial());
        Ok(())
    }

    /// Imposes an error outside the validator chains. The next chain run for
    /// the field replaces it.
    pub fn set_field_error(&self, field: &str, error: FieldError) -> FormResult<()> {
        let (key, _) = self.config.resolve(field)?;
        let mut state = write_lock(&self.state, "imposing field error")?;
        state.errors.insert(key, error);
        Ok(())
    }

    pub fn clear_field_error(&self, field: &str) -> FormResult<()> {
        let (key, _) = self.config.resolve(field)?;
        let mut state = write_lock(&self.state, "clearing field error")?;
        state.errors.remove(&key);
        Ok(())
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "clearing all field errors")?;
        state.errors.clear();
        Ok(())
    }

    pub fn reset_form(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "resetting form")?;
        state.values = self.config.initial_values();
        state.errors.clear();
        state.touched.clear();
        state.dirty.clear();
        state.submit_state = SubmitState::Idle;
        state.submit_count = 0;
        state.invalidate_async_slots();
        debug!(form = self.config.name(), "form reset");
        Ok(())
    }

    pub fn reset_field(&self, field: &str) -> FormResult<()> {
        let (key, spec) = self.config.resolve(field)?;
        let mut state = write_lock(&self.state, "resetting field")?;
        state.write_value(key, spec.initial().clone(), spec.initial());
        state.touched.remove(&key);
        state.errors.remove(&key);
        if let Some(slot) = state.async_slots.get_mut(&key) {
            let _ = slot.invalidate();
        }
        Ok(())
    }

    /// Runs one field's chain against the current values and records the
    /// result. Returns whether the field passed.
    pub fn validate_field(&self, field: &str) -> FormResult<bool> {
        let (key, _) = self.config.resolve(field)?;
        self.validate_key(key)
    }

    /// Full pass over every field without touching anything.
    pub fn validate_form(&self) -> FormResult<bool> {
        loop {
            let values = read_lock(&self.state, "reading values for form validation")?
                .values
                .clone();
            let errors = validate_fields(&self.config, &values, self.config.keys());
            let mut state = write_lock(&self.state, "applying form validation result")?;
            if state.values == values {
                state.errors = errors;
                return Ok(state.errors.is_empty());
            }
        }
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        let first_error = self
            .config
            .keys()
            .find(|key| state.errors.contains_key(key));
        Ok(FormSnapshot {
            values: state.values.clone(),
            errors: state.errors.clone(),
            touched: state.touched.clone(),
            dirty: state.dirty.clone(),
            is_valid: state.errors.is_empty(),
            is_submitting: state.submit_state == SubmitState::Submitting,
            submit_state: state.submit_state,
            submit_count: state.submit_count,
            async_checks: state
                .async_slots
                .iter()
                .map(|(key, slot)| (*key, slot.state()))
                .collect(),
            first_error,
        })
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state == SubmitState::Submitting)
    }

    /// Decodes the current values into a typed model.
    pub fn decode<T: FormModel>(&self) -> FormResult<T> {
        T::from_values(&read_lock(&self.state, "decoding form model")?.values)
    }

    fn validate_key(&self, key: FieldKey) -> FormResult<bool> {
        let Some(spec) = self.config.field(key.as_str()) else {
            return Err(FormError::UnknownField(key.to_string()));
        };
        let values = read_lock(&self.state, "reading values for field validation")?
            .values
            .clone();
        let Some(value) = values.get(key.as_str()) else {
            return Err(FormError::UnknownField(key.to_string()));
        };
        let result = spec.chain().evaluate(value, &values);
        let passed = result.is_ok();

        let mut state = write_lock(&self.state, "writing field validation result")?;
        if state.values.get(key.as_str()) != Some(value) {
            trace!(form = self.config.name(), field = %key, "dropping stale field validation");
            return Ok(passed);
        }
        match result {
            Ok(()) => {
                state.errors.remove(&key);
            }
            Err(error) => {
                state.errors.insert(key, error);
            }
        }
        Ok(passed)
    }

    fn revalidate_after_change(&self, source: FieldKey) -> FormResult<()> {
        let values = read_lock(&self.state, "reading values for revalidation")?
            .values
            .clone();
        let scope = match self.config.options().revalidate_scope {
            RevalidateScope::WholeForm => None,
            RevalidateScope::Dependents => Some(self.config.affected_by(source)),
        };
        let mut errors = match &scope {
            None => validate_fields(&self.config, &values, self.config.keys()),
            Some(keys) => validate_fields(&self.config, &values, keys.iter().copied()),
        };

        let mut state = write_lock(&self.state, "applying revalidation result")?;
        if state.values != values {
            trace!(form = self.config.name(), field = %source, "dropping stale revalidation");
            return Ok(());
        }
        match scope {
            None => state.errors = errors,
            Some(keys) => {
                for key in keys {
                    match errors.remove(&key) {
                        Some(error) => {
                            state.errors.insert(key, error);
                        }
                        None => {
                            state.errors.remove(&key);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn prepare_submit(&self) -> FormResult<SubmitGate<'_>> {
        let prior = {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if matches!(
                state.submit_state,
                SubmitState::Validating | SubmitState::Submitting
            ) {
                debug!(form = self.config.name(), "submit ignored, already in progress");
                return Ok(SubmitGate::Stop(SubmitStop::Busy));
            }
            let prior = state.submit_state;
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
            state.touched.extend(self.config.keys());
            prior
        };
        let rollback = SubmitRollback {
            form: self.config.name(),
            state: &self.state,
            prior,
            armed: true,
        };

        loop {
            let values = read_lock(&self.state, "reading values for submit")?
                .values
                .clone();
            let errors = validate_fields(&self.config, &values, self.config.keys());

            let mut guard = write_lock(&self.state, "applying submit validation")?;
            let state = &mut *guard;
            if state.values != values {
                continue;
            }
            state.errors = errors;

            if let Some(key) = self.config.keys().find(|key| state.errors.contains_key(key)) {
                transition_submit_state(state, SubmitState::Failed)?;
                rollback.disarm();
                debug!(form = self.config.name(), first_error = %key, "submit rejected by validation");
                return Ok(SubmitGate::Stop(SubmitStop::Invalid));
            }

            if let Some(key) = state
                .async_slots
                .iter()
                .find_map(|(key, slot)| (slot.status() == AsyncCheckStatus::Checking).then_some(*key))
            {
                transition_submit_state(state, SubmitState::Failed)?;
                rollback.disarm();
                debug!(form = self.config.name(), field = %key, "submit blocked by pending check");
                return Ok(SubmitGate::Stop(SubmitStop::Blocked(
                    SubmitBlock::PendingCheck(key),
                )));
            }

            if let Some((key, rejection)) = state.async_slots.iter().find_map(|(key, slot)| {
                (slot.status() == AsyncCheckStatus::Rejected)
                    .then(|| (*key, slot.rejection().cloned()))
            }) {
                if let Some(rejection) = rejection {
                    state.errors.insert(key, rejection);
                }
                transition_submit_state(state, SubmitState::Failed)?;
                rollback.disarm();
                debug!(form = self.config.name(), field = %key, "submit blocked by rejected check");
                return Ok(SubmitGate::Stop(SubmitStop::Blocked(SubmitBlock::Rejected(
                    key,
                ))));
            }

            transition_submit_state(state, SubmitState::Submitting)?;
            debug!(form = self.config.name(), "submitting");
            return Ok(SubmitGate::Proceed(values, rollback));
        }
    }

    fn finish_submit<E>(&self, result: Result<(), E>) -> FormResult<SubmitOutcome<E>> {
        let mut state = write_lock(&self.state, "completing submit")?;
        // A reset while the handler ran already moved the form back to idle.
        if state.submit_state == SubmitState::Submitting {
            let next = if result.is_ok() {
                SubmitState::Succeeded
            } else {
                SubmitState::Failed
            };
            transition_submit_state(&mut state, next)?;
        }
        Ok(match result {
            Ok(()) => {
                debug!(form = self.config.name(), "submit succeeded");
                SubmitOutcome::Submitted
            }
            Err(error) => {
                debug!(form = self.config.name(), "submit handler failed");
                SubmitOutcome::HandlerFailed(error)
            }
        })
    }
}

pub(super) fn transition_submit_state(state: &mut FormState, next: SubmitState) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
