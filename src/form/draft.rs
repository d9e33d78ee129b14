use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::controller::{FormController, FormError, FormResult, SubmitState, write_lock, read_lock};
use super::value::ValueMap;

/// Persists in-progress values between activations of the same form, keyed
/// by the form's configured name.
pub trait FormDraftStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, form: &str, values: &ValueMap) -> Result<(), Self::Error>;
    fn load(&self, form: &str) -> Result<Option<ValueMap>, Self::Error>;
    fn clear(&self, form: &str) -> Result<(), Self::Error>;
}

#[derive(Clone)]
pub struct InMemoryDraftStore {
    state: Arc<RwLock<BTreeMap<String, ValueMap>>>,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl Default for InMemoryDraftStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FormDraftStore for InMemoryDraftStore {
    type Error = Infallible;

    fn save(&self, form: &str, values: &ValueMap) -> Result<(), Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.insert(form.to_string(), values.clone());
        Ok(())
    }

    fn load(&self, form: &str) -> Result<Option<ValueMap>, Self::Error> {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(state.get(form).cloned())
    }

    fn clear(&self, form: &str) -> Result<(), Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.remove(form);
        Ok(())
    }
}

impl FormController {
    pub fn save_draft<S>(&self, store: &S) -> FormResult<()>
    where
        S: FormDraftStore,
    {
        let state = read_lock(&self.state, "saving draft")?;
        store
            .save(self.config.name(), &state.values)
            .map_err(|error| FormError::DraftSaveFailed(error.to_string()))
    }

    /// Replaces the current values with a stored draft. Draft entries for
    /// fields that are no longer declared, or that changed kind, are skipped.
    pub fn load_draft<S>(&self, store: &S) -> FormResult<bool>
    where
        S: FormDraftStore,
    {
        let Some(draft) = store
            .load(self.config.name())
            .map_err(|error| FormError::DraftLoadFailed(error.to_string()))?
        else {
            return Ok(false);
        };

        let mut state = write_lock(&self.state, "loading draft into form")?;
        state.values = self.config.initial_values();
        state.errors.clear();
        state.touched.clear();
        state.dirty.clear();
        state.submit_state = SubmitState::Idle;
        state.submit_count = 0;
        state.invalidate_async_slots();
        for (key, value) in &draft {
            match self.config.field(key.as_str()) {
                Some(spec) if spec.ensure_kind(*key, value).is_ok() => {
                    state.write_value(*key, value.clone(), spec.initial());
                }
                _ => {
                    debug!(form = self.config.name(), field = %key, "skipping incompatible draft entry");
                }
            }
        }
        Ok(true)
    }

    pub fn clear_draft<S>(&self, store: &S) -> FormResult<()>
    where
        S: FormDraftStore,
    {
        store
            .clear(self.config.name())
            .map_err(|error| FormError::DraftClearFailed(error.to_string()))
    }
}
