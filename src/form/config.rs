use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use super::async_check::AsyncCheckEntry;
use super::controller::{FormError, FormResult};
use super::model::FormModel;
use super::validation::{AsyncFieldCheck, FieldValidator, ValidatorChain};
use super::value::{FieldKey, Value, ValueMap};

pub const DEFAULT_ASYNC_DEBOUNCE: Duration = Duration::from_millis(300);

pub type Normalizer = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RevalidateScope {
    /// Every chain runs again after a change once any field is touched.
    WholeForm,
    /// Only the changed field and the fields that (transitively) read it.
    Dependents,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    pub revalidate_scope: RevalidateScope,
    pub async_debounce: Duration,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            revalidate_scope: RevalidateScope::WholeForm,
            async_debounce: DEFAULT_ASYNC_DEBOUNCE,
        }
    }
}

#[derive(Clone)]
pub struct FieldSpec {
    initial: Value,
    chain: ValidatorChain,
    normalizers: Vec<Normalizer>,
    async_check: Option<AsyncCheckEntry>,
    depends_on: BTreeSet<FieldKey>,
}

impl FieldSpec {
    pub fn new(initial: impl Into<Value>) -> Self {
        Self {
            initial: initial.into(),
            chain: ValidatorChain::new(),
            normalizers: Vec::new(),
            async_check: None,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: FieldValidator + 'static,
    {
        self.depends_on
            .extend(validator.dependencies().iter().copied());
        self.chain.push(validator);
        self
    }

    /// Normalizers run in registration order on every `handle_change`.
    pub fn normalize(mut self, normalizer: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.normalizers.push(Arc::new(normalizer));
        self
    }

    pub fn depends_on(mut self, key: &'static str) -> Self {
        self.depends_on.insert(FieldKey::new(key));
        self
    }

    pub fn async_check<C>(mut self, check: C) -> Self
    where
        C: AsyncFieldCheck + 'static,
    {
        self.async_check = Some(AsyncCheckEntry::new(None, check));
        self
    }

    pub fn async_check_with_debounce<C>(mut self, debounce: Duration, check: C) -> Self
    where
        C: AsyncFieldCheck + 'static,
    {
        self.async_check = Some(AsyncCheckEntry::new(Some(debounce), check));
        self
    }

    pub fn initial(&self) -> &Value {
        &self.initial
    }

    pub fn chain(&self) -> &ValidatorChain {
        &self.chain
    }

    pub fn has_async_check(&self) -> bool {
        self.async_check.is_some()
    }

    pub(super) fn async_entry(&self) -> Option<&AsyncCheckEntry> {
        self.async_check.as_ref()
    }

    pub(super) fn normalized(&self, value: Value) -> Value {
        self.normalizers
            .iter()
            .fold(value, |value, normalizer| normalizer(value))
    }

    pub(super) fn ensure_kind(&self, key: FieldKey, value: &Value) -> FormResult<()> {
        if value.kind() == self.initial.kind() {
            Ok(())
        } else {
            Err(FormError::ValueKindMismatch {
                field: key,
                expected: self.initial.kind(),
                found: value.kind(),
            })
        }
    }
}

/// Immutable field registry for one form. Build it once with
/// [`FormConfig::builder`] and hand it to a controller.
pub struct FormConfig {
    name: &'static str,
    order: Vec<FieldKey>,
    fields: BTreeMap<FieldKey, FieldSpec>,
    dependents: BTreeMap<FieldKey, BTreeSet<FieldKey>>,
    options: FormOptions,
}

impl FormConfig {
    pub fn builder(name: &'static str) -> FormConfigBuilder {
        FormConfigBuilder {
            name,
            options: FormOptions::default(),
            fields: Vec::new(),
            initial_overrides: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Field keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.order.iter().copied()
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.get(key)
    }

    pub fn resolve(&self, key: &str) -> FormResult<(FieldKey, &FieldSpec)> {
        self.fields
            .get_key_value(key)
            .map(|(key, spec)| (*key, spec))
            .ok_or_else(|| FormError::UnknownField(key.to_string()))
    }

    pub fn initial_values(&self) -> ValueMap {
        self.fields
            .iter()
            .map(|(key, spec)| (*key, spec.initial.clone()))
            .collect()
    }

    pub fn async_keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.has_async_check())
            .map(|(key, _)| *key)
    }

    /// `source` plus every field whose validators read it, directly or
    /// through other dependents.
    pub fn affected_by(&self, source: FieldKey) -> BTreeSet<FieldKey> {
        let mut affected = BTreeSet::from([source]);
        let mut pending = vec![source];
        while let Some(key) = pending.pop() {
            for dependent in self.dependents.get(&key).into_iter().flatten() {
                if affected.insert(*dependent) {
                    pending.push(*dependent);
                }
            }
        }
        affected
    }
}

pub struct FormConfigBuilder {
    name: &'static str,
    options: FormOptions,
    fields: Vec<(FieldKey, FieldSpec)>,
    initial_overrides: Option<ValueMap>,
}

impl FormConfigBuilder {
    pub fn field(mut self, key: &'static str, spec: FieldSpec) -> Self {
        self.fields.push((FieldKey::new(key), spec));
        self
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    /// Seeds initial values from a typed model instead of the per-field
    /// defaults. Every model field must be declared.
    pub fn initial_model<T: FormModel>(mut self, model: &T) -> Self {
        self.initial_overrides = Some(model.to_values());
        self
    }

    pub fn build(self) -> FormResult<FormConfig> {
        let mut order = Vec::with_capacity(self.fields.len());
        let mut fields = BTreeMap::new();
        for (key, spec) in self.fields {
            if fields.insert(key, spec).is_some() {
                return Err(FormError::DuplicateField(key));
            }
            order.push(key);
        }

        if let Some(overrides) = self.initial_overrides {
            for (key, value) in &overrides {
                let spec = fields
                    .get_mut(key)
                    .ok_or_else(|| FormError::UnknownField(key.to_string()))?;
                spec.ensure_kind(*key, value)?;
                spec.initial = value.clone();
            }
        }

        let mut dependents = BTreeMap::<FieldKey, BTreeSet<FieldKey>>::new();
        for (key, spec) in &fields {
            for dependency in &spec.depends_on {
                if !fields.contains_key(dependency) {
                    return Err(FormError::UnknownDependency {
                        field: *key,
                        dependency: *dependency,
                    });
                }
                dependents.entry(*dependency).or_default().insert(*key);
            }
        }

        Ok(FormConfig {
            name: self.name,
            order,
            fields,
            dependents,
            options: self.options,
        })
    }
}
