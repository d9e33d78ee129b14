use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use super::config::FormConfig;
use super::value::{FieldKey, Value, ValueMap};

/// A human-readable validation failure attached to one field.
///
/// `code` is a stable tag such as `"required"` or `"duplicate"` that callers
/// can match on without depending on message wording.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldError {
    code: &'static str,
    message: Cow<'static, str>,
}

impl FieldError {
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub trait FieldValidator: Send + Sync {
    fn validate(&self, value: &Value, values: &ValueMap) -> Result<(), FieldError>;

    /// Sibling fields this validator reads from `values`.
    fn dependencies(&self) -> &[FieldKey] {
        &[]
    }
}

impl<F> FieldValidator for F
where
    F: Fn(&Value, &ValueMap) -> Result<(), FieldError> + Send + Sync,
{
    fn validate(&self, value: &Value, values: &ValueMap) -> Result<(), FieldError> {
        (self)(value, values)
    }
}

/// Ordered validators for one field. Evaluation stops at the first failure.
#[derive(Clone, Default)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn FieldValidator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<V>(&mut self, validator: V)
    where
        V: FieldValidator + 'static,
    {
        self.validators.push(Arc::new(validator));
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn evaluate(&self, value: &Value, values: &ValueMap) -> Result<(), FieldError> {
        for validator in &self.validators {
            validator.validate(value, values)?;
        }
        Ok(())
    }

    pub fn dependencies(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.validators
            .iter()
            .flat_map(|validator| validator.dependencies().iter().copied())
    }
}

impl Debug for ValidatorChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("len", &self.validators.len())
            .finish()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CheckVerdict {
    Accepted,
    Rejected(FieldError),
}

/// The remote side of an async check failed to answer. This is never treated
/// as a rejection.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("async field check failed: {0}")]
pub struct CheckFailure(pub String);

impl CheckFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

pub type BoxedCheckFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CheckVerdict, CheckFailure>> + Send + 'a>>;

pub trait AsyncFieldCheck: Send + Sync {
    type Fut<'a>: Future<Output = Result<CheckVerdict, CheckFailure>> + Send + 'a
    where
        Self: 'a;

    fn check<'a>(&'a self, value: &'a Value, values: &'a ValueMap) -> Self::Fut<'a>;
}

impl<F> AsyncFieldCheck for F
where
    F: for<'a> Fn(&'a Value, &'a ValueMap) -> BoxedCheckFuture<'a> + Send + Sync,
{
    type Fut<'a>
        = BoxedCheckFuture<'a>
    where
        Self: 'a;

    fn check<'a>(&'a self, value: &'a Value, values: &'a ValueMap) -> Self::Fut<'a> {
        (self)(value, values)
    }
}

pub(super) fn validate_fields(
    config: &FormConfig,
    values: &ValueMap,
    keys: impl IntoIterator<Item = FieldKey>,
) -> BTreeMap<FieldKey, FieldError> {
    let mut errors = BTreeMap::new();
    for key in keys {
        let (Some(spec), Some(value)) = (config.field(key.as_str()), values.get(key.as_str()))
        else {
            continue;
        };
        if let Err(error) = spec.chain().evaluate(value, values) {
            errors.insert(key, error);
        }
    }
    errors
}
