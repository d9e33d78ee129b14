mod async_check;
mod config;
mod controller;
mod draft;
mod model;
pub mod normalizers;
mod validation;
pub mod validators;
mod value;

#[cfg(test)]
mod test_async_checks;

pub use async_check::{
    AsyncCheckOutcome, AsyncCheckState, AsyncCheckStatus, DUPLICATE, DuplicateCheck,
    duplicate_check,
};
pub use calmform_derive::FormModel;
pub use config::{
    DEFAULT_ASYNC_DEBOUNCE, FieldSpec, FormConfig, FormConfigBuilder, FormOptions, Normalizer,
    RevalidateScope,
};
pub use controller::{
    FormController, FormError, FormResult, FormSnapshot, SubmitBlock, SubmitOutcome, SubmitState,
    ValidationTicket,
};
pub use draft::{FormDraftStore, InMemoryDraftStore};
pub use model::FormModel;
pub use validation::{
    AsyncFieldCheck, BoxedCheckFuture, CheckFailure, CheckVerdict, FieldError, FieldValidator,
    ValidatorChain,
};
pub use value::{FieldKey, FromValue, Value, ValueKind, ValueMap};
