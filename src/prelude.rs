pub use crate::form::validators::{
    checked, date, email, integer, matches_field, max_length, min_length, numeric, one_of,
    pattern, range, required,
};
pub use crate::form::{
    AsyncCheckOutcome, AsyncCheckStatus, CheckFailure, FieldError, FieldSpec, FormConfig,
    FormController, FormError, FormModel, FormOptions, FormResult, FormSnapshot, SubmitBlock,
    SubmitOutcome, Value, ValueMap, duplicate_check, normalizers,
};
