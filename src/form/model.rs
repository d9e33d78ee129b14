use super::controller::FormResult;
use super::value::{FieldKey, ValueMap};

/// A plain struct that maps one-to-one onto a form's fields.
///
/// Usually derived with `#[derive(FormModel)]`; each field type must convert
/// into a [`Value`](super::Value) and implement [`FromValue`](super::FromValue).
pub trait FormModel: Sized {
    fn field_keys() -> &'static [FieldKey];
    fn to_values(&self) -> ValueMap;
    fn from_values(values: &ValueMap) -> FormResult<Self>;
}
