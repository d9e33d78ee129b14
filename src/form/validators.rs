//! Built-in validator factories.
//!
//! Every format validator accepts blank input so that absence is reported
//! once, by [`required`], which belongs first in the chain.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use super::validation::{FieldError, FieldValidator};
use super::value::{FieldKey, Value, ValueMap};

pub const REQUIRED: &str = "required";
pub const MIN_LENGTH: &str = "min_length";
pub const MAX_LENGTH: &str = "max_length";
pub const EMAIL: &str = "email";
pub const PATTERN: &str = "pattern";
pub const NUMERIC: &str = "numeric";
pub const INTEGER: &str = "integer";
pub const RANGE: &str = "range";
pub const ONE_OF: &str = "one_of";
pub const DATE: &str = "date";
pub const CHECKED: &str = "checked";
pub const MISMATCH: &str = "mismatch";

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}$")
        .expect("EMAIL_REGEX: invalid regex pattern")
});

pub fn required(message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    custom(REQUIRED, message, |value| !value.is_blank())
}

/// Minimum number of characters for text, or items for lists.
pub fn min_length(min: usize, message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(MIN_LENGTH, message, move |value| {
        length_of(value).is_none_or(|len| len >= min)
    })
}

pub fn max_length(max: usize, message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(MAX_LENGTH, message, move |value| {
        length_of(value).is_none_or(|len| len <= max)
    })
}

pub fn email(message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(EMAIL, message, |value| {
        value
            .as_text()
            .is_some_and(|text| EMAIL_REGEX.is_match(text.trim()))
    })
}

pub fn pattern(regex: Regex, message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(PATTERN, message, move |value| {
        value.as_text().is_some_and(|text| regex.is_match(text))
    })
}

pub fn numeric(message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(NUMERIC, message, |value| number_of(value).is_some())
}

pub fn integer(message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(INTEGER, message, |value| {
        number_of(value).is_some_and(|number| number.fract().is_zero())
    })
}

/// Inclusive numeric bounds. Non-numeric input passes so that [`numeric`]
/// owns that message.
pub fn range(
    min: impl Into<Decimal>,
    max: impl Into<Decimal>,
    message: impl Into<Cow<'static, str>>,
) -> impl FieldValidator {
    let (min, max) = (min.into(), max.into());
    format_rule(RANGE, message, move |value| {
        number_of(value).is_none_or(|number| number >= min && number <= max)
    })
}

pub fn one_of(options: &[&str], message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    let options = options.iter().map(|option| option.to_string()).collect::<Vec<_>>();
    format_rule(ONE_OF, message, move |value| match value {
        Value::Text(text) => options.iter().any(|option| option == text),
        Value::List(items) => items.iter().all(|item| options.contains(item)),
        _ => false,
    })
}

/// Date strings in a chrono format, e.g. `"%Y-%m-%d"`.
pub fn date(format: &'static str, message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    format_rule(DATE, message, move |value| {
        value
            .as_text()
            .is_some_and(|text| NaiveDate::parse_from_str(text.trim(), format).is_ok())
    })
}

/// For consent checkboxes: the value must be `Bool(true)`.
pub fn checked(message: impl Into<Cow<'static, str>>) -> impl FieldValidator {
    custom(CHECKED, message, |value| value.as_bool() == Some(true))
}

/// The field must equal another field's current value, e.g. a password
/// confirmation.
pub fn matches_field(other: &'static str, message: impl Into<Cow<'static, str>>) -> MatchesField {
    MatchesField {
        other: [FieldKey::new(other)],
        message: message.into(),
    }
}

/// Wraps a predicate as a validator. Unlike the format validators this runs on
/// blank input too.
pub fn custom<F>(
    code: &'static str,
    message: impl Into<Cow<'static, str>>,
    accept: F,
) -> impl FieldValidator
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    let message = message.into();
    move |value: &Value, _values: &ValueMap| {
        if accept(value) {
            Ok(())
        } else {
            Err(FieldError::new(code, message.clone()))
        }
    }
}

pub struct MatchesField {
    other: [FieldKey; 1],
    message: Cow<'static, str>,
}

impl FieldValidator for MatchesField {
    fn validate(&self, value: &Value, values: &ValueMap) -> Result<(), FieldError> {
        if value.is_blank() || values.get(self.other[0].as_str()) == Some(value) {
            Ok(())
        } else {
            Err(FieldError::new(MISMATCH, self.message.clone()))
        }
    }

    fn dependencies(&self) -> &[FieldKey] {
        &self.other
    }
}

fn format_rule<F>(
    code: &'static str,
    message: impl Into<Cow<'static, str>>,
    accept: F,
) -> impl FieldValidator
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    custom(code, message, move |value| value.is_blank() || accept(value))
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::Text(text) => Some(text.chars().count()),
        Value::List(items) => Some(items.len()),
        _ => None,
    }
}

fn number_of(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Some(*number),
        Value::Text(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    }
}
