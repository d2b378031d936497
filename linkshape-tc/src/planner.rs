//! Turning a partial operator request into a complete target profile.
//!
//! Fields the request leaves out are carried over from the current snapshot, so impairment
//! applied earlier is preserved unless explicitly changed.

use std::fmt;

use crate::impairment::{
    Delay, ImpairmentProfile, ImpairmentRequest, ImpairmentSnapshot, LossPercent, Rate, ValueError,
};

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// What a [`ValidationError`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Interface,
    Delay,
    Loss,
    Rate,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interface => "interface",
            Self::Delay => "delay",
            Self::Loss => "loss",
            Self::Rate => "rate",
        })
    }
}

/// A request field, or the interface name, does not match its grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} {value:?}: {source}")]
pub struct ValidationError {
    /// The offending field.
    pub field: Field,
    /// The value as supplied.
    pub value: String,
    #[source]
    pub source: ValueError,
}

impl ValidationError {
    fn new(field: Field, value: &str, source: ValueError) -> Self {
        Self { field, value: value.to_string(), source }
    }
}

/// Checks `name` is something the kernel could call an interface.
pub fn validate_interface_name(name: &str) -> Result<(), ValidationError> {
    let invalid =
        |reason| Err(ValidationError::new(Field::Interface, name, ValueError::Invalid(reason)));

    if name.is_empty() {
        return Err(ValidationError::new(Field::Interface, name, ValueError::Empty));
    }
    if name.len() > MAX_INTERFACE_NAME_LEN {
        return invalid("longer than 15 bytes");
    }
    if name == "." || name == ".." {
        return invalid("reserved name");
    }
    if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control()) {
        return invalid("contains '/', ':' or whitespace");
    }

    Ok(())
}

/// An [`ImpairmentRequest`] whose supplied fields all passed their grammar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Delay to set, if supplied.
    pub delay: Option<Delay>,
    /// Loss to set, if supplied.
    pub loss: Option<LossPercent>,
    /// Rate to set, if supplied.
    pub rate: Option<Rate>,
}

impl ValidatedRequest {
    /// Overlays this request on `current`.
    pub fn merge(&self, current: &ImpairmentSnapshot) -> ImpairmentProfile {
        ImpairmentProfile::new(
            self.delay.unwrap_or(current.delay),
            self.loss.unwrap_or(current.loss),
            self.rate.or(current.rate),
        )
    }
}

/// Parses an optional field. Blank input counts as not supplied.
fn validate_field<T>(field: Field, value: Option<&str>) -> Result<Option<T>, ValidationError>
where
    T: std::str::FromStr<Err = ValueError>,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|e| ValidationError::new(field, v, e)),
    }
}

impl ImpairmentRequest {
    /// Validates every supplied field without looking at kernel state.
    pub fn validate(&self) -> Result<ValidatedRequest, ValidationError> {
        Ok(ValidatedRequest {
            delay: validate_field(Field::Delay, self.delay.as_deref())?,
            loss: validate_field(Field::Loss, self.loss.as_deref())?,
            rate: validate_field(Field::Rate, self.rate.as_deref())?,
        })
    }
}

/// Merges `request` into `current`, validating every field the request supplies.
pub fn plan(
    current: &ImpairmentSnapshot,
    request: &ImpairmentRequest,
) -> Result<ImpairmentProfile, ValidationError> {
    Ok(request.validate()?.merge(current))
}
