//! HTTP request handlers.

pub mod aggregations;
pub mod alerts;
pub mod directory;
pub mod export;
pub mod health;
pub mod invoices;
pub mod snapshots;
pub mod usage;

use std::fmt::Display;
use std::str::FromStr;

use crate::error::ApiError;

/// Parse a path, query or body field, naming it in the error.
pub(crate) fn parse_field<T>(field: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {field}: {e}")))
}

/// Parse an optional field.
pub(crate) fn parse_optional<T>(field: &str, raw: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.filter(|s| !s.is_empty())
        .map(|s| parse_field(field, s))
        .transpose()
}
