//! Address parameter prefixes
//!
//! Vendor addresses may carry `key=value;` prefixes in front of the area
//! address, e.g. `s=2;D100` (unit/station 2) or `s=1;x=4;100` (Modbus station
//! and function code). Keys match case-insensitively.

use std::str::FromStr;

use crate::error::{CommError, Result};

/// Remove the `key=value;` segment from `address`
///
/// Returns the value (if present) and the address without that segment.
pub fn extract_parameter(address: &str, key: &str) -> (Option<String>, String) {
    let mut value = None;
    let mut rest = Vec::new();

    let mut segments = address.split(';').peekable();
    while let Some(segment) = segments.next() {
        // the final segment is the area address itself
        if segments.peek().is_none() {
            rest.push(segment);
            break;
        }
        match segment.split_once('=') {
            Some((k, v)) if value.is_none() && k.trim().eq_ignore_ascii_case(key) => {
                value = Some(v.trim().to_string());
            },
            _ => rest.push(segment),
        }
    }

    (value, rest.join(";"))
}

/// Like [`extract_parameter`], parsing the value and falling back to `default`
pub fn extract_parameter_or<T: FromStr>(address: &str, key: &str, default: T) -> Result<(T, String)> {
    match extract_parameter(address, key) {
        (Some(raw), rest) => {
            let value = raw.parse().map_err(|_| {
                CommError::format(format!("Invalid value for '{key}' in {address}: {raw}"))
            })?;
            Ok((value, rest))
        },
        (None, rest) => Ok((default, rest)),
    }
}
