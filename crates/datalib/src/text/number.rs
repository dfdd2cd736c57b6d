// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Numeric literal parsing for text instances and schema defaults.
//!
//! Integers accept decimal, `0x` hex and leading-`0` octal with an optional
//! sign, plus the keywords `true`, `false`, `min` and `max` (the last two
//! case-insensitive). Floats accept anything `str::parse` accepts plus
//! `min`, `max`, `inf` and `nan`.

use crate::registry::Storage;

/// Why a literal was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NumberError {
    /// Not a literal of the requested kind at all.
    Syntax(String),
    /// Well-formed but outside the storage's range.
    Range(String),
}

fn split_sign(word: &str) -> (bool, &str) {
    if let Some(rest) = word.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = word.strip_prefix('+') {
        (false, rest)
    } else {
        (false, word)
    }
}

/// Digits of an unsigned literal. `Ok(None)` means well-formed but too large.
fn parse_magnitude(digits: &str) -> Result<Option<u128>, ()> {
    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    if body.is_empty() {
        return Err(());
    }
    let mut acc: Option<u128> = Some(0);
    for c in body.chars() {
        let d = c.to_digit(radix).ok_or(())?;
        acc = acc
            .and_then(|a| a.checked_mul(u128::from(radix)))
            .and_then(|a| a.checked_add(u128::from(d)));
    }
    Ok(acc)
}

/// Parse an integer literal for the given integer storage.
pub(crate) fn parse_int(word: &str, storage: Storage) -> Result<i128, NumberError> {
    let Some((min, max)) = storage.int_bounds() else {
        return Err(NumberError::Syntax(format!(
            "{} is not an integer type",
            storage.describe()
        )));
    };

    match word {
        "true" => return Ok(1),
        "false" => return Ok(0),
        _ if word.eq_ignore_ascii_case("max") => return Ok(max),
        _ if word.eq_ignore_ascii_case("min") => return Ok(min),
        _ => {}
    }

    let (negative, digits) = split_sign(word);
    let magnitude = parse_magnitude(digits).map_err(|()| {
        NumberError::Syntax(format!(
            "expected a value of type {}, found '{}'",
            storage.describe(),
            word
        ))
    })?;

    if negative && min == 0 && magnitude != Some(0) {
        return Err(NumberError::Range(format!(
            "'{}' is negative but {} is unsigned",
            word,
            storage.describe()
        )));
    }

    let value = magnitude
        .and_then(|m| i128::try_from(m).ok())
        .map(|m| if negative { -m } else { m })
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| {
            NumberError::Range(format!(
                "'{}' does not fit in {} ({}..={})",
                word,
                storage.describe(),
                min,
                max
            ))
        })?;
    Ok(value)
}

/// Parse a floating-point literal. `single` selects `fp32` for `min`/`max`
/// and for rounding.
pub(crate) fn parse_float(word: &str, single: bool) -> Result<f64, NumberError> {
    let lower = word.to_ascii_lowercase();
    let (negative, body) = split_sign(&lower);
    let special = match body {
        "max" => Some(if single { f64::from(f32::MAX) } else { f64::MAX }),
        "min" => Some(if single {
            f64::from(f32::MIN_POSITIVE)
        } else {
            f64::MIN_POSITIVE
        }),
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(v) = special {
        return Ok(if negative { -v } else { v });
    }

    if single {
        if let Ok(v) = word.parse::<f32>() {
            return Ok(f64::from(v));
        }
    } else if let Ok(v) = word.parse::<f64>() {
        return Ok(v);
    }

    // Integer spellings (hex, octal) are valid float literals too.
    let (negative, digits) = split_sign(word);
    match parse_magnitude(digits) {
        Ok(Some(m)) => {
            let v = m as f64;
            Ok(if negative { -v } else { v })
        }
        Ok(None) => Err(NumberError::Range(format!("'{}' is too large", word))),
        Err(()) => Err(NumberError::Syntax(format!(
            "expected a value of type {}, found '{}'",
            if single { "fp32" } else { "fp64" },
            word
        ))),
    }
}
