//! Exact arithmetic over `k8s_openapi` quantities
//!
//! A parsed quantity is held as an integer count of nano-units, so sums are
//! exact. Sub-nano fractions round away from zero at parse time, and
//! `milli_value`/`value` round away from zero, as the API machinery does.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parsed amounts are kept in units of 10^-9.
const NANO_EXPONENT: i32 = 9;

/// Mantissas longer than this can't be represented exactly.
const MAX_DIGITS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("invalid quantity: {0:?}")]
    Invalid(String),
    #[error("quantity out of range: {0:?}")]
    OutOfRange(String),
}

/// Summable amount of a resource, exact to the nano-unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount {
    nanos: i128,
}

impl Amount {
    pub const ZERO: Amount = Amount { nanos: 0 };

    pub fn from_quantity(quantity: &Quantity) -> Result<Self, QuantityError> {
        Self::parse(&quantity.0)
    }

    pub fn parse(raw: &str) -> Result<Self, QuantityError> {
        let invalid = || QuantityError::Invalid(raw.to_string());
        let out_of_range = || QuantityError::OutOfRange(raw.to_string());

        let s = raw.trim();
        let (negative, unsigned) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() || fraction.contains('.') {
            return Err(invalid());
        }
        let digits = format!("{}{}", whole, fraction);
        let digits = digits.trim_start_matches('0');
        if digits.len() > MAX_DIGITS {
            return Err(out_of_range());
        }
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| invalid())?
        };

        let (multiplier, exponent) = suffix_scale(suffix).ok_or_else(invalid)?;
        let scaled = mantissa.checked_mul(multiplier).ok_or_else(out_of_range)?;

        let shift = NANO_EXPONENT
            .saturating_add(exponent)
            .saturating_sub(fraction.len() as i32);
        let nanos = if shift >= 0 {
            10i128
                .checked_pow(shift as u32)
                .and_then(|p| scaled.checked_mul(p))
                .ok_or_else(out_of_range)?
        } else {
            match 10i128.checked_pow(shift.unsigned_abs()) {
                Some(divisor) => div_away_from_zero(scaled, divisor),
                // smaller than any representable step: the minimum non-zero amount
                None => i128::from(scaled != 0),
            }
        };

        Ok(Amount {
            nanos: if negative { -nanos } else { nanos },
        })
    }

    /// Value in thousandths of the base unit (millicores for CPU).
    pub fn milli_value(&self) -> i64 {
        clamp_i64(div_away_from_zero(self.nanos, 1_000_000))
    }

    /// Value in base units (bytes for memory).
    pub fn value(&self) -> i64 {
        clamp_i64(div_away_from_zero(self.nanos, 1_000_000_000))
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.nanos = self.nanos.saturating_add(rhs.nanos);
    }
}

/// `(integer multiplier, power of ten)` for a suffix.
fn suffix_scale(suffix: &str) -> Option<(i128, i32)> {
    let scale = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        exp if exp.starts_with(|c: char| c == 'e' || c == 'E') => (1, exp[1..].parse().ok()?),
        _ => return None,
    };
    Some(scale)
}

fn div_away_from_zero(n: i128, d: i128) -> i128 {
    let q = n / d;
    if n % d == 0 {
        q
    } else if n > 0 {
        q + 1
    } else {
        q - 1
    }
}

fn clamp_i64(n: i128) -> i64 {
    i64::try_from(n).unwrap_or(if n > 0 { i64::MAX } else { i64::MIN })
}
