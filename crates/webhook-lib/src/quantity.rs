//! Resource quantity parsing and canonical rendering
//!
//! Kubernetes encodes resource amounts as strings such as `500m`, `2`,
//! `128Mi`, `1G` or `12e6`. This module turns those strings into exact
//! integer amounts (nano-units) so the transform can work in milli-CPU and
//! bytes, and renders adjusted amounts back in the format of the original.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::fmt;
use thiserror::Error;

const NANOS_PER_UNIT: i128 = 1_000_000_000;
const NANOS_PER_MILLI: i128 = 1_000_000;

/// Errors raised while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("unknown suffix in quantity {0:?}")]
    UnknownSuffix(String),

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

/// How a quantity was written, kept so adjusted values read like the original
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    /// Powers of 1000 (`m`, `k`, `M`, ...) or no suffix
    DecimalSi,
    /// Powers of 1024 (`Ki`, `Mi`, `Gi`, ...)
    BinarySi,
    /// Scientific notation (`12e6`)
    DecimalExponent,
}

/// An exact resource amount plus the format it was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceQuantity {
    nanos: i128,
    format: QuantityFormat,
}

impl ResourceQuantity {
    /// Parse a quantity string such as `250m`, `1.5`, `64Mi` or `1e3`
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);

        let (whole, fraction) = match number.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (number, ""),
        };
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let scale = parse_suffix(suffix)
            .ok_or_else(|| QuantityError::UnknownSuffix(input.to_string()))?;
        let out_of_range = || QuantityError::OutOfRange(input.to_string());

        let mut mantissa: i128 = 0;
        for digit in whole.bytes().chain(fraction.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(out_of_range)?;
        }

        // value = mantissa * 10^(9 - fraction_len + decimal_exponent) * 2^binary_exponent
        let mut nanos = mantissa
            .checked_mul(1i128 << scale.binary_exponent)
            .ok_or_else(out_of_range)?;
        let exponent = 9 - fraction.len() as i64 + i64::from(scale.decimal_exponent);
        if exponent >= 0 {
            let factor = checked_pow10(exponent).ok_or_else(out_of_range)?;
            nanos = nanos.checked_mul(factor).ok_or_else(out_of_range)?;
        } else {
            // Anything finer than a nano-unit rounds up
            let divisor = checked_pow10(-exponent).ok_or_else(out_of_range)?;
            nanos = ceil_div(nanos, divisor);
        }

        Ok(Self {
            nanos: if negative { -nanos } else { nanos },
            format: scale.format,
        })
    }

    /// Build a quantity from milli-units (CPU)
    pub fn from_milli(milli: i64, format: QuantityFormat) -> Self {
        Self {
            nanos: i128::from(milli) * NANOS_PER_MILLI,
            format,
        }
    }

    /// Build a quantity from whole units (memory bytes)
    pub fn from_value(value: i64, format: QuantityFormat) -> Self {
        Self {
            nanos: i128::from(value) * NANOS_PER_UNIT,
            format,
        }
    }

    /// Amount in milli-units, rounded up
    pub fn milli_value(&self) -> i64 {
        saturate(ceil_div(self.nanos, NANOS_PER_MILLI))
    }

    /// Amount in whole units, rounded up
    pub fn value(&self) -> i64 {
        saturate(ceil_div(self.nanos, NANOS_PER_UNIT))
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// Convert into the wire type used by pod specs
    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.to_string())
    }
}

impl TryFrom<&Quantity> for ResourceQuantity {
    type Error = QuantityError;

    fn try_from(quantity: &Quantity) -> Result<Self, Self::Error> {
        Self::parse(&quantity.0)
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }

        if self.format == QuantityFormat::BinarySi
            && self.nanos % NANOS_PER_UNIT == 0
            && self.nanos.abs() >= 1024 * NANOS_PER_UNIT
        {
            let mut value = self.nanos / NANOS_PER_UNIT;
            let mut power = 0;
            while power < BINARY_SUFFIXES.len() - 1 && value % 1024 == 0 {
                value /= 1024;
                power += 1;
            }
            return write!(f, "{}{}", value, BINARY_SUFFIXES[power]);
        }

        // Largest power of 1000 that divides the amount exactly, starting at nano
        let mut mantissa = self.nanos;
        let mut exponent: i32 = -9;
        while exponent < 18 && mantissa % 1000 == 0 {
            mantissa /= 1000;
            exponent += 3;
        }

        match self.format {
            QuantityFormat::DecimalExponent if exponent == 0 => write!(f, "{}", mantissa),
            QuantityFormat::DecimalExponent => write!(f, "{}e{}", mantissa, exponent),
            _ => write!(f, "{}{}", mantissa, decimal_suffix(exponent)),
        }
    }
}

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

struct Scale {
    decimal_exponent: i32,
    binary_exponent: u32,
    format: QuantityFormat,
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let decimal = |decimal_exponent| Scale {
        decimal_exponent,
        binary_exponent: 0,
        format: QuantityFormat::DecimalSi,
    };
    let binary = |binary_exponent| Scale {
        decimal_exponent: 0,
        binary_exponent,
        format: QuantityFormat::BinarySi,
    };

    let scale = match suffix {
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "" => decimal(0),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        _ => {
            let exponent = suffix.strip_prefix(['e', 'E'])?;
            Scale {
                decimal_exponent: exponent.parse().ok()?,
                binary_exponent: 0,
                format: QuantityFormat::DecimalExponent,
            }
        }
    };
    Some(scale)
}

fn decimal_suffix(exponent: i32) -> &'static str {
    match exponent {
        -9 => "n",
        -6 => "u",
        -3 => "m",
        3 => "k",
        6 => "M",
        9 => "G",
        12 => "T",
        15 => "P",
        18 => "E",
        _ => "",
    }
}

fn checked_pow10(exponent: i64) -> Option<i128> {
    u32::try_from(exponent).ok().and_then(|e| 10i128.checked_pow(e))
}

fn ceil_div(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    if value % divisor > 0 {
        quotient + 1
    } else {
        quotient
    }
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_quantities() {
        assert_eq!(ResourceQuantity::parse("500m").unwrap().milli_value(), 500);
        assert_eq!(ResourceQuantity::parse("2").unwrap().milli_value(), 2000);
        assert_eq!(ResourceQuantity::parse("0.25").unwrap().milli_value(), 250);
        assert_eq!(ResourceQuantity::parse("1.5").unwrap().milli_value(), 1500);
        assert_eq!(ResourceQuantity::parse("100u").unwrap().milli_value(), 1);
    }

    #[test]
    fn test_parse_memory_quantities() {
        assert_eq!(ResourceQuantity::parse("128Mi").unwrap().value(), 128 * 1024 * 1024);
        assert_eq!(ResourceQuantity::parse("1Gi").unwrap().value(), 1 << 30);
        assert_eq!(ResourceQuantity::parse("1G").unwrap().value(), 1_000_000_000);
        assert_eq!(ResourceQuantity::parse("12e6").unwrap().value(), 12_000_000);
        assert_eq!(ResourceQuantity::parse("1.5Gi").unwrap().value(), 3 << 29);
        assert_eq!(ResourceQuantity::parse("4096").unwrap().value(), 4096);
    }

    #[test]
    fn test_parse_tracks_format() {
        assert_eq!(
            ResourceQuantity::parse("64Mi").unwrap().format(),
            QuantityFormat::BinarySi
        );
        assert_eq!(
            ResourceQuantity::parse("250m").unwrap().format(),
            QuantityFormat::DecimalSi
        );
        assert_eq!(
            ResourceQuantity::parse("1e3").unwrap().format(),
            QuantityFormat::DecimalExponent
        );
        // A bare E is the exa suffix, not an exponent
        assert_eq!(
            ResourceQuantity::parse("1E").unwrap().format(),
            QuantityFormat::DecimalSi
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ResourceQuantity::parse(""), Err(QuantityError::Empty));
        assert_eq!(ResourceQuantity::parse("   "), Err(QuantityError::Empty));
        assert!(matches!(
            ResourceQuantity::parse("abc"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            ResourceQuantity::parse("1.2.3"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            ResourceQuantity::parse("10Xi"),
            Err(QuantityError::UnknownSuffix(_))
        ));
        assert!(matches!(
            ResourceQuantity::parse("1e99"),
            Err(QuantityError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_parse_negative_and_zero() {
        let negative = ResourceQuantity::parse("-100m").unwrap();
        assert!(negative.is_negative());
        assert_eq!(negative.milli_value(), -100);

        assert!(ResourceQuantity::parse("0").unwrap().is_zero());
        assert!(ResourceQuantity::parse("0Mi").unwrap().is_zero());
    }

    #[test]
    fn test_sub_milli_rounds_up() {
        assert_eq!(ResourceQuantity::parse("1n").unwrap().milli_value(), 1);
        assert_eq!(ResourceQuantity::parse("0.1").unwrap().value(), 1);
    }

    #[test]
    fn test_render_decimal_si() {
        let cpu = |m| ResourceQuantity::from_milli(m, QuantityFormat::DecimalSi).to_string();
        assert_eq!(cpu(500), "500m");
        assert_eq!(cpu(100), "100m");
        assert_eq!(cpu(1000), "1");
        assert_eq!(cpu(1500), "1500m");
        assert_eq!(cpu(2_000_000), "2k");
        assert_eq!(cpu(0), "0");

        let bytes = ResourceQuantity::from_value(500_000_000, QuantityFormat::DecimalSi);
        assert_eq!(bytes.to_string(), "500M");
    }

    #[test]
    fn test_render_binary_si() {
        let mem = |b| ResourceQuantity::from_value(b, QuantityFormat::BinarySi).to_string();
        assert_eq!(mem(64 * 1024 * 1024), "64Mi");
        assert_eq!(mem(10 * 1024 * 1024), "10Mi");
        assert_eq!(mem(1536 * 1024), "1536Ki");
        assert_eq!(mem(357_913_941), "357913941");
        assert_eq!(mem(512), "512");
    }

    #[test]
    fn test_render_decimal_exponent() {
        let q = ResourceQuantity::from_value(6_000_000, QuantityFormat::DecimalExponent);
        assert_eq!(q.to_string(), "6e6");
        let q = ResourceQuantity::from_value(7, QuantityFormat::DecimalExponent);
        assert_eq!(q.to_string(), "7");
    }

    #[test]
    fn test_to_quantity_matches_display() {
        let q = ResourceQuantity::parse("256Mi").unwrap();
        assert_eq!(q.to_quantity(), Quantity("256Mi".to_string()));
        assert_eq!(ResourceQuantity::try_from(&q.to_quantity()).unwrap(), q);
    }
}
