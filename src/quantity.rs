//! Validation of Kubernetes quantity strings such as `1024Mi`, `500m` or `1e3`.
//!
//! The grammar follows the apimachinery serialization format:
//!
//! ```plain
//! <quantity>     ::= <signedNumber><suffix>
//! <suffix>       ::= <binarySI> | <decimalExponent> | <decimalSI>
//! <binarySI>     ::= Ki | Mi | Gi | Ti | Pi | Ei
//! <decimalSI>    ::= n | u | m | "" | k | M | G | T | P | E
//! <decimalExponent> ::= "e" <signedNumber> | "E" <signedNumber>
//! ```
//!
//! Only validation is needed here. The number is kept exactly as written so that the value
//! handed to the API server is the one the user configured.

use std::{fmt::Display, num::ParseIntError, str::FromStr};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseQuantityError {
    #[error("input is either empty or contains non-ascii characters")]
    InvalidFormat,

    #[error("failed to parse {0:?} as a decimal number")]
    InvalidNumber(String),

    #[error("failed to parse {0:?} as quantity suffix")]
    InvalidSuffix(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Quantity {
    /// Validated `<sign><digits>[.<digits>]`, without a leading `+`.
    number: String,
    suffix: Option<Suffix>,
}

/// Accepts `<digits>`, `<digits>.`, `.<digits>` and `<digits>.<digits>`.
fn is_decimal(number: &str) -> bool {
    let (integer, fraction) = number.split_once('.').unwrap_or((number, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());

    (!integer.is_empty() || !fraction.is_empty()) && all_digits(integer) && all_digits(fraction)
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() || !input.is_ascii() {
            return Err(ParseQuantityError::InvalidFormat);
        }

        let sign_len = usize::from(input.starts_with(['+', '-']));
        let suffix_index = input[sign_len..]
            .find(|c: char| c != '.' && !c.is_ascii_digit())
            .map(|idx| idx + sign_len);

        let (number, suffix) = match suffix_index {
            Some(idx) => input.split_at(idx),
            None => (input, ""),
        };

        if !is_decimal(&number[sign_len..]) {
            return Err(ParseQuantityError::InvalidNumber(number.to_string()));
        }

        let suffix = match suffix {
            "" => None,
            s => Some(Suffix::from_str(s)?),
        };

        Ok(Self {
            number: number.strip_prefix('+').unwrap_or(number).to_string(),
            suffix,
        })
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.suffix {
            Some(suffix) => write!(f, "{}{suffix}", self.number),
            None => f.write_str(&self.number),
        }
    }
}

impl From<&Quantity> for K8sQuantity {
    fn from(value: &Quantity) -> Self {
        K8sQuantity(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Suffix {
    BinarySI(BinarySI),
    DecimalSI(DecimalSI),
    DecimalExponent(i32),
}

impl FromStr for Suffix {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Ok(binary) = BinarySI::from_str(input) {
            return Ok(Self::BinarySI(binary));
        }

        if let Ok(decimal) = DecimalSI::from_str(input) {
            return Ok(Self::DecimalSI(decimal));
        }

        if let Some(exponent) = input.strip_prefix(['e', 'E']) {
            return exponent
                .parse()
                .map(Self::DecimalExponent)
                .map_err(|_: ParseIntError| ParseQuantityError::InvalidSuffix(input.to_string()));
        }

        Err(ParseQuantityError::InvalidSuffix(input.to_string()))
    }
}

impl Display for Suffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Suffix::BinarySI(binary) => write!(f, "{binary}"),
            Suffix::DecimalSI(decimal) => write!(f, "{decimal}"),
            Suffix::DecimalExponent(exponent) => write!(f, "e{exponent}"),
        }
    }
}

/// Byte multiples based on powers of 2 (IEC 80000-13, as shortened by Kubernetes).
#[derive(Clone, Copy, Debug, PartialEq, strum::Display, strum::EnumString)]
pub enum BinarySI {
    #[strum(serialize = "Ki")]
    Kibi,

    #[strum(serialize = "Mi")]
    Mebi,

    #[strum(serialize = "Gi")]
    Gibi,

    #[strum(serialize = "Ti")]
    Tebi,

    #[strum(serialize = "Pi")]
    Pebi,

    #[strum(serialize = "Ei")]
    Exbi,
}

/// SI multiples based on powers of 10. Note that Kubernetes uses a lower-case `k` for kilo.
#[derive(Clone, Copy, Debug, PartialEq, strum::Display, strum::EnumString)]
pub enum DecimalSI {
    #[strum(serialize = "n")]
    Nano,

    #[strum(serialize = "u")]
    Micro,

    #[strum(serialize = "m")]
    Milli,

    #[strum(serialize = "k")]
    Kilo,

    #[strum(serialize = "M")]
    Mega,

    #[strum(serialize = "G")]
    Giga,

    #[strum(serialize = "T")]
    Tera,

    #[strum(serialize = "P")]
    Peta,

    #[strum(serialize = "E")]
    Exa,
}
