use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::time::Duration;
use thiserror::Error;

const NANOS_PER_SECOND: u32 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    #[error("local position {0} is outside [0, 1)")]
    LocalOutOfRange(BigRational),
    #[error("global position {0} is negative")]
    NegativePosition(BigRational),
    #[error("'{0}' is not a decimal number")]
    InvalidDecimal(String),
}

/// Declares an exact-fraction newtype. The wrapped value is always in lowest
/// terms because `BigRational` normalizes on construction.
macro_rules! rational_unit {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(BigRational);

        impl $name {
            #[inline(always)]
            pub fn value(&self) -> &BigRational {
                &self.0
            }

            /// Lossy view for logs and displays only.
            pub fn to_f64(&self) -> f64 {
                self.0.to_f64().unwrap_or(f64::NAN)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

rational_unit!(
    /// Quarter-note-relative position, as authored in `#BPMS`/`#STOPS`.
    Beat
);
rational_unit!(
    /// Four beats.
    Measure
);
rational_unit!(
    /// Position inside a single measure, `0 <= value < 1`.
    LocalPosition
);
rational_unit!(
    /// Measure-based position from the start of the chart, `value >= 0`.
    GlobalPosition
);
rational_unit!(
    /// Elapsed seconds. Negative values describe pre-roll.
    Time
);

impl Beat {
    pub fn new(value: BigRational) -> Self {
        Self(value)
    }
}

impl Measure {
    pub fn new(value: BigRational) -> Self {
        Self(value)
    }

    pub fn from_integer(measure: i64) -> Self {
        Self(BigRational::from_integer(measure.into()))
    }

    pub fn from_beat(beat: &Beat) -> Self {
        Self(beat.value() / BigRational::from_integer(4.into()))
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }
}

impl LocalPosition {
    pub fn new(value: BigRational) -> Result<Self, TimeError> {
        if value.is_negative() || value >= BigRational::one() {
            return Err(TimeError::LocalOutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Position of row `index` in a measure split into `rows` equal parts.
    pub fn from_row_index(index: usize, rows: usize) -> Result<Self, TimeError> {
        let value = BigRational::new(BigInt::from(index), BigInt::from(rows.max(1)));
        Self::new(value)
    }
}

impl GlobalPosition {
    pub fn new(value: BigRational) -> Result<Self, TimeError> {
        if value.is_negative() {
            return Err(TimeError::NegativePosition(value));
        }
        Ok(Self(value))
    }

    pub fn from_local(measure_index: u64, local: &LocalPosition) -> Self {
        Self(BigRational::from_integer(measure_index.into()) + local.value())
    }

    /// Integer measure this position falls in.
    pub fn measure_index(&self) -> u64 {
        self.0.floor().to_integer().to_u64().unwrap_or(u64::MAX)
    }

    /// Reduced denominator, the input of snap classification.
    pub fn denominator(&self) -> &BigInt {
        self.0.denom()
    }
}

impl Time {
    pub fn new(value: BigRational) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigRational::zero())
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self(BigRational::from_integer(seconds.into()))
    }

    pub fn from_ratio(numer: i64, denom: i64) -> Self {
        Self(BigRational::new(numer.into(), denom.into()))
    }

    pub fn parse(text: &str) -> Result<Self, TimeError> {
        parse_decimal(text).map(Self)
    }

    /// Exact time of audio frame `frame` at `sample_rate` Hz.
    pub fn from_frames(frame: u64, sample_rate: u32) -> Self {
        Self(BigRational::new(frame.into(), sample_rate.max(1).into()))
    }

    /// First audio frame at or after this time; negative times clamp to 0.
    pub fn to_frame(&self, sample_rate: u32) -> u64 {
        if self.0.is_negative() {
            return 0;
        }
        let frames = &self.0 * BigRational::from_integer(sample_rate.into());
        frames.ceil().to_integer().to_u64().unwrap_or(u64::MAX)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(BigRational::new(
            duration.as_nanos().into(),
            NANOS_PER_SECOND.into(),
        ))
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    /// Decimal text that `parse_decimal` reads back. Exact whenever the value
    /// has a terminating expansion, otherwise rounded to nanoseconds.
    pub fn to_decimal(&self) -> String {
        let digits = terminating_digits(self.0.denom()).unwrap_or(NANO_DIGITS);
        let scale = BigRational::from_integer(num_traits::pow(BigInt::from(10), digits));
        let scaled = (&self.0 * scale).round().to_integer();

        let mut text = scaled.abs().to_string();
        if text.len() <= digits {
            text.insert_str(0, &"0".repeat(digits + 1 - text.len()));
        }
        let (int_part, frac_part) = text.split_at(text.len() - digits);
        let frac_part = frac_part.trim_end_matches('0');
        let sign = if scaled.is_negative() { "-" } else { "" };
        if frac_part.is_empty() {
            format!("{sign}{int_part}")
        } else {
            format!("{sign}{int_part}.{frac_part}")
        }
    }
}

const NANO_DIGITS: usize = 9;

/// Digits after the point a fraction with this denominator needs as a
/// terminating decimal. `None` when the expansion repeats.
fn terminating_digits(denom: &BigInt) -> Option<usize> {
    let mut rest = denom.abs();
    let mut count = |factor: u32| {
        let factor = BigInt::from(factor);
        let mut n = 0usize;
        while !rest.is_zero() && (&rest % &factor).is_zero() {
            rest /= &factor;
            n += 1;
        }
        n
    };
    let twos = count(2);
    let fives = count(5);
    rest.is_one().then_some(twos.max(fives))
}

impl Add for &Time {
    type Output = Time;

    fn add(self, rhs: &Time) -> Time {
        Time(&self.0 + &rhs.0)
    }
}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl Sub for &Time {
    type Output = Time;

    fn sub(self, rhs: &Time) -> Time {
        Time(&self.0 - &rhs.0)
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl Neg for Time {
    type Output = Time;

    fn neg(self) -> Time {
        Time(-self.0)
    }
}

/// Converts decimal text such as `-0.009`, `120.5` or `4` into an exact
/// fraction. Exponents are not accepted.
pub fn parse_decimal(text: &str) -> Result<BigRational, TimeError> {
    let invalid = || TimeError::InvalidDecimal(text.to_string());
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid());
    }

    let mut numer_text = String::with_capacity(int_part.len() + frac_part.len());
    numer_text.push_str(int_part);
    numer_text.push_str(frac_part);
    let numer: BigInt = numer_text.parse().map_err(|_| invalid())?;
    let denom = num_traits::pow(BigInt::from(10), frac_part.len());
    let value = BigRational::new(numer, denom);
    Ok(if negative { -value } else { value })
}

/// Shorthand for building exact values in code, `ratio(1, 4)` is a quarter.
#[inline(always)]
pub fn ratio(numer: i64, denom: i64) -> BigRational {
    BigRational::new(numer.into(), denom.into())
}
