//! Impairment values and the profiles built from them.
//!
//! The same value types describe what the kernel currently enforces ([`ImpairmentSnapshot`]) and
//! what we want it to enforce ([`ImpairmentProfile`]). Each value has two parsers: a strict one
//! ([`FromStr`]) for operator input, and a lenient one (`from_tc`) for the way `tc` renders
//! values in its `show` output.

use std::{fmt, net::Ipv4Addr, str::FromStr};

/// Error returned when a single impairment value cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("value is empty")]
    Empty,
    #[error("not a number: {0:?}")]
    NotANumber(String),
    #[error("negative values are not allowed")]
    Negative,
    #[error("unknown unit {0:?}")]
    UnknownUnit(String),
    #[error("missing unit, expected one of Kbit, Mbit, Gbit")]
    MissingUnit,
    #[error("must be greater than zero")]
    Zero,
    #[error("out of range, expected {0}")]
    OutOfRange(&'static str),
    #[error("{0}")]
    Invalid(&'static str),
}

/// Splits `s` into a leading magnitude and a trailing unit suffix.
fn split_magnitude(s: &str) -> (&str, &str) {
    let idx = s.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-')).unwrap_or(s.len());
    s.split_at(idx)
}

/// Parses a non-negative integer magnitude, with distinct errors for the common mistakes.
fn parse_integer(magnitude: &str, whole: &str) -> Result<u64, ValueError> {
    if magnitude.starts_with('-') {
        return Err(ValueError::Negative);
    }
    if magnitude.is_empty() || !magnitude.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValueError::NotANumber(whole.to_string()));
    }
    magnitude.parse().map_err(|_| ValueError::OutOfRange("a 64-bit integer"))
}

/// A fixed packet delay, with microsecond precision.
///
/// Displayed in milliseconds when it is a whole number of them (`50ms`), in microseconds
/// otherwise (`1500us`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Delay(u64);

impl Delay {
    /// No added delay.
    pub const ZERO: Self = Self(0);

    /// A delay of `us` microseconds.
    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    /// A delay of `ms` milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000))
    }

    /// The delay in microseconds.
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parses a delay as rendered by `tc`, e.g. `100ms`, `500us` or `1.5s`.
    pub fn from_tc(s: &str) -> Result<Self, ValueError> {
        let (magnitude, unit) = split_magnitude(s.trim());
        let value: f64 = magnitude.parse().map_err(|_| ValueError::NotANumber(s.to_string()))?;
        if value < 0.0 {
            return Err(ValueError::Negative);
        }

        let factor = match unit {
            "s" => 1_000_000.0,
            "ms" => 1_000.0,
            "us" => 1.0,
            "ns" => 0.001,
            other => return Err(ValueError::UnknownUnit(other.to_string())),
        };

        Ok(Self((value * factor).round() as u64))
    }
}

impl FromStr for Delay {
    type Err = ValueError;

    /// Parses `<integer>[ms|us|s]`. A bare integer is taken as milliseconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValueError::Empty);
        }

        let (magnitude, unit) = split_magnitude(s);
        let factor: u64 = match unit.to_ascii_lowercase().as_str() {
            "" | "ms" => 1_000,
            "us" => 1,
            "s" => 1_000_000,
            other => {
                // `abc` has no magnitude at all: report it as a number problem, not a unit one.
                if magnitude.is_empty() {
                    return Err(ValueError::NotANumber(s.to_string()));
                }
                return Err(ValueError::UnknownUnit(other.to_string()));
            }
        };

        let value = parse_integer(magnitude, s)?;
        value
            .checked_mul(factor)
            .map(Self)
            .ok_or(ValueError::OutOfRange("a delay that fits in 64-bit microseconds"))
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1_000 == 0 {
            write!(f, "{}ms", self.0 / 1_000)
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

/// Random packet loss, as an integer percentage in `0..=100`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LossPercent(u8);

impl LossPercent {
    /// No loss.
    pub const ZERO: Self = Self(0);
    /// Every packet dropped.
    pub const MAX: Self = Self(100);

    /// Returns `None` if `percent` is above 100.
    pub const fn new(percent: u8) -> Option<Self> {
        if percent <= 100 {
            Some(Self(percent))
        } else {
            None
        }
    }

    /// The percentage, `0..=100`.
    pub const fn get(&self) -> u8 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parses a loss as rendered by `tc`, e.g. `5%`. Fractional values are rejected.
    pub fn from_tc(s: &str) -> Result<Self, ValueError> {
        let s = s.trim();
        let digits = s.strip_suffix('%').unwrap_or(s);
        let value = parse_integer(digits, s)?;
        u8::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(ValueError::OutOfRange("an integer between 0 and 100"))
    }
}

impl FromStr for LossPercent {
    type Err = ValueError;

    /// Parses `<integer>[%]` in `0..=100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValueError::Empty);
        }
        let digits = s.strip_suffix('%').unwrap_or(s).trim_end();
        let value = parse_integer(digits, s)?;

        u8::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(ValueError::OutOfRange("an integer between 0 and 100"))
    }
}

impl fmt::Display for LossPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// SI bandwidth units accepted for a rate cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RateUnit {
    Kbit,
    Mbit,
    Gbit,
}

impl RateUnit {
    /// Bits per second in one of this unit.
    pub const fn bits_per_unit(self) -> u128 {
        match self {
            Self::Kbit => 1_000,
            Self::Mbit => 1_000_000,
            Self::Gbit => 1_000_000_000,
        }
    }

    fn parse(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "kbit" => Some(Self::Kbit),
            "mbit" => Some(Self::Mbit),
            "gbit" => Some(Self::Gbit),
            _ => None,
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Kbit => "Kbit",
            Self::Mbit => "Mbit",
            Self::Gbit => "Gbit",
        })
    }
}

/// A bandwidth cap: a positive magnitude and an SI unit.
///
/// Two rates are equal when they describe the same number of bits per second, since `tc`
/// re-renders rates in its own preferred unit (`1000Kbit` comes back as `1Mbit`).
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    value: u64,
    unit: RateUnit,
}

impl Rate {
    /// Returns `None` for a zero magnitude.
    pub const fn new(value: u64, unit: RateUnit) -> Option<Self> {
        if value == 0 {
            None
        } else {
            Some(Self { value, unit })
        }
    }

    /// The magnitude, in [`Self::unit`].
    pub const fn value(&self) -> u64 {
        self.value
    }

    pub const fn unit(&self) -> RateUnit {
        self.unit
    }

    /// The rate in bits per second, for comparing across units.
    pub const fn bits_per_second(&self) -> u128 {
        self.value as u128 * self.unit.bits_per_unit()
    }

    /// Parses a rate as rendered by `tc`, e.g. `10Mbit`.
    ///
    /// `tc` prints a rate in the largest unit that keeps it whole, so besides the request units
    /// this also accepts plain `bit` (when it is a whole number of Kbit) and `Tbit`, which
    /// is folded into Gbit.
    pub fn from_tc(s: &str) -> Result<Self, ValueError> {
        let s = s.trim();
        let (magnitude, unit) = split_magnitude(s);

        match unit.to_ascii_lowercase().as_str() {
            "bit" => {
                let bits = parse_integer(magnitude, s)?;
                if bits % 1_000 != 0 {
                    return Err(ValueError::Invalid("below 1Kbit resolution"));
                }
                Self::new(bits / 1_000, RateUnit::Kbit).ok_or(ValueError::Zero)
            }
            "tbit" => {
                let gbits = parse_integer(magnitude, s)?
                    .checked_mul(1_000)
                    .ok_or(ValueError::OutOfRange("a 64-bit number of Gbit"))?;
                Self::new(gbits, RateUnit::Gbit).ok_or(ValueError::Zero)
            }
            _ => s.parse(),
        }
    }
}

impl PartialEq for Rate {
    fn eq(&self, other: &Self) -> bool {
        self.bits_per_second() == other.bits_per_second()
    }
}

impl Eq for Rate {}

impl FromStr for Rate {
    type Err = ValueError;

    /// Parses `<positive integer><Kbit|Mbit|Gbit>`, unit case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValueError::Empty);
        }

        let (magnitude, unit) = split_magnitude(s);
        let value = parse_integer(magnitude, s)?;
        if unit.is_empty() {
            return Err(ValueError::MissingUnit);
        }
        let unit = RateUnit::parse(unit).ok_or_else(|| ValueError::UnknownUnit(unit.to_string()))?;

        Self::new(value, unit).ok_or(ValueError::Zero)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

/// Negotiated hardware link speed in Mb/s, as reported by `ethtool`. Display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkSpeed(pub u32);

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Mb/s", self.0)
    }
}

/// What the kernel currently enforces on one interface, parsed from live `tc` output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpairmentSnapshot {
    /// Added latency, zero if none.
    pub delay: Delay,
    /// Loss percentage, zero if none.
    pub loss: LossPercent,
    /// `None` when no bandwidth discipline is attached.
    pub rate: Option<Rate>,
}

impl ImpairmentSnapshot {
    /// True if nothing is being impaired.
    pub const fn is_clean(&self) -> bool {
        self.delay.is_zero() && self.loss.is_zero() && self.rate.is_none()
    }
}

impl fmt::Display for ImpairmentSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delay={} loss={}", self.delay, self.loss)?;
        match self.rate {
            Some(rate) => write!(f, " rate={rate}"),
            None => write!(f, " rate=unlimited"),
        }
    }
}

/// A complete, validated target for one interface.
///
/// Only [`crate::planner::plan`] produces non-clean profiles, so every value reaching the
/// reconciler has already passed its grammar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpairmentProfile {
    delay: Delay,
    loss: LossPercent,
    rate: Option<Rate>,
}

impl ImpairmentProfile {
    /// The profile meaning "no impairment".
    pub const fn clean() -> Self {
        Self { delay: Delay::ZERO, loss: LossPercent::ZERO, rate: None }
    }

    pub(crate) const fn new(delay: Delay, loss: LossPercent, rate: Option<Rate>) -> Self {
        Self { delay, loss, rate }
    }

    pub const fn delay(&self) -> Delay {
        self.delay
    }

    pub const fn loss(&self) -> LossPercent {
        self.loss
    }

    /// The bandwidth cap, if any.
    pub const fn rate(&self) -> Option<Rate> {
        self.rate
    }

    /// True if applying this profile is equivalent to removing all impairment.
    pub const fn is_clean(&self) -> bool {
        self.delay.is_zero() && self.loss.is_zero() && self.rate.is_none()
    }

    /// True if a netem root discipline is needed to realise this profile.
    ///
    /// A rate cap alone still needs one, as the bandwidth discipline hangs off netem's class.
    pub const fn needs_netem(&self) -> bool {
        !self.is_clean()
    }
}

impl From<ImpairmentProfile> for ImpairmentSnapshot {
    fn from(profile: ImpairmentProfile) -> Self {
        Self { delay: profile.delay, loss: profile.loss, rate: profile.rate }
    }
}

impl PartialEq<ImpairmentProfile> for ImpairmentSnapshot {
    fn eq(&self, other: &ImpairmentProfile) -> bool {
        *self == Self::from(*other)
    }
}

impl PartialEq<ImpairmentSnapshot> for ImpairmentProfile {
    fn eq(&self, other: &ImpairmentSnapshot) -> bool {
        other == self
    }
}

impl fmt::Display for ImpairmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&ImpairmentSnapshot::from(*self), f)
    }
}

/// A partial impairment update, as typed by an operator.
///
/// Every field is optional; a field that is `None` (or an empty string) leaves the current
/// value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpairmentRequest {
    /// Latency, e.g. `50ms`, `500us`, `2s` or `50` (milliseconds).
    pub delay: Option<String>,
    /// Loss percentage, e.g. `5` or `5%`.
    pub loss: Option<String>,
    /// Bandwidth cap, e.g. `10Mbit`.
    pub rate: Option<String>,
}

impl ImpairmentRequest {
    /// A request that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested delay.
    pub fn with_delay(mut self, delay: impl Into<String>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    /// Sets the requested loss.
    pub fn with_loss(mut self, loss: impl ToString) -> Self {
        self.loss = Some(loss.to_string());
        self
    }

    /// Sets the requested rate.
    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = Some(rate.into());
        self
    }

    /// A request that resets every field to its clean value.
    pub fn clean() -> Self {
        Self::new().with_delay("0ms").with_loss(0)
    }
}

/// One discovered interface and the impairment currently applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceState {
    /// Kernel interface name.
    pub name: String,
    /// First IPv4 address.
    pub address: Option<Ipv4Addr>,
    /// Impairment currently enforced.
    pub profile: ImpairmentSnapshot,
    /// Best effort. `None` when unknown or when a rate cap is in place.
    pub link_speed: Option<LinkSpeed>,
}
