/*
 * Exact arithmetic helpers and conversions between chain integers and ratios
 */

use ethers::types::{Address, U256};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::models::{QuoterError, Result};

/// Non-negative rational number over arbitrary-precision integers.
///
/// Every price and fee computation runs through this type; values are only
/// converted to integers at the output boundary with an explicit rounding
/// direction.
#[derive(Debug, Clone)]
pub struct Ratio {
    num: BigUint,
    den: BigUint,
}

impl Ratio {
    pub fn new(num: BigUint, den: BigUint) -> Result<Self> {
        if den.is_zero() {
            return Err(QuoterError::CalculationError(
                "Ratio with zero denominator".to_string(),
            ));
        }
        Ok(Self { num, den })
    }

    #[must_use]
    pub fn from_integer(value: BigUint) -> Self {
        Self {
            num: value,
            den: BigUint::one(),
        }
    }

    #[must_use]
    pub fn from_u256(value: U256) -> Self {
        Self::from_integer(u256_to_biguint(value))
    }

    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(QuoterError::CalculationError(format!(
                "Negative value not representable: {value}"
            )));
        }
        let mantissa = value.mantissa().unsigned_abs();
        Ok(Self {
            num: BigUint::from(mantissa),
            den: BigUint::from(10u32).pow(value.scale()),
        })
    }

    #[must_use]
    pub fn zero() -> Self {
        Self::from_integer(BigUint::zero())
    }

    #[must_use]
    pub fn one() -> Self {
        Self::from_integer(BigUint::one())
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.num.is_zero()
    }

    #[must_use]
    pub fn mul(&self, other: &Ratio) -> Ratio {
        Ratio {
            num: &self.num * &other.num,
            den: &self.den * &other.den,
        }
    }

    pub fn div(&self, other: &Ratio) -> Result<Ratio> {
        if other.is_zero() {
            return Err(QuoterError::CalculationError("Division by zero".to_string()));
        }
        Ok(Ratio {
            num: &self.num * &other.den,
            den: &self.den * &other.num,
        })
    }

    #[must_use]
    pub fn add(&self, other: &Ratio) -> Ratio {
        Ratio {
            num: &self.num * &other.den + &other.num * &self.den,
            den: &self.den * &other.den,
        }
    }

    /// `None` when the result would be negative.
    #[must_use]
    pub fn checked_sub(&self, other: &Ratio) -> Option<Ratio> {
        let lhs = &self.num * &other.den;
        let rhs = &other.num * &self.den;
        if lhs < rhs {
            return None;
        }
        Some(Ratio {
            num: lhs - rhs,
            den: &self.den * &other.den,
        })
    }

    #[must_use]
    pub fn floor(&self) -> BigUint {
        &self.num / &self.den
    }

    #[must_use]
    pub fn ceil(&self) -> BigUint {
        (&self.num + &self.den - BigUint::one()) / &self.den
    }

    #[must_use]
    pub fn round_half_up(&self) -> BigUint {
        (&self.num * 2u32 + &self.den) / (&self.den * 2u32)
    }

    /// Lowest terms; zero is `0/1`.
    #[must_use]
    pub fn reduced(&self) -> Ratio {
        if self.num.is_zero() {
            return Ratio::zero();
        }
        let g = gcd(self.num.clone(), self.den.clone());
        Ratio {
            num: &self.num / &g,
            den: &self.den / &g,
        }
    }

    /// Fractional digits of the exact decimal expansion, or `None` when it
    /// repeats.
    fn terminating_scale(&self) -> Option<u32> {
        let mut den = self.den.clone();
        let (mut twos, mut fives) = (0u32, 0u32);
        let (two, five) = (BigUint::from(2u32), BigUint::from(5u32));
        while (&den % &two).is_zero() {
            den /= &two;
            twos += 1;
        }
        while (&den % &five).is_zero() {
            den /= &five;
            fives += 1;
        }
        den.is_one().then_some(twos.max(fives))
    }

    /// Truncated decimal rendering with at most `scale` fractional digits.
    #[must_use]
    pub fn to_decimal_string(&self, scale: u32) -> String {
        let int = &self.num / &self.den;
        let rem = &self.num % &self.den;
        if rem.is_zero() || scale == 0 {
            return int.to_string();
        }
        let frac = rem * BigUint::from(10u32).pow(scale) / &self.den;
        let digits = format!("{:0>width$}", frac.to_string(), width = scale as usize);
        let digits = digits.trim_end_matches('0');
        if digits.is_empty() {
            int.to_string()
        } else {
            format!("{int}.{digits}")
        }
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Self) -> bool {
        &self.num * &other.den == &other.num * &self.den
    }
}

impl Eq for Ratio {}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.num * &other.den).cmp(&(&other.num * &self.den))
    }
}

fn gcd(mut a: BigUint, mut b: BigUint) -> BigUint {
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

/// Exact: the full decimal expansion when it terminates (every Q192 and
/// power-of-ten price does), otherwise `num/den` in lowest terms.
impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reduced = self.reduced();
        match reduced.terminating_scale() {
            Some(scale) => f.write_str(&reduced.to_decimal_string(scale)),
            None => write!(f, "{}/{}", reduced.num, reduced.den),
        }
    }
}

impl FromStr for Ratio {
    type Err = QuoterError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || QuoterError::CalculationError(format!("Invalid decimal string: {s}"));
        let digits_only = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
        if let Some((num, den)) = s.split_once('/') {
            if !digits_only(num) || !digits_only(den) {
                return Err(invalid());
            }
            let num = BigUint::from_str(num).map_err(|_| invalid())?;
            let den = BigUint::from_str(den).map_err(|_| invalid())?;
            return Ratio::new(num, den);
        }
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        if int.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        let digits = format!("{int}{frac}");
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let num = BigUint::from_str(&digits).map_err(|_| invalid())?;
        let scale = u32::try_from(frac.len()).map_err(|_| invalid())?;
        Ratio::new(num, BigUint::from(10u32).pow(scale))
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ratio::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[must_use]
pub fn u256_to_biguint(value: U256) -> BigUint {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    BigUint::from_bytes_be(&buf)
}

pub fn biguint_to_u256(value: &BigUint) -> Result<U256> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(QuoterError::CalculationError(format!(
            "Value {value} overflows uint256"
        )));
    }
    Ok(U256::from_big_endian(&bytes))
}

/// token1 per token0 from a Q64.96 square-root price: (sqrtPriceX96 / 2^96)^2.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256) -> Result<Ratio> {
    if sqrt_price_x96.is_zero() {
        return Err(QuoterError::CalculationError("Invalid sqrt price: zero".to_string()));
    }
    let sqrt_price = u256_to_biguint(sqrt_price_x96);
    let q192 = BigUint::one() << 192u32;
    Ratio::new(&sqrt_price * &sqrt_price, q192)
}

pub fn parse_address(address: &str) -> Result<Address> {
    if !address.starts_with("0x") || address.len() != 42 {
        return Err(QuoterError::ConfigError(format!("Invalid address format: {address}")));
    }
    Address::from_str(address)
        .map_err(|e| QuoterError::ConfigError(format!("Invalid address {address}: {e}")))
}
