use std::{
    fmt,
    ops::{Add, Mul},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Decimal quantity stored in milli-units (value multiplied by 1000),
/// so sub-integer resolution survives aggregation.
///
/// Rendered as `"1500m"` when fractional and as a plain integer otherwise,
/// and parsed back from either form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    pub fn from_whole(value: i64) -> Self {
        Quantity(value.saturating_mul(1000))
    }

    /// Rounds to the nearest milli-unit.
    pub fn from_f64(value: f64) -> Self {
        Quantity((value * 1000.0).round() as i64)
    }

    pub fn milli(&self) -> i64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `ceil(self / target)`, the per-trigger desired replica count.
    /// A non-positive target yields 0 rather than dividing by it.
    pub fn div_ceil(&self, target: Quantity) -> u32 {
        if target.0 <= 0 || self.0 <= 0 {
            return 0;
        }
        ((self.0 + target.0 - 1) / target.0).min(u32::MAX as i64) as u32
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u32> for Quantity {
    type Output = Quantity;

    fn mul(self, rhs: u32) -> Quantity {
        Quantity(self.0.saturating_mul(rhs as i64))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl FromStr for Quantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty quantity".to_string());
        }
        if let Some(milli) = s.strip_suffix('m') {
            let milli = milli
                .parse::<i64>()
                .map_err(|_| format!("invalid quantity {:?}", s))?;
            return Ok(Quantity(milli));
        }
        if let Some((whole, frac)) = s.split_once('.') {
            let whole = whole
                .parse::<i64>()
                .map_err(|_| format!("invalid quantity {:?}", s))?;
            // At most milli resolution, further digits are truncated.
            let frac = format!("{:0<3.3}", frac);
            let frac = frac
                .parse::<i64>()
                .map_err(|_| format!("invalid quantity {:?}", s))?;
            let milli = whole.saturating_mul(1000) + if whole < 0 { -frac } else { frac };
            return Ok(Quantity(milli));
        }
        let whole = s
            .parse::<i64>()
            .map_err(|_| format!("invalid quantity {:?}", s))?;
        Ok(Quantity::from_whole(whole))
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl<'de> de::Visitor<'de> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a quantity string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                Ok(Quantity::from_whole(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                Ok(Quantity::from_whole(v as i64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
                Ok(Quantity::from_f64(v))
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrip() {
        assert_eq!("12".parse::<Quantity>().unwrap(), Quantity::from_whole(12));
        assert_eq!("250m".parse::<Quantity>().unwrap(), Quantity::from_milli(250));
        assert_eq!("1.5".parse::<Quantity>().unwrap(), Quantity::from_milli(1500));
        assert_eq!(Quantity::from_milli(1500).to_string(), "1500m");
        assert_eq!(Quantity::from_whole(3).to_string(), "3");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Quantity>().is_err());
        assert!("12q".parse::<Quantity>().is_err());
        assert!("m".parse::<Quantity>().is_err());
    }

    #[test]
    fn div_ceil_rounds_up() {
        let value = Quantity::from_whole(12);
        let target = Quantity::from_whole(5);
        assert_eq!(value.div_ceil(target), 3);
        assert_eq!(Quantity::from_whole(10).div_ceil(target), 2);
        assert_eq!(Quantity::ZERO.div_ceil(target), 0);
        assert_eq!(value.div_ceil(Quantity::ZERO), 0);
    }

    #[test]
    fn serde_accepts_numbers_and_strings() {
        let q: Quantity = serde_json::from_str("\"5\"").unwrap();
        assert_eq!(q, Quantity::from_whole(5));
        let q: Quantity = serde_json::from_str("5").unwrap();
        assert_eq!(q, Quantity::from_whole(5));
        let q: Quantity = serde_json::from_str("0.5").unwrap();
        assert_eq!(q, Quantity::from_milli(500));
        assert_eq!(serde_json::to_string(&q).unwrap(), "\"500m\"");
    }
}
