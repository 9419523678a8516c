use std::fmt;

/// Result of a channel attribute read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    /// `numerator / denominator`
    Fractional(i32, i32),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(val) => val as f64,
            Self::Fractional(num, den) => num as f64 / den as f64,
        }
    }
}

impl fmt::Display for Value {
    /// Fractions print with nine decimals, integers as-is.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Int(val) => write!(f, "{val}"),
            Self::Fractional(_, 0) => f.write_str("0"),
            Self::Fractional(num, den) => {
                let nanos = num as i64 * 1_000_000_000 / den as i64;
                let sign = if nanos < 0 { "-" } else { "" };
                let nanos = nanos.unsigned_abs();
                write!(f, "{sign}{}.{:09}", nanos / 1_000_000_000, nanos % 1_000_000_000)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Value::Int(2748).to_string(), "2748");
        assert_eq!(Value::Fractional(5000, 4095).to_string(), "1.221001221");
        assert_eq!(Value::Fractional(-1, 4).to_string(), "-0.250000000");
        assert_eq!(Value::Fractional(2500, 255).to_string(), "9.803921568");
    }

    #[test]
    fn as_f64() {
        assert!((Value::Fractional(5000, 4095).as_f64() - 1.221).abs() < 1e-3);
        assert_eq!(Value::Int(3).as_f64(), 3.0);
    }
}
