//! Floating-point output formats for CSV values.

use std::fmt;
use std::str::FromStr;

use crate::error::{CopyError, Result};

/// printf-style format for `double` values.
///
/// The default is the shortest representation that parses back to the
/// same `f64`. Other formats follow C `printf` output for `%.Nf`, `%.Ne`
/// and `%.Ng`, including the two-digit signed exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoubleFormat {
    #[default]
    RoundTrip,
    Fixed(usize),
    Exp(usize),
    General(usize),
}

const DEFAULT_PRECISION: usize = 6;

impl DoubleFormat {
    /// Parse a format spec such as `%.15g`, `%lf` or `%e`. Empty means round-trip.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(DoubleFormat::RoundTrip);
        }
        let invalid = || CopyError::Config(format!("unsupported double format: {spec}"));

        let body = spec.strip_prefix('%').ok_or_else(invalid)?;
        let mut chars = body.chars();
        let conv = chars.next_back().ok_or_else(invalid)?;
        let head = chars.as_str();
        let head = head.strip_suffix('l').unwrap_or(head);

        let precision = if head.is_empty() {
            DEFAULT_PRECISION
        } else {
            head.strip_prefix('.')
                .and_then(|p| p.parse::<usize>().ok())
                .ok_or_else(invalid)?
        };

        match conv {
            'f' | 'F' => Ok(DoubleFormat::Fixed(precision)),
            'e' | 'E' => Ok(DoubleFormat::Exp(precision)),
            'g' | 'G' => Ok(DoubleFormat::General(precision)),
            _ => Err(invalid()),
        }
    }

    pub fn format(&self, value: f64) -> String {
        if !value.is_finite() {
            return value.to_string();
        }
        match *self {
            DoubleFormat::RoundTrip => value.to_string(),
            DoubleFormat::Fixed(p) => format!("{value:.p$}"),
            DoubleFormat::Exp(p) => {
                let sci = format!("{value:.p$e}");
                match split_exponent(&sci) {
                    Some((mantissa, exp)) => c_exponent(mantissa, exp),
                    None => sci,
                }
            }
            DoubleFormat::General(p) => general(value, p),
        }
    }
}

impl FromStr for DoubleFormat {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self> {
        DoubleFormat::parse(s)
    }
}

impl fmt::Display for DoubleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoubleFormat::RoundTrip => Ok(()),
            DoubleFormat::Fixed(p) => write!(f, "%.{p}f"),
            DoubleFormat::Exp(p) => write!(f, "%.{p}e"),
            DoubleFormat::General(p) => write!(f, "%.{p}g"),
        }
    }
}

fn split_exponent(sci: &str) -> Option<(&str, i32)> {
    let (mantissa, exp) = sci.split_once('e')?;
    Some((mantissa, exp.parse().ok()?))
}

fn c_exponent(mantissa: &str, exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// `%g`: pick fixed or exponent notation by the decimal exponent, then
/// drop trailing zeros.
fn general(value: f64, precision: usize) -> String {
    let p = precision.max(1);
    if value == 0.0 {
        return "0".to_string();
    }
    let sci = format!("{:.*e}", p - 1, value);
    let Some((mantissa, exp)) = split_exponent(&sci) else {
        return sci;
    };
    if exp < -4 || exp >= p as i32 {
        c_exponent(trim_fraction(mantissa), exp)
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_specs() {
        assert_eq!(DoubleFormat::parse("").unwrap(), DoubleFormat::RoundTrip);
        assert_eq!(DoubleFormat::parse("%g").unwrap(), DoubleFormat::General(6));
        assert_eq!(DoubleFormat::parse("%.15g").unwrap(), DoubleFormat::General(15));
        assert_eq!(DoubleFormat::parse("%lf").unwrap(), DoubleFormat::Fixed(6));
        assert_eq!(DoubleFormat::parse("%.2e").unwrap(), DoubleFormat::Exp(2));
        assert!(DoubleFormat::parse("%d").is_err());
        assert!(DoubleFormat::parse("8.2f").is_err());
        assert!(DoubleFormat::parse("%.xg").is_err());
    }

    #[test]
    fn test_round_trip_is_exact() {
        for v in [0.1, 1.0 / 3.0, 1e-300, 123456789.125, -0.5] {
            let text = DoubleFormat::RoundTrip.format(v);
            assert_eq!(text.parse::<f64>().unwrap(), v);
        }
        assert_eq!(DoubleFormat::RoundTrip.format(2.0), "2");
    }

    #[test]
    fn test_fixed_and_exp() {
        assert_eq!(DoubleFormat::Fixed(2).format(3.14159), "3.14");
        assert_eq!(DoubleFormat::Exp(2).format(1234.5), "1.23e+03");
        assert_eq!(DoubleFormat::Exp(1).format(0.00012), "1.2e-04");
    }

    #[test]
    fn test_general_matches_printf() {
        let g = DoubleFormat::General(6);
        assert_eq!(g.format(100.0), "100");
        assert_eq!(g.format(0.0001), "0.0001");
        assert_eq!(g.format(0.00001), "1e-05");
        assert_eq!(g.format(1234567.0), "1.23457e+06");
        assert_eq!(g.format(3.5), "3.5");
        assert_eq!(g.format(0.0), "0");
    }

    #[test]
    fn test_non_finite() {
        assert_eq!(DoubleFormat::Fixed(2).format(f64::NAN), "NaN");
        assert_eq!(DoubleFormat::General(6).format(f64::INFINITY), "inf");
    }

    #[test]
    fn test_display_round_trips_spec() {
        let f = DoubleFormat::parse("%.4g").unwrap();
        assert_eq!(DoubleFormat::parse(&f.to_string()).unwrap(), f);
    }
}
