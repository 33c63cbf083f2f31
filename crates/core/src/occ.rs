//! OCC option symbol encoding.
//!
//! Format: `<ROOT><YYMMDD><C|P><STRIKE*1000, 8 digits>`, e.g. a SPY $416 put
//! expiring 2024-01-16 is `SPY240116P00416000`.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::OptionType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OccError {
    #[error("symbol too short: {0}")]
    TooShort(String),
    #[error("invalid expiration in symbol: {0}")]
    BadExpiration(String),
    #[error("invalid option type marker: {0}")]
    BadType(char),
    #[error("invalid strike digits: {0}")]
    BadStrike(String),
}

/// Decoded parts of an OCC symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccSymbol {
    pub root: String,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub strike: Decimal,
}

/// Encodes an OCC option symbol. The strike is scaled by 1000 and
/// zero-padded to eight digits.
#[must_use]
pub fn encode(root: &str, expiration: NaiveDate, option_type: OptionType, strike: Decimal) -> String {
    let marker = match option_type {
        OptionType::Call => 'C',
        OptionType::Put => 'P',
    };
    let millis = (strike * Decimal::from(1000)).round().to_i64().unwrap_or(0);
    format!(
        "{}{}{}{:08}",
        root.to_uppercase(),
        expiration.format("%y%m%d"),
        marker,
        millis
    )
}

/// Decodes an OCC symbol back into its parts.
///
/// # Errors
/// Returns an error when the trailing 15 characters do not parse as
/// date, type marker and strike.
pub fn decode(symbol: &str) -> Result<OccSymbol, OccError> {
    // ROOT (1..6 chars) + YYMMDD + C/P + 8 strike digits.
    if symbol.len() < 16 {
        return Err(OccError::TooShort(symbol.to_string()));
    }
    let (root, tail) = symbol.split_at(symbol.len() - 15);
    let (date_part, rest) = tail.split_at(6);
    let marker = rest.chars().next().ok_or(OccError::TooShort(symbol.to_string()))?;
    let strike_part = &rest[1..];

    let expiration = NaiveDate::parse_from_str(date_part, "%y%m%d")
        .map_err(|_| OccError::BadExpiration(date_part.to_string()))?;
    let option_type = match marker {
        'C' => OptionType::Call,
        'P' => OptionType::Put,
        other => return Err(OccError::BadType(other)),
    };
    let millis: i64 = strike_part
        .parse()
        .map_err(|_| OccError::BadStrike(strike_part.to_string()))?;
    let strike = Decimal::from(millis) / Decimal::from(1000);

    Ok(OccSymbol {
        root: root.to_string(),
        expiration,
        option_type,
        strike,
    })
}

/// Underlying root of an OCC symbol, or the symbol itself when it is a plain
/// equity symbol (no 15-character option tail).
#[must_use]
pub fn underlying(symbol: &str) -> &str {
    if symbol.len() >= 16 {
        let tail = &symbol[symbol.len() - 15..];
        let looks_like_option = tail[..6].chars().all(|c| c.is_ascii_digit())
            && matches!(tail.as_bytes()[6], b'C' | b'P')
            && tail[7..].chars().all(|c| c.is_ascii_digit());
        if looks_like_option {
            return &symbol[..symbol.len() - 15];
        }
    }
    symbol
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn encodes_spec_example() {
        let exp = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert_eq!(
            encode("SPY", exp, OptionType::Put, dec!(416)),
            "SPY240116P00416000"
        );
    }

    #[test]
    fn encodes_fractional_strike() {
        let exp = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        assert_eq!(
            encode("IWM", exp, OptionType::Call, dec!(212.5)),
            "IWM260320C00212500"
        );
    }

    #[test]
    fn decode_reverses_encode() {
        let exp = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let sym = encode("QQQ", exp, OptionType::Call, dec!(401.25));
        let parts = decode(&sym).unwrap();
        assert_eq!(parts.root, "QQQ");
        assert_eq!(parts.expiration, exp);
        assert_eq!(parts.option_type, OptionType::Call);
        assert_eq!(parts.strike, dec!(401.25));
    }

    #[test]
    fn decoded_strike_digits_equal_thousand_times_strike() {
        let sym = "SPY240116P00416000";
        let parts = decode(sym).unwrap();
        assert_eq!(parts.strike * dec!(1000), dec!(416000));
    }

    #[test]
    fn decode_rejects_bad_marker() {
        assert_eq!(
            decode("SPY240116X00416000"),
            Err(OccError::BadType('X'))
        );
    }

    #[test]
    fn decode_rejects_short_symbol() {
        assert!(matches!(decode("SPY"), Err(OccError::TooShort(_))));
    }

    #[test]
    fn underlying_strips_option_tail() {
        assert_eq!(underlying("SPY240116P00416000"), "SPY");
        assert_eq!(underlying("DIA260320C00390000"), "DIA");
        assert_eq!(underlying("SPY"), "SPY");
        assert_eq!(underlying("BRKB"), "BRKB");
    }
}
