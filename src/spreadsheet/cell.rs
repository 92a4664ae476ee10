use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

/// Classification of a cell format's number format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum NumberKind {
    #[default]
    Plain,
    DateTime,
    Date,
    Time,
}

impl NumberKind {
    /// Classifies built-in number format ids.
    pub(crate) fn from_builtin_id(id: u32) -> Option<Self> {
        match id {
            22 => Some(Self::DateTime),
            14..=17 => Some(Self::Date),
            18..=21 | 45..=47 => Some(Self::Time),
            _ => None,
        }
    }

    /// Scans a custom format code for date/time tokens, ignoring quoted
    /// literals, escaped characters and bracketed sections such as colors.
    pub(crate) fn from_format_code(format: &str) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut is_date = false;
        let mut is_time = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' if !is_literal => is_escaped = true,
                '"' => is_literal = !is_literal,
                ']' if is_bracket => is_bracket = false,
                '[' if !is_literal => is_bracket = true,
                _ if is_literal || is_bracket => (),
                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }
        match (is_date, is_time) {
            (true, true) => Self::DateTime,
            (true, false) => Self::Date,
            (false, true) => Self::Time,
            (false, false) => Self::Plain,
        }
    }

    /// Formats whose numbers read back as calendar timestamps. Pure time
    /// formats stay numeric.
    pub(crate) fn is_date(&self) -> bool {
        matches!(self, Self::Date | Self::DateTime)
    }
}

/// A decoded cell value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Error(String),
}

impl CellValue {
    /// True for missing cells and whitespace-only strings.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    /// Numeric reading used by sums and distribution: numbers as-is,
    /// text parsed after trimming and dropping thousands separators.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(number) => Some(*number),
            CellValue::Text(text) => text.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        }
    }

    /// The integer a value denotes when it is an integral number or a
    /// digit-only string.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CellValue::Number(number) if number.fract() == 0.0 && number.is_finite() => Some(*number as i64),
            CellValue::Text(text) => {
                let text = text.trim();
                if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                    text.parse::<i64>().ok()
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Returns the same value with surrounding whitespace removed from strings.
    pub fn trimmed(self) -> CellValue {
        match self {
            CellValue::Text(text) if text.trim().len() != text.len() => CellValue::Text(text.trim().to_owned()),
            other => other,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl Display for CellValue {
    /// Integral numbers print without a fraction, so `5.0` reads "5".
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(value) => write!(f, "{}", if *value { "TRUE" } else { "FALSE" }),
            CellValue::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => write!(f, "{}", *value as i64),
            CellValue::Number(value) => write!(f, "{}", value),
            CellValue::Text(value) => write!(f, "{}", value),
            CellValue::DateTime(value) if value.time() == chrono::NaiveTime::MIN => write!(f, "{}", value.format("%Y-%m-%d")),
            CellValue::DateTime(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Error(value) => write!(f, "{}", value),
        }
    }
}

/// Converts an Excel serial number into a timestamp.
/// The 1900 system carries the Lotus 1-2-3 leap year bug (serial 60 is 1900-02-29).
pub(crate) fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let base = if is_1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else if days < 60 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    let millis = (serial.fract() * 86_400_000f64).round() as i64;
    base.and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_format_detection() {
        assert_eq!(NumberKind::from_format_code("yyyy-mm-dd"), NumberKind::Date);
        assert_eq!(NumberKind::from_format_code("hh:mm"), NumberKind::Time);
        assert_eq!(NumberKind::from_format_code("dd/mm/yyyy hh:mm"), NumberKind::DateTime);
        assert_eq!(NumberKind::from_format_code("#,##0.00\" days\""), NumberKind::Plain);
        assert_eq!(NumberKind::from_format_code("[Red]0.00"), NumberKind::Plain);
        assert_eq!(NumberKind::from_builtin_id(14), Some(NumberKind::Date));
        assert_eq!(NumberKind::from_builtin_id(2), None);
    }

    #[test]
    fn serial_dates() {
        let date = serial_to_datetime(45292.0, false).unwrap();
        assert_eq!(date.date(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let date = serial_to_datetime(1.0, false).unwrap();
        assert_eq!(date.date(), NaiveDate::from_ymd_opt(1900, 1, 1).unwrap());
        let date = serial_to_datetime(0.0, true).unwrap();
        assert_eq!(date.date(), NaiveDate::from_ymd_opt(1904, 1, 1).unwrap());
    }

    #[test]
    fn value_helpers() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::from("  \t").is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
        assert_eq!(CellValue::from("0012").as_integer(), Some(12));
        assert_eq!(CellValue::Number(1.0).as_integer(), Some(1));
        assert_eq!(CellValue::Number(1.5).as_integer(), None);
        assert_eq!(CellValue::from("1.5").as_integer(), None);
        assert_eq!(CellValue::from(" 1,250.5 ").to_number(), Some(1250.5));
        assert_eq!(CellValue::from("  PO-1 ").trimmed(), CellValue::from("PO-1"));
        assert_eq!(CellValue::Number(5.0).to_string(), "5");
        assert_eq!(CellValue::Number(2.25).to_string(), "2.25");
    }

    #[test]
    fn json_shape() {
        let values = vec![CellValue::Empty, CellValue::Number(3.0), CellValue::from("x"), CellValue::Bool(true)];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,3.0,"x",true]"#);
        let back: Vec<CellValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
