// Column-to-value conversion.
//
// `FromColumn` is the seam user types plug into: parse from an
// unescaped byte slice plus format/culture hints. The built-in impls
// cover the primitive closed set; the format hint drives the temporal
// parsers, the culture tag is carried opaquely for user converters.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::field::trim_slice;
use crate::error::{parse_error, Error, Result};
use crate::options::Trim;

/// Conversion context handed to every converter invocation.
#[derive(Debug, Clone, Copy)]
pub struct ConvertCtx<'a> {
    /// Format hint (binding-level wins over reader-level).
    pub format: Option<&'a str>,
    /// Opaque culture tag; built-in converters carry it through, user
    /// converters interpret it.
    pub culture: Option<&'a str>,
    /// Tokens accepted as boolean true.
    pub true_tokens: &'a [String],
    /// Tokens accepted as boolean false.
    pub false_tokens: &'a [String],
}

impl Default for ConvertCtx<'static> {
    fn default() -> Self {
        static TRUE_TOKENS: &[String] = &[];
        static FALSE_TOKENS: &[String] = &[];
        ConvertCtx {
            format: None,
            culture: None,
            true_tokens: TRUE_TOKENS,
            false_tokens: FALSE_TOKENS,
        }
    }
}

/// Types parseable from a column slice.
pub trait FromColumn: Sized {
    /// Target name used in error messages.
    const TYPE_NAME: &'static str;

    /// Parse from unescaped field bytes.
    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self>;
}

/// UTF-8 view with surrounding ASCII whitespace removed; the common
/// prelude of every built-in converter.
fn utf8_trimmed<'a>(bytes: &'a [u8], target: &'static str) -> Result<&'a str> {
    std::str::from_utf8(trim_slice(bytes, Trim::Both))
        .map_err(|e| parse_error(bytes, target, e.to_string()))
}

macro_rules! from_column_number {
    ($($ty:ty => $name:literal),+ $(,)?) => {
        $(
            impl FromColumn for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_column(bytes: &[u8], _ctx: &ConvertCtx<'_>) -> Result<Self> {
                    let s = utf8_trimmed(bytes, $name)?;
                    s.parse::<$ty>()
                        .map_err(|e| parse_error(bytes, $name, e.to_string()))
                }
            }
        )+
    };
}

from_column_number! {
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
}

impl FromColumn for Decimal {
    const TYPE_NAME: &'static str = "decimal";

    fn from_column(bytes: &[u8], _ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        s.parse::<Decimal>()
            .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl FromColumn for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        if ctx.true_tokens.iter().any(|t| t.eq_ignore_ascii_case(s)) {
            return Ok(true);
        }
        if ctx.false_tokens.iter().any(|t| t.eq_ignore_ascii_case(s)) {
            return Ok(false);
        }
        // Bare fallback when no token sets are configured.
        match s {
            "true" | "True" | "TRUE" | "1" => Ok(true),
            "false" | "False" | "FALSE" | "0" => Ok(false),
            _ => Err(parse_error(bytes, Self::TYPE_NAME, "not a recognized boolean token")),
        }
    }
}

impl FromColumn for String {
    const TYPE_NAME: &'static str = "string";

    fn from_column(bytes: &[u8], _ctx: &ConvertCtx<'_>) -> Result<Self> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl FromColumn for NaiveDate {
    const TYPE_NAME: &'static str = "date";

    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        let fmt = ctx.format.unwrap_or("%Y-%m-%d");
        NaiveDate::parse_from_str(s, fmt)
            .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl FromColumn for NaiveTime {
    const TYPE_NAME: &'static str = "time";

    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        let fmt = ctx.format.unwrap_or("%H:%M:%S%.f");
        NaiveTime::parse_from_str(s, fmt)
            .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl FromColumn for NaiveDateTime {
    const TYPE_NAME: &'static str = "datetime";

    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        if let Some(fmt) = ctx.format {
            return NaiveDateTime::parse_from_str(s, fmt)
                .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()));
        }
        // ISO 8601 with either the T separator or a space.
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
            .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl FromColumn for DateTime<FixedOffset> {
    const TYPE_NAME: &'static str = "datetime-offset";

    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        if let Some(fmt) = ctx.format {
            return DateTime::parse_from_str(s, fmt)
                .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()));
        }
        DateTime::parse_from_rfc3339(s)
            .map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl FromColumn for Uuid {
    const TYPE_NAME: &'static str = "uuid";

    fn from_column(bytes: &[u8], _ctx: &ConvertCtx<'_>) -> Result<Self> {
        let s = utf8_trimmed(bytes, Self::TYPE_NAME)?;
        Uuid::parse_str(s).map_err(|e| parse_error(bytes, Self::TYPE_NAME, e.to_string()))
    }
}

impl<T: FromColumn> FromColumn for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    /// Empty content parses to `None`; null-token handling is the
    /// binder's job and happens before conversion.
    fn from_column(bytes: &[u8], ctx: &ConvertCtx<'_>) -> Result<Self> {
        if trim_slice(bytes, Trim::Both).is_empty() {
            Ok(None)
        } else {
            T::from_column(bytes, ctx).map(Some)
        }
    }
}

/// Enumeration parsing: by variant name (ASCII case-insensitive when
/// `ci`), falling back to the declared ordinal (slice position) when
/// the content is a decimal integer. Names win over ordinals.
pub fn parse_enum<T: Clone>(
    bytes: &[u8],
    variants: &[(&str, T)],
    ci: bool,
) -> std::result::Result<T, Error> {
    let s = utf8_trimmed(bytes, "enum")?;
    for (name, value) in variants {
        let hit = if ci {
            name.eq_ignore_ascii_case(s)
        } else {
            *name == s
        };
        if hit {
            return Ok(value.clone());
        }
    }
    if let Ok(ordinal) = s.parse::<usize>() {
        if let Some((_, value)) = variants.get(ordinal) {
            return Ok(value.clone());
        }
    }
    Err(parse_error(bytes, "enum", "no matching variant name or ordinal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConvertCtx<'static> {
        ConvertCtx::default()
    }

    #[test]
    fn test_integers() {
        assert_eq!(i32::from_column(b"42", &ctx()).unwrap(), 42);
        assert_eq!(i64::from_column(b"-7", &ctx()).unwrap(), -7);
        assert_eq!(u8::from_column(b" 255 ", &ctx()).unwrap(), 255);
        assert!(u8::from_column(b"256", &ctx()).is_err());
        assert!(i32::from_column(b"4x2", &ctx()).is_err());
        assert!(i32::from_column(b"", &ctx()).is_err());
    }

    #[test]
    fn test_floats_and_decimal() {
        assert_eq!(f64::from_column(b"3.5", &ctx()).unwrap(), 3.5);
        assert_eq!(f32::from_column(b"-0.25", &ctx()).unwrap(), -0.25);
        assert_eq!(
            Decimal::from_column(b"12.340", &ctx()).unwrap(),
            "12.340".parse::<Decimal>().unwrap()
        );
        assert!(Decimal::from_column(b"twelve", &ctx()).is_err());
    }

    #[test]
    fn test_bool_tokens() {
        let true_tokens = vec!["yes".to_string(), "on".to_string()];
        let false_tokens = vec!["no".to_string(), "off".to_string()];
        let ctx = ConvertCtx {
            true_tokens: &true_tokens,
            false_tokens: &false_tokens,
            ..ConvertCtx::default()
        };
        assert!(bool::from_column(b"YES", &ctx).unwrap());
        assert!(!bool::from_column(b"off", &ctx).unwrap());
        // Bare fallback still accepts canonical spellings.
        assert!(bool::from_column(b"true", &ctx).unwrap());
        assert!(bool::from_column(b"maybe", &ctx).is_err());
    }

    #[test]
    fn test_temporal_defaults() {
        let d = NaiveDate::from_column(b"2024-02-29", &ctx()).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let t = NaiveTime::from_column(b"23:59:01.250", &ctx()).unwrap();
        assert_eq!(
            t,
            NaiveTime::from_hms_milli_opt(23, 59, 1, 250).unwrap()
        );

        let dt = NaiveDateTime::from_column(b"2024-01-02T03:04:05", &ctx()).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        // Space separator accepted too.
        assert!(NaiveDateTime::from_column(b"2024-01-02 03:04:05", &ctx()).is_ok());

        let dto = DateTime::<FixedOffset>::from_column(b"2024-01-02T03:04:05+02:00", &ctx())
            .unwrap();
        assert_eq!(dto.offset().local_minus_utc(), 7200);
    }

    #[test]
    fn test_temporal_custom_format() {
        let ctx = ConvertCtx {
            format: Some("%d/%m/%Y"),
            ..ConvertCtx::default()
        };
        let d = NaiveDate::from_column(b"29/02/2024", &ctx).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert!(NaiveDate::from_column(b"2024-02-29", &ctx).is_err());
    }

    #[test]
    fn test_uuid() {
        let u = Uuid::from_column(b"67e55044-10b1-426f-9247-bb680e5fe0c8", &ctx()).unwrap();
        assert_eq!(u.get_version_num(), 4);
        assert!(Uuid::from_column(b"not-a-uuid", &ctx()).is_err());
    }

    #[test]
    fn test_option() {
        assert_eq!(Option::<i32>::from_column(b"", &ctx()).unwrap(), None);
        assert_eq!(Option::<i32>::from_column(b"  ", &ctx()).unwrap(), None);
        assert_eq!(Option::<i32>::from_column(b"5", &ctx()).unwrap(), Some(5));
        assert!(Option::<i32>::from_column(b"x", &ctx()).is_err());
    }

    #[test]
    fn test_parse_enum() {
        #[derive(Debug, Clone, PartialEq)]
        enum Color {
            Red,
            Green,
            Blue,
        }
        let variants = [
            ("red", Color::Red),
            ("green", Color::Green),
            ("blue", Color::Blue),
        ];
        assert_eq!(parse_enum(b"green", &variants, false).unwrap(), Color::Green);
        assert_eq!(parse_enum(b"BLUE", &variants, true).unwrap(), Color::Blue);
        assert!(parse_enum(b"BLUE", &variants, false).is_err());
        // Ordinal fallback.
        assert_eq!(parse_enum(b"0", &variants, false).unwrap(), Color::Red);
        assert!(parse_enum(b"9", &variants, false).is_err());
    }

    #[test]
    fn test_error_preview_is_bounded() {
        let long = vec![b'9'; 1000];
        let err = i8::from_column(&long, &ctx()).unwrap_err();
        assert!(err.to_string().len() < 200, "payload must be truncated");
    }
}
