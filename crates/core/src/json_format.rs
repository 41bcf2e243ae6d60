//! Outbound JSON number format.
//!
//! The ComfyUI node-input schema is type sensitive. A float that is
//! mathematically integral must go out as `1`, not `1.0`, and other floats
//! must use the shortest decimal that round-trips, with no exponent.
//! [`PlainDecimalFormatter`] plugs that rule into `serde_json`.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

/// Compact JSON formatter that writes floats as plain decimals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecimalFormatter;

impl Formatter for PlainDecimalFormatter {
    fn write_f32<W>(&mut self, writer: &mut W, value: f32) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if value == 0.0 {
            return writer.write_all(b"0");
        }
        write!(writer, "{value}")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(plain_decimal(value).as_bytes())
    }
}

/// Render a finite float as a plain decimal string.
///
/// `Display` for `f64` already yields the shortest round-trip digits and
/// never uses an exponent; integral values print without a fraction.
/// Negative zero is folded into `0`.
pub fn plain_decimal(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

/// Serialize `value` to compact JSON bytes using [`PlainDecimalFormatter`].
pub fn to_vec<T>(value: &T) -> serde_json::Result<Vec<u8>>
where
    T: ?Sized + Serialize,
{
    let mut buf = Vec::with_capacity(256);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PlainDecimalFormatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Serialize `value` to a compact JSON string using [`PlainDecimalFormatter`].
pub fn to_string<T>(value: &T) -> serde_json::Result<String>
where
    T: ?Sized + Serialize,
{
    let bytes = to_vec(value)?;
    // The serializer only ever emits UTF-8.
    String::from_utf8(bytes).map_err(|e| serde::ser::Error::custom(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integral_float_has_no_fraction() {
        assert_eq!(to_string(&1.0_f64).unwrap(), "1");
        assert_eq!(to_string(&-3.0_f64).unwrap(), "-3");
        assert_eq!(to_string(&json!(20.0)).unwrap(), "20");
    }

    #[test]
    fn non_integral_float_uses_shortest_decimal() {
        assert_eq!(to_string(&0.1_f64).unwrap(), "0.1");
        assert_eq!(to_string(&7.5_f64).unwrap(), "7.5");
        assert_eq!(to_string(&(0.1_f64 + 0.2_f64)).unwrap(), "0.30000000000000004");
    }

    #[test]
    fn no_scientific_notation() {
        assert_eq!(to_string(&1e-7_f64).unwrap(), "0.0000001");
        assert_eq!(to_string(&1e21_f64).unwrap(), "1000000000000000000000");
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(to_string(&-0.0_f64).unwrap(), "0");
    }

    #[test]
    fn f32_uses_its_own_shortest_form() {
        assert_eq!(to_string(&0.1_f32).unwrap(), "0.1");
        assert_eq!(to_string(&2.0_f32).unwrap(), "2");
    }

    #[test]
    fn non_finite_is_null() {
        assert_eq!(to_string(&f64::NAN).unwrap(), "null");
        assert_eq!(to_string(&f64::INFINITY).unwrap(), "null");
    }

    #[test]
    fn integers_and_other_values_untouched() {
        let body = json!({
            "prompt": { "3": { "inputs": { "seed": 42, "cfg": 8.0, "denoise": 0.75, "name": "x" } } },
            "client_id": "abc"
        });
        assert_eq!(
            to_string(&body).unwrap(),
            r#"{"prompt":{"3":{"inputs":{"seed":42,"cfg":8,"denoise":0.75,"name":"x"}}},"client_id":"abc"}"#
        );
    }
}
