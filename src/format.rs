//! Text renderings used for resource payloads and shell output.

use std::fmt::Write;

const HEX_DUMP_WIDTH: usize = 16;

/// Formats an unsigned 16-bit value as decimal text.
pub fn decimal_u16(value: u16) -> String {
    value.to_string()
}

/// Formats an unsigned 32-bit value as decimal text.
pub fn decimal_u32(value: u32) -> String {
    value.to_string()
}

/// Formats `value` as a decimal fixed point number with `digits` digits
/// after the decimal point, e.g. `fixed_point(2345, 2) == "23.45"`.
pub fn fixed_point(value: i32, digits: u8) -> String {
    let magnitude = value.unsigned_abs();
    let sign = if value < 0 { "-" } else { "" };
    if digits == 0 {
        return format!("{}{}", sign, magnitude);
    }

    let scale = 10u64.pow(digits as u32);
    let magnitude = magnitude as u64;
    format!(
        "{}{}.{:0width$}",
        sign,
        magnitude / scale,
        magnitude % scale,
        width = digits as usize
    )
}

/// Renders `bytes` as an offset-prefixed hex dump, sixteen bytes per line.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(HEX_DUMP_WIDTH).enumerate() {
        let _ = write!(out, "{:08x}", line * HEX_DUMP_WIDTH);
        for byte in chunk {
            let _ = write!(out, "  {:02X}", byte);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn test_fixed_point() {
        assert_eq!(fixed_point(2345, 2), "23.45");
        assert_eq!(fixed_point(-5, 2), "-0.05");
        assert_eq!(fixed_point(-2345, 2), "-23.45");
        assert_eq!(fixed_point(100, 2), "1.00");
        assert_eq!(fixed_point(7, 0), "7");
        assert_eq!(fixed_point(i32::MIN, 3), "-2147483.648");
    }

    #[test]
    fn test_decimal() {
        assert_eq!(decimal_u16(0), "0");
        assert_eq!(decimal_u16(u16::MAX), "65535");
        assert_eq!(decimal_u32(101325), "101325");
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[]), "");
        assert_eq!(hex_dump(&[0x01, 0xab]), "00000000  01  AB\n");

        let bytes: Vec<u8> = (0..18).collect();
        let dump = hex_dump(&bytes);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("  0E  0F"));
        assert_eq!(lines[1], "00000010  10  11");
    }

    quickcheck! {
        fn prop_fixed_point_parses_back(value: i32) -> bool {
            let text = fixed_point(value, 2);
            let parsed: f64 = text.parse().unwrap();
            (parsed * 100.0).round() as i64 == value as i64
        }

        fn prop_fixed_point_has_digits(value: i16, digits: u8) -> bool {
            let digits = digits % 6;
            let text = fixed_point(value as i32, digits);
            match text.split_once('.') {
                Some((_, fraction)) => fraction.len() == digits as usize,
                None => digits == 0,
            }
        }
    }
}
