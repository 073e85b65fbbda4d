//! Wire format of a scale frame.
//!
//! Every weight is transmitted as a fixed 18-byte ASCII frame:
//! ```text
//! ┌────────┬──────────┬──────────────┬────────────┐
//! │ Marker │ Header   │ Weight field │ Terminator │
//! │ "ST"   │ 6 bytes  │ 6 bytes      │ "kg\r\n"   │
//! │ 0..2   │ 2..8     │ 8..14        │ 14..18     │
//! └────────┴──────────┴──────────────┴────────────┘
//! ```
//!
//! The header is device specific and ignored. The weight field is an ASCII
//! decimal number padded with whitespace.

/// Total frame size in bytes (fixed, exactly 18).
pub const FRAME_SIZE: usize = 18;

/// Start marker opening every frame.
pub const START_MARKER: &[u8; 2] = b"ST";

/// Terminator closing every frame.
pub const TERMINATOR: &[u8; 4] = b"kg\r\n";

/// Offset of the device header.
pub const HEADER_OFFSET: usize = 2;

/// Length of the device header.
pub const HEADER_LEN: usize = 6;

/// Offset of the weight field.
pub const VALUE_OFFSET: usize = 8;

/// Length of the weight field.
pub const VALUE_LEN: usize = 6;

/// Offset of the terminator.
pub const TERMINATOR_OFFSET: usize = FRAME_SIZE - TERMINATOR.len();

/// Factor converting device kilograms into the local mass unit.
pub const UNIT_FACTOR: f64 = 2.0;

/// Result of classifying one 18-byte candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Well-formed frame; scaled weight in tenths of the local unit.
    Reading(i64),
    /// Terminator matched but the weight field is not a number.
    Malformed,
    /// Terminator did not match; the window is line noise.
    BadTerminator,
}

/// Classify a candidate window that starts with the start marker.
///
/// The marker itself is not re-checked; callers locate it first.
pub fn classify_frame(frame: &[u8; FRAME_SIZE]) -> FrameOutcome {
    if &frame[TERMINATOR_OFFSET..] != TERMINATOR {
        return FrameOutcome::BadTerminator;
    }

    match parse_weight_field(&frame[VALUE_OFFSET..VALUE_OFFSET + VALUE_LEN]) {
        Some(tenths) => FrameOutcome::Reading(tenths),
        None => FrameOutcome::Malformed,
    }
}

/// Parse a raw weight field into tenths of the local mass unit.
///
/// The field is trimmed of ASCII whitespace and parsed as a decimal number.
/// The value is multiplied by [`UNIT_FACTOR`] and rounded to one decimal.
pub fn parse_weight_field(field: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(field).ok()?.trim();
    if text.is_empty() || !is_decimal(text) {
        return None;
    }

    let kilograms: f64 = text.parse().ok()?;
    Some((kilograms * UNIT_FACTOR * 10.0).round() as i64)
}

/// Plain decimal: optional sign, digits, at most one dot, at least one digit.
///
/// `str::parse::<f64>` alone would also accept `inf`, `NaN` and exponents.
fn is_decimal(text: &str) -> bool {
    let digits = text.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(text);
    let mut seen_digit = false;
    let mut seen_dot = false;

    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }

    seen_digit
}

/// Build an 18-byte frame.
///
/// `header` and `value` are right-truncated or space-padded to their field
/// widths; `value` is right-aligned the way the scale pads it.
pub fn encode_frame(header: &[u8], value: &str) -> [u8; FRAME_SIZE] {
    let mut frame = [b' '; FRAME_SIZE];
    frame[..2].copy_from_slice(START_MARKER);

    let header_len = header.len().min(HEADER_LEN);
    frame[HEADER_OFFSET..HEADER_OFFSET + header_len].copy_from_slice(&header[..header_len]);

    let value = value.as_bytes();
    let value_len = value.len().min(VALUE_LEN);
    let start = VALUE_OFFSET + VALUE_LEN - value_len;
    frame[start..VALUE_OFFSET + VALUE_LEN].copy_from_slice(&value[..value_len]);

    frame[TERMINATOR_OFFSET..].copy_from_slice(TERMINATOR);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> [u8; FRAME_SIZE] {
        bytes.try_into().unwrap()
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(START_MARKER.len() + HEADER_LEN + VALUE_LEN + TERMINATOR.len(), FRAME_SIZE);
        assert_eq!(TERMINATOR_OFFSET, 14);
        assert_eq!(VALUE_OFFSET + VALUE_LEN, TERMINATOR_OFFSET);
    }

    #[test]
    fn test_classify_valid_frame() {
        assert_eq!(
            classify_frame(&frame(b"STGS,NT,006.20kg\r\n")),
            FrameOutcome::Reading(124)
        );
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        assert_eq!(parse_weight_field(b" 6.2  "), Some(124));
        assert_eq!(parse_weight_field(b"  3.10"), Some(62));
    }

    #[test]
    fn test_rounding_to_one_decimal() {
        // 1.23 * 2 = 2.46 -> 2.5
        assert_eq!(parse_weight_field(b"  1.23"), Some(25));
        // 1.22 * 2 = 2.44 -> 2.4
        assert_eq!(parse_weight_field(b"  1.22"), Some(24));
    }

    #[test]
    fn test_signed_values() {
        assert_eq!(parse_weight_field(b"-0.50 "), Some(-10));
        assert_eq!(parse_weight_field(b"+01.00"), Some(20));
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert_eq!(parse_weight_field(b"XXXXXX"), None);
        assert_eq!(parse_weight_field(b"      "), None);
        assert_eq!(parse_weight_field(b"  inf "), None);
        assert_eq!(parse_weight_field(b" 1e3  "), None);
        assert_eq!(parse_weight_field(b" 1.2.3"), None);
        assert_eq!(parse_weight_field(b"   .  "), None);
        assert_eq!(parse_weight_field(&[0xFF, 0xFE, b'1', b'2', b'3', b'4']), None);
    }

    #[test]
    fn test_classify_malformed() {
        assert_eq!(
            classify_frame(&frame(b"ST______XXXXXXkg\r\n")),
            FrameOutcome::Malformed
        );
    }

    #[test]
    fn test_classify_bad_terminator() {
        assert_eq!(
            classify_frame(&frame(b"ST______006.20lb\r\n")),
            FrameOutcome::BadTerminator
        );
        assert_eq!(
            classify_frame(&frame(b"ST______006.20kg\n\r")),
            FrameOutcome::BadTerminator
        );
    }

    #[test]
    fn test_encode_frame() {
        let encoded = encode_frame(b"______", "6.20");
        assert_eq!(&encoded, b"ST______  6.20kg\r\n");
        assert_eq!(classify_frame(&encoded), FrameOutcome::Reading(124));
    }

    #[test]
    fn test_encode_frame_pads_short_header() {
        let encoded = encode_frame(b"GS", "12.5");
        assert_eq!(&encoded, b"STGS      12.5kg\r\n");
    }
}
