// ---------------------------------------------------------------------------
// Engineering-notation numbers ("1.2n", "3Meg", "-4.7e-3u")
// ---------------------------------------------------------------------------

/// SPICE unit suffixes and their scale factors.  Matched exactly, so `"meg"`
/// never collides with `"m"`.
const UNIT_SCALE: &[(&str, f64)] = &[
    ("a", 1e-18),
    ("f", 1e-15),
    ("p", 1e-12),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("Meg", 1e6),
    ("meg", 1e6),
    ("G", 1e9),
    ("T", 1e12),
];

/// Scale factor for an engineering suffix, if it is one we know.
pub fn unit_scale(suffix: &str) -> Option<f64> {
    UNIT_SCALE
        .iter()
        .find(|(name, _)| *name == suffix)
        .map(|(_, scale)| *scale)
}

/// Decode a numeric literal with an optional unit suffix.
///
/// The longest leading float literal is parsed; whatever follows it is looked
/// up as a unit suffix.  Unknown suffixes are ignored and input without any
/// numeric prefix decodes to `0.0`.  Never fails: this runs over every cell of
/// every table.
pub fn parse_value(s: &str) -> f64 {
    let s = s.trim();
    let end = numeric_prefix_len(s);
    if end == 0 {
        return 0.0;
    }

    let Ok(value) = s[..end].parse::<f64>() else {
        return 0.0;
    };

    match unit_scale(&s[end..]) {
        Some(scale) => value * scale,
        None => value,
    }
}

/// Byte length of the longest prefix matching
/// `[+-]? (digits ('.' digits*)? | '.' digits) ([eE] [+-]? digits)?`.
/// Returns 0 when there is no such prefix.
fn numeric_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }

    let int_start = i;
    i += count_digits(&bytes[i..]);
    let int_digits = i - int_start;

    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        frac_digits = count_digits(&bytes[i + 1..]);
        // "12." is a literal, a lone "." is not
        if int_digits > 0 || frac_digits > 0 {
            i += 1 + frac_digits;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return 0;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_digits = count_digits(&bytes[j..]);
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }

    i
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}
