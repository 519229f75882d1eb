//! Phone number normalization.
//!
//! Normalization strips visual separators and keeps the characters that are meaningful for dialing. Minimization
//! reduces a number further to the trailing digits used for matching numbers written in different formats, e.g.
//! with and without a country code.

const SEPARATORS: &[char] = &[' ', '-', '.', '(', ')', '/', '\t'];

fn is_dial_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#')
}

// 'p' and 'w' introduce a DTMF suffix (pause and wait).
fn is_dtmf_control(c: char) -> bool {
    matches!(c, 'p' | 'w' | 'P' | 'W' | ',' | ';')
}

/// Returns the number with separators removed. A leading `+` is preserved.
///
/// With `validate` set, any unexpected character makes the whole number invalid and an empty string is returned;
/// otherwise unexpected characters are dropped.
pub fn normalize_phone_number(input: &str, validate: bool) -> String {
    let input = input.trim();
    let mut normalized = String::with_capacity(input.len());

    for (pos, c) in input.chars().enumerate() {
        if c == '+' && pos == 0 {
            normalized.push(c);
        }
        else if is_dial_char(c) {
            normalized.push(c);
        }
        else if is_dtmf_control(c) {
            normalized.push(c.to_ascii_lowercase());
        }
        else if SEPARATORS.contains(&c) {
            continue;
        }
        else if validate {
            return String::new();
        }
    }

    // A number must carry at least one digit before any DTMF suffix.
    let has_digits = normalized
        .chars()
        .take_while(|c| !is_dtmf_control(*c))
        .any(|c| c.is_ascii_digit());
    if !has_digits {
        return String::new();
    }

    normalized
}

/// Returns at most `max_digits` trailing digits of the number, ignoring the DTMF suffix.
pub fn minimize_phone_number(input: &str, max_digits: usize, validate: bool) -> String {
    let normalized = normalize_phone_number(input, validate);
    let digits: Vec<char> = normalized
        .chars()
        .take_while(|c| !is_dtmf_control(*c))
        .filter(char::is_ascii_digit)
        .collect();
    let skip = digits.len().saturating_sub(max_digits);
    digits[skip..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_separators() {
        assert_eq!(normalize_phone_number("+1 (555) 010-0", false), "+15550100");
        assert_eq!(normalize_phone_number("555.0100", false), "5550100");
        assert_eq!(normalize_phone_number("*31#5550100", false), "*31#5550100");
    }

    #[test]
    fn validation_rejects_garbage() {
        assert_eq!(normalize_phone_number("555-CALL-ME", true), "");
        assert_eq!(normalize_phone_number("555-CALL-ME", false), "555");
        assert_eq!(normalize_phone_number("---", false), "");
    }

    #[test]
    fn dtmf_suffix_kept_by_normalize_dropped_by_minimize() {
        assert_eq!(normalize_phone_number("5550100p123", false), "5550100p123");
        assert_eq!(minimize_phone_number("5550100p123", 7, false), "5550100");
    }

    #[test]
    fn minimization_keeps_trailing_digits() {
        assert_eq!(minimize_phone_number("+1-555-0100", 7, false), "5550100");
        assert_eq!(minimize_phone_number("0100", 7, false), "0100");
        assert_eq!(minimize_phone_number("+44 20 7946 0958", 7, false), "9460958");
    }
}
