// 🔢 CNPJ - Brazilian entity tax identifier
// Normalization (14 digits, zero padded) + check-digit validation

/// Length of a normalized identifier
pub const CNPJ_LENGTH: usize = 14;

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Strip every non-digit and left-pad with zeros to 14 characters.
///
/// Inputs with more than 14 digits are passed through untouched (no
/// truncation); they fail `validate` later on.
///
/// # Examples:
/// ```
/// use ans_expenses::cnpj::normalize_identifier;
/// assert_eq!(normalize_identifier("12.345.678/0001-95"), "12345678000195");
/// assert_eq!(normalize_identifier("345678000195"), "00345678000195");
/// ```
pub fn normalize_identifier(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{:0>width$}", digits, width = CNPJ_LENGTH)
}

/// Whether a normalized identifier is longer than a CNPJ can be
pub fn is_oversized(normalized: &str) -> bool {
    normalized.len() > CNPJ_LENGTH
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let rest = sum % 11;
    if rest < 2 {
        0
    } else {
        11 - rest
    }
}

/// Validate a CNPJ of arbitrary formatting.
///
/// Rejects anything that is not exactly 14 digits once cleaned, sequences of
/// one repeated digit, and identifiers whose last two digits do not match the
/// two mod-11 check digits.
pub fn validate(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != CNPJ_LENGTH {
        return false;
    }

    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let first = check_digit(&digits[..12], &FIRST_WEIGHTS);
    let second = check_digit(&digits[..13], &SECOND_WEIGHTS);

    digits[12] == first && digits[13] == second
}

/// Append the two check digits to a 12-digit base.
///
/// Returns None if `base` does not hold exactly 12 digits.
pub fn with_check_digits(base: &str) -> Option<String> {
    let mut digits: Vec<u32> = base.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 12 {
        return None;
    }

    let first = check_digit(&digits, &FIRST_WEIGHTS);
    digits.push(first);
    let second = check_digit(&digits, &SECOND_WEIGHTS);
    digits.push(second);

    Some(digits.iter().map(|d| char::from_digit(*d, 10).unwrap_or('0')).collect())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_formatted() {
        assert!(validate("12.345.678/0001-95"));
    }

    #[test]
    fn test_validate_digits_only() {
        assert!(validate("12345678000195"));
        assert!(validate("11222333000181"));
    }

    #[test]
    fn test_validate_repeated_digits() {
        for d in 0..=9 {
            let repeated = d.to_string().repeat(14);
            assert!(!validate(&repeated), "{} should be rejected", repeated);
        }
    }

    #[test]
    fn test_validate_wrong_length() {
        assert!(!validate("123456"));
        assert!(!validate(""));
        assert!(!validate("123456780001950"));
    }

    #[test]
    fn test_validate_wrong_check_digits() {
        assert!(!validate("12345678000194"));
        assert!(!validate("12345678000185"));
    }

    #[test]
    fn test_validate_matches_computed_check_digits() {
        // Every base gets exactly one valid pair of trailing digits
        for base in ["123456780001", "000000010001", "987654320001", "112223330001"] {
            let valid = with_check_digits(base).unwrap();
            assert!(validate(&valid));

            for tail in 0..100 {
                let candidate = format!("{}{:02}", base, tail);
                assert_eq!(validate(&candidate), candidate == valid);
            }
        }
    }

    #[test]
    fn test_with_check_digits() {
        assert_eq!(with_check_digits("123456780001").as_deref(), Some("12345678000195"));
        assert_eq!(with_check_digits("112223330001").as_deref(), Some("11222333000181"));
        assert_eq!(with_check_digits("1234"), None);
    }

    #[test]
    fn test_normalize_pads_and_strips() {
        assert_eq!(normalize_identifier("12.345.678/0001-95"), "12345678000195");
        assert_eq!(normalize_identifier("345678000195"), "00345678000195");
        assert_eq!(normalize_identifier(""), "00000000000000");
        assert_eq!(normalize_identifier("nan"), "00000000000000");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["12.345.678/0001-95", "42", "", "abc", "12345678000195", "1234567800019512"] {
            let once = normalize_identifier(raw);
            assert_eq!(normalize_identifier(&once), once);
        }
    }

    #[test]
    fn test_normalize_keeps_oversized() {
        let normalized = normalize_identifier("1234567800019512");
        assert_eq!(normalized, "1234567800019512");
        assert!(is_oversized(&normalized));
        assert!(!validate(&normalized));
    }
}
