/// Normalise a raw phone number into E.164 (`+` followed by 8 to 15 digits).
///
/// Formatting characters (spaces, dots, dashes, parentheses) are dropped.
/// Numbers without a leading `+` are interpreted under `country_code`: a
/// ten-digit national number gets the code prepended, a number that already
/// starts with the code and has ten digits after it is accepted as is.
/// Anything else returns `None`; real validity is the gateway's call.
pub fn normalize_e164(raw: &str, country_code: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let international = raw.starts_with('+');
    let mut digits = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if i == 0 => {}
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    let e164 = if international {
        digits
    } else if digits.len() == 10 {
        format!("{country_code}{digits}")
    } else if digits.len() == 10 + country_code.len() && digits.starts_with(country_code) {
        digits
    } else {
        return None;
    };

    if !(8..=15).contains(&e164.len()) || e164.starts_with('0') {
        return None;
    }
    Some(format!("+{e164}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_international_numbers() {
        assert_eq!(
            normalize_e164("+15551234567", "1").as_deref(),
            Some("+15551234567")
        );
        assert_eq!(
            normalize_e164(" +44 20 7946 0958 ", "1").as_deref(),
            Some("+442079460958")
        );
    }

    #[test]
    fn applies_country_code_to_national_numbers() {
        assert_eq!(
            normalize_e164("(555) 123-4567", "1").as_deref(),
            Some("+15551234567")
        );
        assert_eq!(
            normalize_e164("1-555-123-4567", "1").as_deref(),
            Some("+15551234567")
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_e164("", "1"), None);
        assert_eq!(normalize_e164("   ", "1"), None);
        assert_eq!(normalize_e164("12345", "1"), None);
        assert_eq!(normalize_e164("555-CALL-NOW", "1"), None);
        assert_eq!(normalize_e164("+1234567890123456", "1"), None);
        assert_eq!(normalize_e164("1+5551234567", "1"), None);
    }
}
