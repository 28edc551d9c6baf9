use anyhow::{Result, anyhow};

/// Formatted numbers only; 15 digits plus separators fit comfortably.
pub const MAX_PHONE_NUMBER_LENGTH: usize = 32;

pub fn validate_email(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(anyhow!("Email address cannot be empty"));
    }

    if address.len() > 254 {
        return Err(anyhow!("Email address too long (maximum 254 characters)"));
    }

    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| anyhow!("Email address is missing '@'"))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(anyhow!("Email address '{}' is malformed", address));
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(anyhow!("Email domain '{}' is not a valid host name", domain));
    }

    if address.chars().any(char::is_whitespace) {
        return Err(anyhow!("Email address contains whitespace"));
    }

    Ok(())
}

pub fn validate_phone_number(number: &str) -> Result<()> {
    if number.trim().is_empty() {
        return Err(anyhow!("Phone number cannot be empty"));
    }

    if number.len() > MAX_PHONE_NUMBER_LENGTH {
        return Err(anyhow!(
            "Phone number too long (maximum {} characters)",
            MAX_PHONE_NUMBER_LENGTH
        ));
    }

    let digits = number.strip_prefix('+').unwrap_or(number);

    let valid_chars = digits
        .chars()
        .all(|c| c.is_ascii_digit() || c == ' ' || c == '-' || c == '(' || c == ')');

    if !valid_chars {
        return Err(anyhow!("Phone number contains invalid characters"));
    }

    let digit_count = digits.chars().filter(char::is_ascii_digit).count();

    if digit_count < 7 {
        return Err(anyhow!("Phone number too short (minimum 7 digits)"));
    }

    if digit_count > 15 {
        return Err(anyhow!("Phone number too long (maximum 15 digits)"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        assert!(validate_email("ann@example.com").is_ok());
        assert!(validate_email("a.b+tag@mail.example.org").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "   ", "ann", "@example.com", "ann@", "ann@localhost", "a@b@c.com", "a b@c.com"] {
            assert!(validate_email(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn phone_numbers() {
        assert!(validate_phone_number("+11234567890").is_ok());
        assert!(validate_phone_number("+7 (912) 345-67-89").is_ok());
        assert!(validate_phone_number("").is_err());
        assert!(validate_phone_number("12345").is_err());
        assert!(validate_phone_number("+1234567890123456").is_err());
        assert!(validate_phone_number("call me").is_err());
    }

    #[test]
    fn padded_phone_numbers_are_bounded() {
        let padded = format!("+1{}5551234567", " ".repeat(600));
        assert!(validate_phone_number(&padded).is_err());
        assert!(validate_email(&format!("{}@example.com", "a".repeat(600))).is_err());
    }
}
