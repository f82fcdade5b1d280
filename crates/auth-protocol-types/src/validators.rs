//! Local input validators.
//!
//! Cheap shape checks run before any network call so obviously malformed
//! input never costs a round trip. These deliberately stay loose — the
//! backend owns the real rules; we only reject what can never be valid.

/// Minimal email shape: something before and after one `@`, and a dot in
/// the domain part.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

/// The backend enforces the real password policy; locally we only reject
/// the trivially unusable.
pub fn is_valid_password(password: &str) -> bool {
    password.len() >= 3
}

/// Loose E.164 shape: optional leading `+`, then 8 to 15 digits.
pub fn is_valid_phone_number(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// MFA tickets are issued with an `mfaTotp:` prefix.
pub fn is_valid_mfa_ticket(ticket: &str) -> bool {
    ticket
        .strip_prefix("mfaTotp:")
        .is_some_and(|rest| !rest.is_empty())
}

/// One-time codes are exactly six ASCII digits.
pub fn is_valid_otp(otp: &str) -> bool {
    otp.len() == 6 && otp.chars().all(|c| c.is_ascii_digit())
}
