/// Phone-number handling for WhatsApp JIDs.
///
/// Senders arrive as `5511999999999@c.us` (individual) or
/// `5511999999999-1234567890@g.us` (group). Stored numbers are digits only.

pub fn is_group_jid(sender: &str) -> bool {
    sender.contains("@g.us")
}

/// Strips the JID suffix and keeps only digits.
pub fn normalize_phone(raw: &str) -> String {
    let bare = raw.split('@').next().unwrap_or(raw);
    bare.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Digits-only number formatted for the bridge `/send` endpoint.
/// Numbers without a country code get the BR prefix, matching how the
/// bridge resolves short local numbers.
pub fn to_send_jid(raw: &str) -> String {
    if raw.ends_with("@c.us") || raw.contains("@g.us") {
        return raw.to_string();
    }
    let digits = normalize_phone(raw);
    if digits.starts_with("55") {
        digits
    } else {
        format!("55{}", digits)
    }
}

/// True when the message body looks like a redeem token: 8 alphanumeric
/// characters with at least one digit. The digit requirement keeps ordinary
/// 8-letter words ("obrigado") out of the redeem path.
pub fn looks_like_redeem_code(text: &str) -> bool {
    let t = text.trim();
    t.len() == 8
        && t.chars().all(|c| c.is_ascii_alphanumeric())
        && t.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_jid_and_formatting() {
        assert_eq!(normalize_phone("5511999999999@c.us"), "5511999999999");
        assert_eq!(normalize_phone("+55 (11) 99999-9999"), "5511999999999");
        assert_eq!(normalize_phone("5511999999999-1234@g.us"), "5511999999999");
    }

    #[test]
    fn send_jid_adds_country_prefix() {
        assert_eq!(to_send_jid("11999999999"), "5511999999999");
        assert_eq!(to_send_jid("5511999999999"), "5511999999999");
        assert_eq!(to_send_jid("5511999999999@c.us"), "5511999999999@c.us");
    }

    #[test]
    fn redeem_code_shape() {
        assert!(looks_like_redeem_code("AB12CD34"));
        assert!(looks_like_redeem_code(" ab12cd34 "));
        assert!(!looks_like_redeem_code("AB12CD3"));
        assert!(!looks_like_redeem_code("AB12 D34"));
        assert!(!looks_like_redeem_code("comprar"));
        assert!(!looks_like_redeem_code("obrigado"));
    }

    #[test]
    fn group_jid_detection() {
        assert!(is_group_jid("5511999999999-1234@g.us"));
        assert!(!is_group_jid("5511999999999@c.us"));
    }
}
