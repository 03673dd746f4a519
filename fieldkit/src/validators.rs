use email_address::EmailAddress;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;
use uuid::Uuid;

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{6,15}$").expect("phone pattern compiles"));

static ENTITY_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("reference pattern compiles"));

static HEX_COLOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("color pattern compiles")
});

/// Basic CSS color keywords accepted by color fields.
pub const NAMED_COLORS: &[&str] = &[
    "black", "silver", "gray", "white", "maroon", "red", "purple", "fuchsia", "green", "lime", "olive", "yellow", "navy",
    "blue", "teal", "aqua", "orange", "pink", "brown", "cyan", "magenta", "indigo", "violet", "gold",
];

/// Returns `true` if the provided string is a syntactically valid email address.
pub fn is_valid_email(value: &str) -> bool {
    EmailAddress::is_valid(value)
}

/// Returns `true` if the provided string parses as a URL with a scheme.
pub fn is_valid_url(value: &str) -> bool {
    Url::parse(value).is_ok()
}

/// Returns `true` if the provided string parses as a UUID.
pub fn is_valid_uuid(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

/// Strips visual separators (spaces, dots, dashes, parentheses) from a phone number.
pub fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | '-' | '(' | ')'))
        .collect()
}

/// Returns `true` if the value is an international-style phone number once separators are removed.
pub fn is_valid_phone(value: &str) -> bool {
    PHONE_PATTERN.is_match(&normalize_phone(value))
}

/// Returns `true` for nanoid-style identifiers and UUIDs.
pub fn is_valid_entity_ref(value: &str) -> bool {
    ENTITY_REF_PATTERN.is_match(value) || is_valid_uuid(value)
}

/// Normalizes `#rgb`/`#rrggbb` to lowercase `#rrggbb`, or returns `None` when not a hex color.
pub fn normalize_hex_color(value: &str) -> Option<String> {
    if !HEX_COLOR_PATTERN.is_match(value) {
        return None;
    }
    let digits = value[1..].to_ascii_lowercase();
    if digits.len() == 3 {
        Some(digits.chars().fold(String::from("#"), |mut acc, c| {
            acc.push(c);
            acc.push(c);
            acc
        }))
    } else {
        Some(format!("#{digits}"))
    }
}

/// Returns `true` if the value is one of the accepted color keywords (case-insensitive).
pub fn is_named_color(value: &str) -> bool {
    NAMED_COLORS.iter().any(|name| name.eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("test@example.com"));
        assert!(!is_valid_email("invalid"));
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_url("https://example.com"));
        assert!(!is_valid_url("not-a-url"));
    }

    #[test]
    fn phone_validation() {
        assert!(is_valid_phone("+1 (555) 123-4567"));
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
        assert!(!is_valid_phone("call me"));
        assert!(!is_valid_phone("12"));
    }

    #[test]
    fn entity_reference_validation() {
        assert!(is_valid_entity_ref("usr_9fKq2"));
        assert!(is_valid_entity_ref("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_entity_ref("not a ref"));
        assert!(!is_valid_entity_ref(""));
    }

    #[test]
    fn color_validation() {
        assert_eq!(normalize_hex_color("#ABC").as_deref(), Some("#aabbcc"));
        assert_eq!(normalize_hex_color("#00ff7F").as_deref(), Some("#00ff7f"));
        assert_eq!(normalize_hex_color("#12"), None);
        assert!(is_named_color("Teal"));
        assert!(!is_named_color("blurple"));
    }
}
