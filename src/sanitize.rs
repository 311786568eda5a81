use once_cell::sync::Lazy;
use regex::Regex;

static SENSITIVE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passphrase|key|secret|credential)[\s:=]+[^\s]+").unwrap()
});

/// Redacts `name=value` style secrets and strips control characters so that
/// file names read back from disk cannot forge log lines.
pub fn sanitize_for_display(message: &str) -> String {
    let redacted = SENSITIVE_PATTERN.replace_all(message, "$1=[REDACTED]");
    redacted
        .chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passphrase() {
        let message = "Failed to open store: passphrase=0011aabb";
        let sanitized = sanitize_for_display(message);
        assert_eq!(sanitized, "Failed to open store: passphrase=[REDACTED]");
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "key=abc and secret=def";
        let sanitized = sanitize_for_display(message);
        assert_eq!(sanitized, "key=[REDACTED] and secret=[REDACTED]");
    }

    #[test]
    fn test_sanitize_preserves_safe_content() {
        let message = "Deleted 3 dangling transfer files";
        assert_eq!(sanitize_for_display(message), message);
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        let message = "Deleted transfer\n[ERROR] forged";
        assert_eq!(sanitize_for_display(message), "Deleted transfer?[ERROR] forged");
    }
}
