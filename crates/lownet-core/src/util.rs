/// Printable ASCII range used by `chat`'s message validation: space (0x20)
/// through DEL-exclusive (0x7e).
pub fn is_printable(c: u8) -> bool {
    (b' '..127).contains(&c)
}

/// Validates a chat message: every byte printable, not exceeding the frame
/// payload budget. Returns the message length, or `None` if invalid.
pub fn valid_chat_message(message: &str, max_len: usize) -> Option<usize> {
    if message.len() > max_len {
        return None;
    }
    if message.bytes().all(is_printable) {
        Some(message.len())
    } else {
        None
    }
}

/// Parses a hex node id such as `"ID"` from a `"0xID"`-prefixed string,
/// mirroring `hex_to_dec`. Returns `None` on any non-hex digit.
pub fn parse_node_id(text: &str) -> Option<u8> {
    let digits = text.strip_prefix("0x").or(text.strip_prefix("0X")).unwrap_or(text);
    u8::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_range_excludes_control_and_del() {
        assert!(is_printable(b' '));
        assert!(is_printable(b'~'));
        assert!(!is_printable(0x1f));
        assert!(!is_printable(127));
    }

    #[test]
    fn chat_message_validation_rejects_overlong_or_nonprintable() {
        assert_eq!(valid_chat_message("hello", 200), Some(5));
        assert!(valid_chat_message("tab\there", 200).is_none());
        assert!(valid_chat_message(&"x".repeat(201), 200).is_none());
    }

    #[test]
    fn node_id_parses_with_or_without_prefix() {
        assert_eq!(parse_node_id("0x2a"), Some(0x2a));
        assert_eq!(parse_node_id("2a"), Some(0x2a));
        assert_eq!(parse_node_id("zz"), None);
    }
}
