//! 服务器名称校验

pub const MIN_NAME_LENGTH: usize = 3;
pub const MAX_NAME_LENGTH: usize = 20;

/// 长度 3–20，只允许字母、数字和连字符（字母包括非 ASCII 字母）
pub fn validate_name(name: &str) -> bool {
    let length = name.chars().count();
    if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&length) {
        return false;
    }

    name.chars()
        .all(|c| c.is_alphabetic() || c.is_numeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_names() {
        assert!(validate_name("okname"));
        assert!(validate_name("thisisfine"));
        assert!(validate_name("thisisfine-too"));
        assert!(validate_name("thisisfine3-too"));
        assert!(validate_name("abc"));
        assert!(validate_name("リネーム-12345"));
    }

    #[test]
    fn test_rejects_length_out_of_range() {
        assert!(!validate_name("ba"));
        assert!(!validate_name(""));
        assert!(!validate_name("superlongnameisnotoddddddk"));
        assert!(validate_name("abcdefghijklmnopqrst"));
        assert!(!validate_name("abcdefghijklmnopqrstu"));
    }

    #[test]
    fn test_rejects_symbols() {
        assert!(!validate_name("this#is$"));
        assert!(!validate_name("this31$#@#@"));
        assert!(!validate_name("with space"));
        assert!(!validate_name("under_score"));
    }
}
