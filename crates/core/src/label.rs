//! 레이블 유효성 검사
//!
//! 레이블 이름은 `^[a-zA-Z_][a-zA-Z0-9_]*$` 형식이어야 하고,
//! 레이블 값은 비어 있지 않으며 [`MAX_LABEL_VALUE_LEN`] 바이트를 넘지 않아야 합니다.

/// 레이블 값 최대 길이 (바이트)
pub const MAX_LABEL_VALUE_LEN: usize = 2048;

/// 레이블 이름이 유효한지 확인합니다.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 레이블 값이 유효한지 확인합니다.
pub fn is_valid_label_value(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_LABEL_VALUE_LEN
}

/// 이름이 유효하지 않은 이유를 반환합니다. 유효하면 `None`.
pub fn label_name_error(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        return Some("label name must not be empty");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Some("label name must not start with a digit");
    }
    if !is_valid_label_name(name) {
        return Some("label name may only contain [a-zA-Z0-9_]");
    }
    None
}
