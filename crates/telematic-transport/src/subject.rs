//! Subject pattern matching with `*` (one token) and `>` (one or more trailing tokens).

/// Whether `subject` is matched by `pattern`.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(token)) => return !token.is_empty(),
            (Some("*"), Some(token)) if !token.is_empty() => {}
            (Some(expected), Some(token)) if expected == token && !token.is_empty() => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether `subject` is a concrete publish subject (non-empty tokens, no wildcards).
#[must_use]
pub fn is_concrete(subject: &str) -> bool {
    subject
        .split('.')
        .all(|token| !token.is_empty() && token != "*" && token != ">")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_subjects_match_exactly() {
        assert!(matches("U1.check_status", "U1.check_status"));
        assert!(!matches("U1.check_status", "U2.check_status"));
        assert!(!matches("U1.check_status", "U1.check_status.extra"));
    }

    #[test]
    fn star_matches_one_token() {
        assert!(matches("*.register_unit", "DOT-45244.register_unit"));
        assert!(!matches("*.register_unit", "a.b.register_unit"));
        assert!(!matches("*.register_unit", "register_unit"));
    }

    #[test]
    fn tail_wildcard_needs_at_least_one_token() {
        assert!(matches("U1.platform.>", "U1.platform.imu"));
        assert!(matches("U1.platform.>", "U1.platform.imu.accel"));
        assert!(!matches("U1.platform.>", "U1.platform"));
        assert!(!matches("U1.platform.>", "U1.streets.imu"));
    }

    #[test]
    fn concrete_subjects_reject_wildcards() {
        assert!(is_concrete("U1.check_status"));
        assert!(!is_concrete("U1.*"));
        assert!(!is_concrete("U1..x"));
    }
}
