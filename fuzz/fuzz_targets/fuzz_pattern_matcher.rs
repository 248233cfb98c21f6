#![no_main]

use libfuzzer_sys::fuzz_target;
use turnstile::filter::matcher::{PatternMatcher, TargetPattern};

fuzz_target!(|data: &[u8]| {
    // Split input into pattern and text at the first null byte
    let split = data.iter().position(|&b| b == 0);
    let (pattern_bytes, text_bytes) = match split {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, &[] as &[u8]),
    };

    let pattern = match std::str::from_utf8(pattern_bytes) {
        Ok(s) => s,
        Err(_) => return,
    };
    let text = match std::str::from_utf8(text_bytes) {
        Ok(s) => s,
        Err(_) => return,
    };

    let matcher = PatternMatcher::case_insensitive(pattern);
    let matched = matcher.matches(text);
    if matcher.is_literal() {
        assert_eq!(matched, pattern.eq_ignore_ascii_case(text));
    }
    if pattern == "*" {
        assert!(matched);
    }

    // Glob and regex flavours of CONNECT target patterns; regex errors are fine
    let _ = TargetPattern::glob(pattern).matches(text);
    if let Ok(re) = TargetPattern::regex(pattern) {
        let _ = re.matches(text);
    }
});
