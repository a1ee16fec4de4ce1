pub mod env;
pub mod telemetry;

use std::hint::black_box;

/// Compares two strings without short-circuiting on the first differing byte, so the time taken
/// does not reveal how much of a secret the caller guessed correctly
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let res = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| acc | black_box(l ^ r));

    black_box(res) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "test_string";
        let passing = "test_string";

        let bad_start = "__st_string";
        let bad_end = "test_str___";

        let short = "test_strin";
        let long = "test_string_";

        assert!(constant_time_cmp(expects, passing));
        assert!(!constant_time_cmp(expects, bad_start));
        assert!(!constant_time_cmp(expects, bad_end));
        assert!(!constant_time_cmp(expects, short));
        assert!(!constant_time_cmp(expects, long));
        assert!(constant_time_cmp("", ""));
    }
}
