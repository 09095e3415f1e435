use serde_json::Value as JValue;

fn as_integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

// An integral float equals the integer it denotes exactly, not after rounding
// the integer to f64
fn integer_equals_float(i: i128, f: f64) -> bool {
    const LIMIT: f64 = 1.7014118346046923e38; // 2^127
    f.is_finite() && f.fract() == 0.0 && f.abs() < LIMIT && f as i128 == i
}

// Numbers compare by value, so an expected `1` matches a received `1.0`
fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    match (as_integer(a), as_integer(b)) {
        (Some(x), Some(y)) => x == y,
        (Some(x), None) => b.as_f64().is_some_and(|y| integer_equals_float(x, y)),
        (None, Some(y)) => a.as_f64().is_some_and(|x| integer_equals_float(y, x)),
        (None, None) => a.as_f64() == b.as_f64(),
    }
}

/// Equality of two dictionaries the way an expected-versus-actual test
/// assertion wants it: structural, with numeric values compared by value.
pub fn dictionaries_equal(expected: &JValue, actual: &JValue) -> bool {
    differences(expected, actual).is_empty()
}

/// Every key path at which `expected` and `actual` differ, rendered as one
/// human readable line each.
pub fn differences(expected: &JValue, actual: &JValue) -> Vec<String> {
    let mut out = Vec::new();
    collect_differences("", expected, actual, &mut out);
    out
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

fn collect_differences(path: &str, expected: &JValue, actual: &JValue, out: &mut Vec<String>) {
    match (expected, actual) {
        (JValue::Number(a), JValue::Number(b)) => {
            if !numbers_equal(a, b) {
                out.push(format!("{}: expected {}, got {}", display_path(path), a, b));
            }
        }
        (JValue::Object(a), JValue::Object(b)) => {
            for (key, value) in a.iter() {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match b.get(key) {
                    Some(other) => collect_differences(&child, value, other, out),
                    None => out.push(format!("- {}: {}", child, value)),
                }
            }
            for (key, value) in b.iter().filter(|(k, _)| !a.contains_key(*k)) {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                out.push(format!("+ {}: {}", child, value));
            }
        }
        (JValue::Array(a), JValue::Array(b)) => {
            if a.len() != b.len() {
                out.push(format!(
                    "{}: expected {} elements, got {}",
                    display_path(path),
                    a.len(),
                    b.len()
                ));
                return;
            }
            for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                collect_differences(&format!("{}[{}]", path, i), x, y, out);
            }
        }
        (a, b) => {
            if a != b {
                out.push(format!("{}: expected {}, got {}", display_path(path), a, b));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_compare_by_value() {
        assert!(dictionaries_equal(&json!({"sum": 3}), &json!({"sum": 3.0})));
        assert!(!dictionaries_equal(&json!({"sum": 3}), &json!({"sum": 3.5})));
        assert!(dictionaries_equal(&json!({"big": u64::MAX}), &json!({"big": u64::MAX})));
        assert!(dictionaries_equal(&json!({"big": -1}), &json!({"big": -1.0})));
        assert!(!dictionaries_equal(&json!({"big": u64::MAX}), &json!({"big": -1})));
        assert!(dictionaries_equal(
            &json!({"big": 9007199254740992u64}),
            &json!({"big": 9007199254740992.0})
        ));
        assert!(!dictionaries_equal(
            &json!({"big": 9007199254740993u64}),
            &json!({"big": 9007199254740992.0})
        ));
    }

    #[test]
    fn lists_missing_and_extra_keys() {
        let diff = differences(
            &json!({"success": true, "message": "ok"}),
            &json!({"success": false, "extra": 1}),
        );
        assert_eq!(
            diff,
            vec![
                "- message: \"ok\"".to_string(),
                "success: expected true, got false".to_string(),
                "+ extra: 1".to_string(),
            ]
        );
    }

    #[test]
    fn nested_paths() {
        let diff = differences(
            &json!({"pose": {"position": {"x": 1.0}}, "ids": [1, 2]}),
            &json!({"pose": {"position": {"x": 2.0}}, "ids": [1, 3]}),
        );
        assert_eq!(
            diff,
            vec![
                "ids[1]: expected 2, got 3".to_string(),
                "pose.position.x: expected 1.0, got 2.0".to_string(),
            ]
        );
        assert_eq!(
            differences(&json!([1]), &json!([1, 2])),
            vec!["<root>: expected 1 elements, got 2".to_string()]
        );
    }
}
