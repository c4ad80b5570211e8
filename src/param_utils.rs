use std::collections::HashMap;

/// Extract a parameter as usize with a default value. Values are rounded;
/// non-finite values fall back to the default and negatives clamp to zero.
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    match params.get(key) {
        Some(&v) if v.is_finite() => v.round().max(0.0) as usize,
        _ => default,
    }
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Formats a parameter map as a stable `key: value` list for log lines.
pub fn format_parameters(params: &HashMap<String, f64>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            let value = params[key];
            if value.fract() == 0.0 {
                format!("{}: {}", key, value as i64)
            } else {
                format!("{}: {}", key, value)
            }
        })
        .collect::<Vec<String>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usize_params_round_and_fall_back() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), 7.6);
        params.insert("b".to_string(), f64::NAN);
        params.insert("c".to_string(), -3.0);
        assert_eq!(get_param_usize(&params, "a", 1), 8);
        assert_eq!(get_param_usize(&params, "b", 4), 4);
        assert_eq!(get_param_usize(&params, "c", 4), 0);
        assert_eq!(get_param_usize(&params, "missing", 9), 9);
    }

    #[test]
    fn format_parameters_is_sorted() {
        let mut params = HashMap::new();
        params.insert("stopLossPct".to_string(), 0.01);
        params.insert("emaFast".to_string(), 8.0);
        assert_eq!(format_parameters(&params), "emaFast: 8, stopLossPct: 0.01");
    }
}
