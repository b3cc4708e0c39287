//! Static check for results that were typed in rather than computed

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(result|fig)\s*=\s*(.+?)\s*$").expect("assignment pattern is valid"));

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d+(\.\d+)?([eE][-+]?\d+)?$").expect("number pattern is valid"));

/// Warn when `result` or `fig` is assigned a literal before any dataset is touched
///
/// Never blocks execution; the warnings ride along on the outcome.
pub fn scan_suspicious_literals(code: &str, dataset_names: &[&str]) -> Vec<String> {
    debug!(code_len = code.len(), datasets = dataset_names.len(), "scan_suspicious_literals: called");
    let mut references = vec![r"datasets\s*\[".to_string(), r"\bdf\b".to_string()];
    references.extend(dataset_names.iter().map(|n| format!(r"\b{}\b", regex::escape(n))));
    let Ok(reference) = Regex::new(&references.join("|")) else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    let mut seen = String::new();
    for line in code.lines() {
        seen.push_str(line);
        seen.push('\n');

        let Some(caps) = ASSIGNMENT_RE.captures(line) else {
            continue;
        };
        let var = &caps[1];
        let rhs = &caps[2];
        let literal = rhs.starts_with('{')
            || rhs.starts_with('[')
            || rhs.starts_with('"')
            || rhs.starts_with('\'')
            || NUMBER_RE.is_match(rhs);

        if literal && !reference.is_match(&seen) {
            debug!(%var, "scan_suspicious_literals: literal assignment without data access");
            warnings.push(format!(
                "'{}' is assigned a hard-coded literal before any dataset is referenced; the value may not come from the data",
                var
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_dict_flagged() {
        let warnings = scan_suspicious_literals("result = {'p_value': 0.03}", &["survey"]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("'result'"));
    }

    #[test]
    fn test_number_and_string_flagged() {
        assert_eq!(scan_suspicious_literals("result = 0.42", &[]).len(), 1);
        assert_eq!(scan_suspicious_literals("result = \"yes\"", &[]).len(), 1);
    }

    #[test]
    fn test_computed_expression_not_flagged() {
        assert!(scan_suspicious_literals("result = 2 + 2", &[]).is_empty());
    }

    #[test]
    fn test_dataset_reference_clears_warning() {
        let code = "d = datasets['survey']\nresult = {'n': len(d)}";
        assert!(scan_suspicious_literals(code, &["survey"]).is_empty());

        let code = "m = df['age'].mean()\nresult = {'mean': m}";
        assert!(scan_suspicious_literals(code, &[]).is_empty());

        let code = "result = {'rows': len(survey)}";
        assert!(scan_suspicious_literals(code, &["survey"]).is_empty());
    }

    #[test]
    fn test_repeated_scans_are_independent() {
        for name in ["survey", "sales", "regions"] {
            let code = format!("result = {{'n': len({})}}", name);
            assert!(scan_suspicious_literals(&code, &[name]).is_empty());
            assert_eq!(scan_suspicious_literals("fig = []", &[name]).len(), 1);
        }
    }

    #[test]
    fn test_reference_after_assignment_does_not_count() {
        let code = "result = [1, 2, 3]\nprint(df)";
        assert_eq!(scan_suspicious_literals(code, &[]).len(), 1);
    }
}
