use std::collections::HashSet;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<String>,
}

impl Availability {
    pub fn from_conflicts(conflicts: Vec<String>) -> Self {
        Self {
            available: conflicts.is_empty(),
            conflicts,
        }
    }
}

/// Requested codes already held by a live ticket, in request order.
pub fn find_conflicts<I, S>(requested: &[String], held: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let held: HashSet<String> = held.into_iter().map(|s| s.as_ref().to_string()).collect();
    let mut seen = HashSet::new();
    requested
        .iter()
        .filter(|code| held.contains(code.as_str()) && seen.insert(code.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_preserve_request_order() {
        let requested = vec!["B2".to_string(), "A1".to_string(), "C3".to_string()];
        let conflicts = find_conflicts(&requested, ["A1", "B2", "D4"]);
        assert_eq!(conflicts, vec!["B2".to_string(), "A1".to_string()]);
        assert!(!Availability::from_conflicts(conflicts).available);
    }

    #[test]
    fn test_no_conflicts_when_nothing_held() {
        let requested = vec!["A1".to_string()];
        let availability = Availability::from_conflicts(find_conflicts(&requested, Vec::<String>::new()));
        assert!(availability.available);
        assert!(availability.conflicts.is_empty());
    }
}
