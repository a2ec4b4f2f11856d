// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identification: picking the mapping a raw payload belongs to.
//!
//! A candidate qualifies when the payload's key set fits its match style
//! and none of its `match_on_value` fields carries a different value. Its
//! score is the number of `match_on_value` fields whose value is present
//! and equal. The winner is the first candidate with the strictly highest
//! score; a score of zero never wins.

use crate::mapping::{MatchStyle, MessageMapping};
use crate::payload::{values_match, Payload};
use std::collections::HashSet;
use std::sync::Arc;

/// Check the payload's key set against the declared keys.
///
/// `declared` is in field order without duplicates. Trailing means "after
/// the last declared key" for extra payload keys and "a suffix of the
/// declared list" for missing declared keys.
pub fn shape_matches(style: MatchStyle, declared: &[&str], payload: &Payload) -> bool {
    if declared.is_empty() {
        return true;
    }
    let declared_set: HashSet<&str> = declared.iter().copied().collect();

    let present = declared
        .iter()
        .take_while(|key| payload.contains_key(**key))
        .count();
    let present_total = declared
        .iter()
        .filter(|key| payload.contains_key(**key))
        .count();
    // Declared keys present in the payload form the prefix declared[..present].
    let prefix_only = present == present_total;

    let mut seen_extra = false;
    let mut extras_trail = true;
    let mut has_extra = false;
    for key in payload.keys() {
        if declared_set.contains(key.as_str()) {
            if seen_extra {
                extras_trail = false;
            }
        } else {
            seen_extra = true;
            has_extra = true;
        }
    }

    match style {
        MatchStyle::Exact => !has_extra && present == declared.len(),
        MatchStyle::Under => !has_extra && prefix_only && present >= 1,
        MatchStyle::Over => present == declared.len() && extras_trail,
        MatchStyle::Any => prefix_only && present >= 1 && extras_trail,
    }
}

/// Score a candidate, or `None` when it is disqualified.
pub fn qualify(mapping: &MessageMapping, payload: &Payload) -> Option<usize> {
    if !shape_matches(mapping.match_style(), &mapping.declared_keys(), payload) {
        return None;
    }
    score(mapping, payload)
}

/// Count equal `match_on_value` fields, ignoring the match style.
///
/// `None` when a present field carries a different value.
pub fn score(mapping: &MessageMapping, payload: &Payload) -> Option<usize> {
    let mut score = 0;
    for field in &mapping.fields {
        let Some(expected) = field.match_on_value() else {
            continue;
        };
        match payload.get(field.key()) {
            None => {}
            Some(actual) if values_match(expected, actual) => score += 1,
            Some(_) => return None,
        }
    }
    Some(score)
}

/// Best-matching candidate for a payload.
pub fn identify<'a>(
    candidates: &'a [Arc<MessageMapping>],
    payload: &Payload,
) -> Option<&'a Arc<MessageMapping>> {
    let mut best: Option<(&'a Arc<MessageMapping>, usize)> = None;
    for candidate in candidates {
        let Some(score) = qualify(candidate, payload) else {
            continue;
        };
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }
    best.map(|(mapping, _)| mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MessageFieldConfig, MessageIOConfig};
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        crate::payload::from_json(value).expect("object")
    }

    fn mapping(id: &str, style: MatchStyle, fields: &[(&str, Option<&str>)]) -> Arc<MessageMapping> {
        let mut m = MessageMapping::new(id, MessageIOConfig::input("in", style));
        for (key, value) in fields {
            let mut field = MessageFieldConfig::new(*key, "in");
            if let Some(v) = value {
                field = field.with_match_on(*v);
            }
            m = m.with_field(field);
        }
        Arc::new(m)
    }

    #[test]
    fn test_shape_exact() {
        let declared = ["a", "b"];
        assert!(shape_matches(MatchStyle::Exact, &declared, &payload(json!({"b": 1, "a": 2}))));
        assert!(!shape_matches(MatchStyle::Exact, &declared, &payload(json!({"a": 1}))));
        assert!(!shape_matches(
            MatchStyle::Exact,
            &declared,
            &payload(json!({"a": 1, "b": 2, "c": 3}))
        ));
    }

    #[test]
    fn test_shape_under() {
        let declared = ["a", "b", "c"];
        assert!(shape_matches(MatchStyle::Under, &declared, &payload(json!({"a": 1}))));
        assert!(shape_matches(MatchStyle::Under, &declared, &payload(json!({"a": 1, "b": 2}))));
        assert!(shape_matches(
            MatchStyle::Under,
            &declared,
            &payload(json!({"a": 1, "b": 2, "c": 3}))
        ));
        // Missing a non-trailing declared key.
        assert!(!shape_matches(MatchStyle::Under, &declared, &payload(json!({"a": 1, "c": 3}))));
        assert!(!shape_matches(MatchStyle::Under, &declared, &payload(json!({}))));
        assert!(!shape_matches(MatchStyle::Under, &declared, &payload(json!({"a": 1, "x": 0}))));
    }

    #[test]
    fn test_shape_over() {
        let declared = ["a", "b"];
        assert!(shape_matches(MatchStyle::Over, &declared, &payload(json!({"a": 1, "b": 2}))));
        assert!(shape_matches(
            MatchStyle::Over,
            &declared,
            &payload(json!({"a": 1, "b": 2, "x": 3}))
        ));
        // Extra key before a declared key is not trailing.
        assert!(!shape_matches(
            MatchStyle::Over,
            &declared,
            &payload(json!({"a": 1, "x": 3, "b": 2}))
        ));
        assert!(!shape_matches(MatchStyle::Over, &declared, &payload(json!({"a": 1, "x": 3}))));
    }

    #[test]
    fn test_shape_any() {
        let declared = ["a", "b", "c"];
        assert!(shape_matches(MatchStyle::Any, &declared, &payload(json!({"a": 1, "x": 3}))));
        assert!(shape_matches(MatchStyle::Any, &declared, &payload(json!({"a": 1, "b": 2}))));
        assert!(!shape_matches(MatchStyle::Any, &declared, &payload(json!({"b": 2}))));
        assert!(!shape_matches(MatchStyle::Any, &declared, &payload(json!({"x": 1, "a": 2}))));
    }

    #[test]
    fn test_shape_no_declared_keys() {
        assert!(shape_matches(MatchStyle::Exact, &[], &payload(json!({"anything": 1}))));
    }

    #[test]
    fn test_qualify_scores_and_disqualifies() {
        let m = mapping("m", MatchStyle::Exact, &[("type", Some("A")), ("sub", Some("X")), ("amt", None)]);
        assert_eq!(qualify(&m, &payload(json!({"type": "A", "sub": "X", "amt": 1}))), Some(2));
        assert_eq!(qualify(&m, &payload(json!({"type": "A", "sub": "Y", "amt": 1}))), None);

        let under = mapping("u", MatchStyle::Under, &[("type", Some("A")), ("sub", Some("X"))]);
        // Absent match field contributes nothing.
        assert_eq!(qualify(&under, &payload(json!({"type": "A"}))), Some(1));
    }

    #[test]
    fn test_identify_scenario_type_a() {
        let m1 = mapping("M1", MatchStyle::Exact, &[("type", Some("A")), ("amt", None)]);
        let m2 = mapping("M2", MatchStyle::Exact, &[("type", Some("B")), ("amt", None)]);
        let candidates = vec![m1, m2];

        let winner = identify(&candidates, &payload(json!({"type": "A", "amt": "5"})));
        assert_eq!(winner.map(|m| m.message_id.as_str()), Some("M1"));
    }

    #[test]
    fn test_identify_highest_score_wins() {
        let one = mapping("one", MatchStyle::Exact, &[("type", Some("A")), ("sub", None)]);
        let two = mapping("two", MatchStyle::Exact, &[("type", Some("A")), ("sub", Some("X"))]);
        let candidates = vec![one, two];

        let winner = identify(&candidates, &payload(json!({"type": "A", "sub": "X"})));
        assert_eq!(winner.map(|m| m.message_id.as_str()), Some("two"));
    }

    #[test]
    fn test_identify_tie_goes_to_first() {
        let first = mapping("first", MatchStyle::Exact, &[("type", Some("A"))]);
        let second = mapping("second", MatchStyle::Exact, &[("type", Some("A"))]);
        let candidates = vec![first, second];

        let winner = identify(&candidates, &payload(json!({"type": "A"})));
        assert_eq!(winner.map(|m| m.message_id.as_str()), Some("first"));
    }

    #[test]
    fn test_identify_mismatch_never_wins() {
        let greedy = mapping(
            "greedy",
            MatchStyle::Exact,
            &[("a", Some("1")), ("b", Some("2")), ("c", Some("3"))],
        );
        let modest = mapping("modest", MatchStyle::Exact, &[("a", Some("1")), ("b", None), ("c", None)]);
        let candidates = vec![greedy, modest];

        let winner = identify(&candidates, &payload(json!({"a": "1", "b": "2", "c": "wrong"})));
        assert_eq!(winner.map(|m| m.message_id.as_str()), Some("modest"));
    }

    #[test]
    fn test_identify_zero_score_fails() {
        let plain = mapping("plain", MatchStyle::Exact, &[("a", None)]);
        let candidates = vec![plain];
        assert!(identify(&candidates, &payload(json!({"a": 1}))).is_none());
    }

    #[test]
    fn test_identify_shape_violation_disqualifies() {
        let strict = mapping("strict", MatchStyle::Exact, &[("type", Some("A")), ("amt", None)]);
        let loose = mapping("loose", MatchStyle::Over, &[("type", Some("A")), ("amt", None)]);
        let candidates = vec![strict, loose];

        let winner = identify(&candidates, &payload(json!({"type": "A", "amt": 1, "note": "x"})));
        assert_eq!(winner.map(|m| m.message_id.as_str()), Some("loose"));
    }

    #[test]
    fn test_identify_loose_numeric_match() {
        let m = mapping("m", MatchStyle::Exact, &[("code", Some("5"))]);
        let candidates = vec![m];
        assert!(identify(&candidates, &payload(json!({"code": 5}))).is_some());
    }
}
