use std::cmp::Ordering;

use crate::types::Space;

fn numeric(id: &str) -> Option<i64> {
    id.parse::<i64>().ok()
}

/// Numeric when both identifiers are integers, lexicographic otherwise.
pub fn compare_space_ids(a: &str, b: &str) -> Ordering {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Sorts spaces by identifier. Windows inside each space are left untouched.
///
/// The pairwise rule is not transitive once integers and other identifiers
/// mix (`"2" < "10"` numerically, but `"10" < "15x" < "2"` as strings), so
/// the two groups are sorted on their own and then merged with the mixed
/// comparison. Every integer pair and every non-integer pair keeps its exact
/// order; mixed pairs follow string order wherever that is consistent.
pub fn sort_spaces(spaces: Vec<Space>) -> Vec<Space> {
    let (mut ints, mut others): (Vec<(i64, Space)>, Vec<Space>) = (Vec::new(), Vec::new());
    for space in spaces {
        match numeric(&space.id) {
            Some(n) => ints.push((n, space)),
            None => others.push(space),
        }
    }
    ints.sort_by(|(x, a), (y, b)| x.cmp(y).then_with(|| a.id.cmp(&b.id)));
    others.sort_by(|a, b| a.id.cmp(&b.id));

    let mut merged = Vec::with_capacity(ints.len() + others.len());
    let mut ints = ints.into_iter().map(|(_, space)| space).peekable();
    let mut others = others.into_iter().peekable();
    loop {
        let take_int = match (ints.peek(), others.peek()) {
            (Some(int), Some(other)) => int.id <= other.id,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_int { ints.next() } else { others.next() };
        merged.extend(next);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spaces(ids: &[&str]) -> Vec<Space> {
        ids.iter()
            .map(|id| Space {
                id: id.to_string(),
                windows: Vec::new(),
            })
            .collect()
    }

    fn ids(spaces: &[Space]) -> Vec<&str> {
        spaces.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn numeric_ids_sort_by_value() {
        let sorted = sort_spaces(spaces(&["10", "2", "1", "33", "4"]));
        assert_eq!(ids(&sorted), vec!["1", "2", "4", "10", "33"]);
    }

    #[test]
    fn symbolic_ids_sort_lexicographically() {
        let sorted = sort_spaces(spaces(&["web", "B", "code", "A"]));
        assert_eq!(ids(&sorted), vec!["A", "B", "code", "web"]);
    }

    #[test]
    fn mixed_ids() {
        let sorted = sort_spaces(spaces(&["b", "10", "2", "a", "1"]));
        assert_eq!(ids(&sorted), vec!["1", "2", "10", "a", "b"]);
    }

    #[test]
    fn inconsistent_mix_is_deterministic() {
        let first = sort_spaces(spaces(&["15x", "2", "10"]));
        let second = sort_spaces(spaces(&["10", "15x", "2"]));
        assert_eq!(ids(&first), ids(&second));
        let position = |id: &str| ids(&first).iter().position(|x| *x == id).unwrap();
        assert!(position("2") < position("10"));
    }

    #[test]
    fn windows_keep_provider_order() {
        use crate::types::Window;
        let window = |id: &str| Window {
            id: id.to_string(),
            app: "app".to_string(),
            title: String::new(),
        };
        let input = vec![
            Space {
                id: "2".to_string(),
                windows: vec![window("9"), window("3"), window("5")],
            },
            Space {
                id: "1".to_string(),
                windows: Vec::new(),
            },
        ];
        let sorted = sort_spaces(input);
        let window_ids: Vec<&str> = sorted[1].windows.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(window_ids, vec!["9", "3", "5"]);
    }

    #[test]
    fn comparator_cases() {
        assert_eq!(compare_space_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_space_ids("-3", "1"), Ordering::Less);
        assert_eq!(compare_space_ids("10", "a"), Ordering::Less);
        assert_eq!(compare_space_ids("9a", "10"), Ordering::Greater);
        assert_eq!(compare_space_ids("7", "7"), Ordering::Equal);
    }

    fn id_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u32..1000).prop_map(|n| n.to_string()),
            "[A-Za-z][A-Za-z0-9]{0,4}",
        ]
    }

    proptest! {
        /// Integer pairs are numeric and non-integer pairs lexicographic,
        /// whatever else is in the list
        #[test]
        fn group_orders_hold(input in prop::collection::vec(id_strategy(), 0..24)) {
            let refs: Vec<&str> = input.iter().map(String::as_str).collect();
            let sorted = sort_spaces(spaces(&refs));
            prop_assert_eq!(sorted.len(), input.len());
            for (i, a) in sorted.iter().enumerate() {
                for b in &sorted[i + 1..] {
                    match (numeric(&a.id), numeric(&b.id)) {
                        (Some(x), Some(y)) => prop_assert!(x <= y, "{} before {}", a.id, b.id),
                        (None, None) => prop_assert!(a.id <= b.id, "{} before {}", a.id, b.id),
                        _ => {}
                    }
                }
            }
        }

        /// Single-digit integers agree with string order, so every pair
        /// follows the pairwise comparator
        #[test]
        fn consistent_mix_matches_comparator(
            input in prop::collection::vec(
                prop_oneof![(0u32..10).prop_map(|n| n.to_string()), "[a-z]{1,3}"],
                0..16,
            )
        ) {
            let refs: Vec<&str> = input.iter().map(String::as_str).collect();
            let sorted = sort_spaces(spaces(&refs));
            for pair in sorted.windows(2) {
                prop_assert_ne!(compare_space_ids(&pair[0].id, &pair[1].id), Ordering::Greater);
            }
        }
    }
}
