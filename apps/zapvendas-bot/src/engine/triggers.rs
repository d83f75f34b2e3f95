use std::cmp::Reverse;

use zapvendas_db::models::flow::FlowTrigger;

/// Picks the flow a free-text message should start, or `None` when nothing
/// matches. Exact keywords beat substring keywords; within each pass the
/// highest priority wins, ties broken by lowest trigger id.
pub fn resolve(input: &str, triggers: &[FlowTrigger]) -> Option<i64> {
    let normalized = input.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let exact = triggers
        .iter()
        .filter(|t| t.is_exact_match && t.keyword.to_lowercase() == normalized);
    if let Some(hit) = best(exact) {
        return Some(hit);
    }

    let partial = triggers
        .iter()
        .filter(|t| !t.is_exact_match && normalized.contains(&t.keyword.to_lowercase()));
    best(partial)
}

fn best<'a>(matches: impl Iterator<Item = &'a FlowTrigger>) -> Option<i64> {
    matches
        .min_by_key(|t| (Reverse(t.priority), t.id))
        .map(|t| t.flow_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(id: i64, flow_id: i64, keyword: &str, exact: bool, priority: i32) -> FlowTrigger {
        FlowTrigger {
            id,
            flow_id,
            keyword: keyword.to_string(),
            is_exact_match: exact,
            priority,
        }
    }

    #[test]
    fn exact_match_beats_partial() {
        let triggers = vec![
            trigger(1, 10, "comprar", false, 100),
            trigger(2, 20, "comprar", true, 1),
        ];
        assert_eq!(resolve("Comprar", &triggers), Some(20));
    }

    #[test]
    fn partial_matches_inside_longer_message() {
        let triggers = vec![trigger(1, 10, "renovar", false, 5)];
        assert_eq!(resolve("quero renovar meu plano", &triggers), Some(10));
        assert_eq!(resolve("oi", &triggers), None);
    }

    #[test]
    fn highest_priority_wins_ties_by_lowest_id() {
        let triggers = vec![
            trigger(3, 30, "planos", true, 5),
            trigger(1, 10, "planos", true, 9),
            trigger(2, 20, "planos", true, 9),
        ];
        assert_eq!(resolve("planos", &triggers), Some(10));
    }

    #[test]
    fn exact_requires_full_equality() {
        let triggers = vec![trigger(1, 10, "comprar", true, 1)];
        assert_eq!(resolve("quero comprar", &triggers), None);
    }
}
