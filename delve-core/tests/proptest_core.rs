//! Property-based tests for core components using proptest.

use proptest::prelude::*;
use std::collections::HashSet;

use delve_core::research::model::{
    Finding, SourceRecord, clamp_unit, dedup_findings, dedup_sources, dedup_urls,
};
use delve_core::research::orchestrator::child_breadth;
use delve_core::research::report::sources_section;
use delve_core::research::{BudgetTracker, ResearchDirection, combine_query};

// --- Budget properties ---

proptest! {
    #[test]
    fn budget_used_never_decreases(
        cap in prop::option::of(1u64..10_000),
        units in prop::collection::vec(0u64..2_000, 0..40),
    ) {
        let budget = BudgetTracker::new(cap);
        let mut previous = 0;
        let mut was_exhausted = false;
        for u in units {
            budget.record_units(u);
            let used = budget.used();
            prop_assert!(used >= previous);
            previous = used;
            if was_exhausted {
                prop_assert!(budget.is_exhausted());
            }
            was_exhausted = budget.is_exhausted();
        }
    }

    #[test]
    fn budget_exhausted_iff_cap_reached(
        cap in 1u64..5_000,
        units in prop::collection::vec(0u64..1_000, 0..20),
    ) {
        let budget = BudgetTracker::new(Some(cap));
        let total: u64 = units.iter().sum();
        for u in &units {
            budget.record_units(*u);
        }
        prop_assert_eq!(budget.used(), total);
        prop_assert_eq!(budget.is_exhausted(), total >= cap);
    }

    #[test]
    fn unlimited_budget_never_exhausts(units in prop::collection::vec(any::<u32>(), 0..20)) {
        let budget = BudgetTracker::new(None);
        for u in units {
            budget.record_units(u64::from(u));
        }
        prop_assert!(!budget.is_exhausted());
        prop_assert_eq!(budget.snapshot().cap, None);
    }
}

// --- Tree shape properties ---

proptest! {
    #[test]
    fn child_breadth_is_ceiling_half(breadth in 1usize..1_000) {
        let child = child_breadth(breadth);
        prop_assert!(child >= 1);
        prop_assert!(child <= breadth);
        prop_assert_eq!(child, (breadth + 1) / 2);
    }

    #[test]
    fn tree_size_is_bounded(breadth in 1usize..12, depth in 1usize..6) {
        // Upper bound on branches: sum over levels of the product of breadths.
        let mut level_breadth = breadth;
        let mut per_level = breadth;
        let mut total = 0usize;
        for _ in 0..depth {
            total += per_level;
            level_breadth = child_breadth(level_breadth);
            per_level *= level_breadth;
        }
        prop_assert!(total <= breadth.pow(depth as u32) * depth);
    }
}

// --- Dedup properties ---

fn finding_strategy() -> impl Strategy<Value = Finding> {
    ("[a-d]{1,3}", 0.0f64..=1.0).prop_map(|(content, reliability)| Finding::new(content, reliability))
}

fn source_strategy() -> impl Strategy<Value = SourceRecord> {
    ("[a-c]", 0.0f64..=1.0).prop_map(|(host, score)| SourceRecord {
        url: format!("https://{host}.org"),
        title: None,
        domain: format!("{host}.org"),
        reliability_score: score,
        reliability_reasoning: String::new(),
    })
}

proptest! {
    #[test]
    fn dedup_findings_unique_and_idempotent(findings in prop::collection::vec(finding_strategy(), 0..30)) {
        let once = dedup_findings(findings.clone());
        let contents: HashSet<&str> = once.iter().map(|f| f.content.as_str()).collect();
        prop_assert_eq!(contents.len(), once.len());

        let all: HashSet<&str> = findings.iter().map(|f| f.content.as_str()).collect();
        prop_assert_eq!(&contents, &all);

        let twice = dedup_findings(once.clone());
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn dedup_findings_keeps_highest_reliability(findings in prop::collection::vec(finding_strategy(), 1..30)) {
        let deduped = dedup_findings(findings.clone());
        for kept in &deduped {
            let best = findings
                .iter()
                .filter(|f| f.content == kept.content)
                .map(|f| f.reliability)
                .fold(f64::MIN, f64::max);
            prop_assert_eq!(kept.reliability, best);
        }
    }

    #[test]
    fn dedup_sources_one_per_url(sources in prop::collection::vec(source_strategy(), 0..20)) {
        let deduped = dedup_sources(sources.clone());
        let urls: HashSet<&str> = deduped.iter().map(|s| s.url.as_str()).collect();
        prop_assert_eq!(urls.len(), deduped.len());
        for kept in &deduped {
            prop_assert!(sources
                .iter()
                .filter(|s| s.url == kept.url)
                .all(|s| s.reliability_score <= kept.reliability_score));
        }
    }

    #[test]
    fn dedup_urls_preserves_first_seen_order(urls in prop::collection::vec("[a-e]", 0..30)) {
        let deduped = dedup_urls(urls.clone());
        let mut expected: Vec<String> = Vec::new();
        for url in urls {
            if !expected.contains(&url) {
                expected.push(url);
            }
        }
        prop_assert_eq!(deduped, expected);
    }

    #[test]
    fn sources_section_lists_every_source(sources in prop::collection::vec(source_strategy(), 0..10)) {
        let deduped = dedup_sources(sources);
        let section = sources_section(&deduped);
        prop_assert!(section.starts_with("\n\n## Sources\n\n"));
        prop_assert_eq!(section.matches("  - Reliability: ").count(), deduped.len());
    }
}

// --- Clamping properties ---

proptest! {
    #[test]
    fn clamp_unit_stays_in_range(value in any::<f64>()) {
        let clamped = clamp_unit(value);
        prop_assert!((0.0..=1.0).contains(&clamped));
    }

    #[test]
    fn direction_priority_in_range(priority in any::<u8>()) {
        let direction = ResearchDirection::new("q", priority, None);
        prop_assert!((1..=5).contains(&direction.priority));
    }

    #[test]
    fn combine_query_mentions_every_question(
        questions in prop::collection::vec("[a-z]{1,8}\\?", 1..4),
    ) {
        let answers: Vec<String> = questions.iter().map(|q| format!("re {q}")).collect();
        let combined = combine_query("topic", &questions, &answers);
        prop_assert!(combined.starts_with("Initial Query: topic\n"));
        for question in &questions {
            let expected = format!("Q: {question}\nA: re {question}");
            prop_assert!(combined.contains(&expected));
        }
    }
}
