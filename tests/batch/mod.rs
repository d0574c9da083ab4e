#[path = "../common/mod.rs"]
mod common;

use common::{queries, CountingScorer, FixedScorer, FlakyScorer};
use recbench::basic::{PopScorer, RandomScorer};
use recbench::metrics::{Dcg, Hit, ListMetric, Precision, RecipRank, Recall};
use recbench::*;
use std::sync::Arc;
use std::time::Duration;

fn runner(n: usize) -> BatchRunner {
    BatchRunner::new(ScoringBudget::new(n))
}

#[tokio::test]
async fn test_end_to_end_top_two() {
    let scorer = FixedScorer::new(&[("A", 3.0), ("B", 1.0), ("C", 2.0)]);
    let candidates = ItemList::unordered(["A", "B", "C"]).unwrap();
    let query = Query::new("q1").with_candidates(candidates);

    let results = runner(2).run(Arc::new(scorer), &[query], Some(2)).await;
    let recs = results.get("q1").unwrap().as_ref().unwrap();
    assert_eq!(recs.ids().collect::<Vec<_>>(), vec!["A", "C"]);
    assert_eq!(recs.ranks(), Some(&[1, 2][..]));

    let test = ItemList::unordered(["C", "D"]).unwrap();
    assert_eq!(Hit::at(2).measure_list(recs, &test).unwrap(), 1.0);
    assert_eq!(Precision::at(2).measure_list(recs, &test).unwrap(), 0.5);
    assert_eq!(Recall::at(2).measure_list(recs, &test).unwrap(), 0.5);
    assert_eq!(RecipRank::at(2).measure_list(recs, &test).unwrap(), 0.5);
    let dcg = Dcg::at(2).measure_list(recs, &test).unwrap();
    assert!((dcg - 0.6309).abs() < 1e-4, "dcg = {}", dcg);
}

#[tokio::test]
async fn test_failing_queries_do_not_stop_batch() {
    let candidates = ItemList::unordered(["x", "y", "z"]).unwrap();
    let qs = queries(20, &candidates);
    let scorer = FlakyScorer::failing(&["q3", "q7", "q11"]);

    let results = runner(4).run(Arc::new(scorer), &qs, Some(2)).await;
    assert_eq!(results.len(), 20);
    assert_eq!(results.n_scored(), 17);
    assert_eq!(results.n_failed(), 3);

    let failures = results.failures();
    for q in ["q3", "q7", "q11"] {
        assert!(matches!(failures.get(q), Some(QueryError::Scorer(_))));
    }
    for list in results.lists().values() {
        assert_eq!(list.len(), 2);
        assert!(list.is_ordered());
    }
}

#[tokio::test]
async fn test_results_deterministic_across_budgets() {
    let candidates = ItemList::unordered(["a", "b", "c", "d", "e"]).unwrap();
    let qs = queries(12, &candidates);

    let serial = runner(1)
        .run(Arc::new(RandomScorer::new(42)), &qs, Some(3))
        .await
        .into_ordered();
    let parallel = runner(8)
        .run(Arc::new(RandomScorer::new(42)), &qs, Some(3))
        .await
        .into_ordered();

    assert_eq!(serial.lists(), parallel.lists());
}

#[tokio::test]
async fn test_n_larger_than_candidates() {
    let candidates = ItemList::unordered(["a", "b"]).unwrap();
    let scorer = FixedScorer::new(&[("a", 1.0), ("b", 2.0)]);
    let results = runner(1)
        .run(Arc::new(scorer), &queries(1, &candidates), Some(10))
        .await;
    let list = results.get("q0").unwrap().as_ref().unwrap();
    assert_eq!(list.ids().collect::<Vec<_>>(), vec!["b", "a"]);
}

#[tokio::test]
async fn test_unscorable_items_omitted() {
    let candidates = ItemList::unordered(["a", "b", "unknown"]).unwrap();
    let scorer = FixedScorer::new(&[("a", 1.0), ("b", 2.0)]);
    let results = runner(1)
        .run(Arc::new(scorer), &queries(1, &candidates), None)
        .await;
    let list = results.get("q0").unwrap().as_ref().unwrap();
    assert!(!list.contains("unknown"));
}

#[tokio::test]
async fn test_untrained_scorer_fails_every_query() {
    let candidates = ItemList::unordered(["a"]).unwrap();
    let results = runner(2)
        .run(Arc::new(PopScorer::new()), &queries(3, &candidates), None)
        .await;
    assert_eq!(results.n_failed(), 3);
    assert!(results
        .failures()
        .values()
        .all(|e| matches!(e, QueryError::Scorer(ScorerError::Untrained(_)))));
}

#[tokio::test]
async fn test_slow_query_times_out() {
    let candidates = ItemList::unordered(["a", "b"]).unwrap();
    let scorer = FlakyScorer::hanging(&["q1"], Duration::from_millis(500));
    let results = runner(2)
        .with_timeout(Some(Duration::from_millis(50)))
        .run(Arc::new(scorer), &queries(3, &candidates), None)
        .await;

    assert_eq!(results.len(), 3);
    assert!(matches!(results.get("q1"), Some(Err(QueryError::TimedOut(_)))));
    assert_eq!(results.n_scored(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_calls_keep_their_slot() {
    let candidates = ItemList::unordered(["a"]).unwrap();
    let scorer = CountingScorer::sleeping(Duration::from_millis(150));
    let budget = ScoringBudget::new(1);
    let results = BatchRunner::new(budget.clone())
        .with_timeout(Some(Duration::from_millis(20)))
        .run(Arc::new(scorer.clone()), &queries(4, &candidates), None)
        .await;

    assert_eq!(results.n_failed(), 4);
    assert!(results
        .failures()
        .values()
        .all(|e| matches!(e, QueryError::TimedOut(_))));
    // abandoned calls still count against the budget until they return
    assert_eq!(scorer.peak(), 1);
}

#[tokio::test]
async fn test_shared_budget_returned() {
    let budget = ScoringBudget::new(3);
    let candidates = ItemList::unordered(["a"]).unwrap();
    BatchRunner::new(budget.clone())
        .run(Arc::new(FlakyScorer::failing(&[])), &queries(10, &candidates), None)
        .await;
    assert_eq!(budget.available(), 3);
}

#[tokio::test]
async fn test_candidate_selector_excludes_history() {
    let train = Dataset::new(vec![
        Interaction::new("u1", "a"),
        Interaction::new("u2", "b"),
        Interaction::new("u2", "c"),
    ]);
    let selector = CandidateSelector::unrated_training_items(&train);
    let query = Query::new("u1").with_history(train.query_history("u1"));
    let scorer = FixedScorer::new(&[("a", 9.0), ("b", 1.0), ("c", 2.0)]);

    let results = runner(1)
        .with_candidates(selector)
        .run(Arc::new(scorer), &[query], None)
        .await;
    let list = results.get("u1").unwrap().as_ref().unwrap();
    assert_eq!(list.ids().collect::<Vec<_>>(), vec!["c", "b"]);
}

#[tokio::test]
async fn test_recommend_helper() {
    let candidates = ItemList::unordered(["a", "b"]).unwrap();
    let scorer = FixedScorer::new(&[("a", 1.0), ("b", 2.0)]);
    let results = recommend(Arc::new(scorer), &queries(2, &candidates), Some(1)).await;
    assert_eq!(results.n_scored(), 2);
}
