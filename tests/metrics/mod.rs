use indexmap::IndexMap;
use recbench::metrics::*;
use recbench::{Dataset, Interaction, ItemList, MetricError};

fn ranked(items: &[&str]) -> ItemList {
    ItemList::ranked(items.iter().copied()).unwrap()
}

fn set(items: &[&str]) -> ItemList {
    ItemList::unordered(items.iter().copied()).unwrap()
}

fn all_list_metrics() -> Vec<Box<dyn ListMetric>> {
    vec![
        Box::new(Hit::new()),
        Box::new(Precision::new()),
        Box::new(Recall::new()),
        Box::new(RecipRank::new()),
        Box::new(Dcg::new()),
        Box::new(Ndcg::new()),
        Box::new(Rbp::new()),
    ]
}

#[test]
fn test_disjoint_lists_score_zero() {
    let recs = ranked(&["a", "b", "c"]);
    let test = set(&["x", "y"]);
    for metric in all_list_metrics() {
        assert_eq!(metric.measure_list(&recs, &test).unwrap(), 0.0, "{}", metric.label());
    }
}

#[test]
fn test_empty_reference_scores_zero() {
    let recs = ranked(&["a", "b"]);
    let test = ItemList::empty(false);
    for metric in all_list_metrics() {
        assert_eq!(metric.measure_list(&recs, &test).unwrap(), 0.0, "{}", metric.label());
    }
}

#[test]
fn test_empty_recommendations_score_zero() {
    let recs = ItemList::empty(true);
    let test = set(&["a"]);
    for metric in all_list_metrics() {
        assert_eq!(metric.measure_list(&recs, &test).unwrap(), 0.0, "{}", metric.label());
    }
}

#[test]
fn test_perfect_ranking() {
    let recs = ranked(&["a", "b", "c"]);
    let test = set(&["a", "b", "c"]);
    assert_eq!(Ndcg::new().measure_list(&recs, &test).unwrap(), 1.0);
    assert_eq!(Precision::new().measure_list(&recs, &test).unwrap(), 1.0);
    assert_eq!(Recall::new().measure_list(&recs, &test).unwrap(), 1.0);
    let rbp = Rbp::new().normalized().measure_list(&recs, &test).unwrap();
    assert!((rbp - 1.0).abs() < 1e-12);
}

#[test]
fn test_ndcg_bounded() {
    let test = set(&["b", "d", "f"]);
    let lists = [
        ranked(&["a", "b", "c", "d"]),
        ranked(&["f", "a"]),
        ranked(&["d", "b", "f", "x", "y"]),
        ranked(&["z"]),
    ];
    for recs in &lists {
        for k in 1..=5 {
            let v = Ndcg::at(k).measure_list(recs, &test).unwrap();
            assert!((0.0..=1.0).contains(&v), "NDCG@{} = {}", k, v);
        }
    }
}

#[test]
fn test_truncation_at_length_is_identity() {
    let recs = ranked(&["a", "b", "c"]);
    let test = set(&["c"]);
    assert_eq!(
        Precision::at(3).measure_list(&recs, &test).unwrap(),
        Precision::new().measure_list(&recs, &test).unwrap()
    );
    assert_eq!(recs.top_k(3).unwrap(), recs);
}

#[test]
fn test_unordered_with_k_is_rejected() {
    let recs = set(&["a", "b", "c"]);
    let test = set(&["a"]);
    let err = Hit::at(2).measure_list(&recs, &test).unwrap_err();
    assert!(matches!(err, MetricError::Unordered { .. }));
    // membership metrics without k accept unordered lists
    assert_eq!(Hit::new().measure_list(&recs, &test).unwrap(), 1.0);
    assert!(RecipRank::new().measure_list(&recs, &test).is_err());
}

#[test]
fn test_graded_ndcg() {
    let recs = ranked(&["b", "a"]);
    let test = ItemList::scored([("a", 3.0), ("b", 1.0)]).unwrap();
    let graded = Ndcg::new().graded().measure_list(&recs, &test).unwrap();
    let binary = Ndcg::new().measure_list(&recs, &test).unwrap();
    assert!(graded < 1.0);
    assert_eq!(binary, 1.0);

    // graded gain without reference scores has no value
    assert!(matches!(
        Ndcg::new().graded().measure_list(&recs, &set(&["a"])),
        Err(MetricError::Undefined { .. })
    ));
}

#[test]
fn test_rbp_patience_validated() {
    let recs = ranked(&["a"]);
    let test = set(&["a"]);
    assert!(matches!(
        Rbp::new().patience(1.5).measure_list(&recs, &test),
        Err(MetricError::InvalidParameter(_))
    ));
    let v = Rbp::new().patience(0.5).measure_list(&recs, &test).unwrap();
    assert!((v - 0.5).abs() < 1e-12);
}

#[test]
fn test_labels() {
    assert_eq!(Hit::at(10).label(), "Hit@10");
    assert_eq!(Ndcg::new().label(), "NDCG");
    assert_eq!(Metric::global(ItemCoverage::new(["a"])).label(), "ItemCoverage");
}

#[test]
fn test_run_analysis_with_popularity() {
    let train = Dataset::new(vec![
        Interaction::new("u1", "a"),
        Interaction::new("u2", "a"),
        Interaction::new("u2", "b"),
        Interaction::new("u3", "c"),
    ]);
    let analysis = RunAnalysis::new()
        .add_metric(Metric::list(Recall::at(1)))
        .add_metric(Metric::list(MeanPopRank::from_dataset(&train)))
        .add_metric(Metric::global(ItemCoverage::from_dataset(&train)));

    let mut recs = IndexMap::new();
    recs.insert("u1".to_string(), ranked(&["b", "c"]));
    recs.insert("u3".to_string(), ItemList::empty(true));
    let mut tests = IndexMap::new();
    tests.insert("u1".to_string(), set(&["c"]));
    tests.insert("u3".to_string(), set(&["a"]));

    let result = analysis.measure(&recs, &tests);
    let summary = result.summary();
    assert_eq!(summary["Recall@1"].mean, Some(0.0));
    assert_eq!(summary["Recall@1"].count, 2);
    // u3's empty list has no popularity rank
    assert_eq!(summary["MeanPopRank"].count, 1);
    assert_eq!(summary["MeanPopRank"].missing, 1);
    assert_eq!(summary["MeanPopRank"].mean, Some(2.5));
    assert!((summary["ItemCoverage"].mean.unwrap() - 2.0 / 3.0).abs() < 1e-12);
}
