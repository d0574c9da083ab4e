#[path = "../common/mod.rs"]
mod common;

use common::{small_split, BrokenTrainer, CountingScorer, FlakyScorer};
use recbench::basic::{PopScorer, RandomScorer};
use recbench::experiment::{Stage, SummaryRow};
use recbench::metrics::{Hit, ItemCoverage, Metric, Ndcg, Precision};
use recbench::sink::RowKind;
use recbench::*;
use std::time::Duration;

fn algorithms() -> Vec<AlgorithmSpec> {
    vec![
        AlgorithmSpec::new("pop", || Box::new(PopScorer::new())),
        AlgorithmSpec::new("random", || Box::new(RandomScorer::new(7))),
    ]
}

fn run_config() -> RunConfig {
    let split = small_split("fold-0");
    let coverage = ItemCoverage::from_dataset(&split.train);
    let mut run = RunConfig::new()
        .split(split)
        .split(small_split("fold-1"))
        .metric(Metric::list(Hit::at(5)))
        .metric(Metric::list(Ndcg::at(5)))
        .metric(Metric::global(coverage))
        .n(5);
    for algorithm in algorithms() {
        run = run.algorithm(algorithm);
    }
    run
}

fn evaluator(config: EngineConfig) -> Evaluator {
    Evaluator::new(config).unwrap()
}

#[tokio::test]
async fn test_every_config_evaluated() {
    let sink = MemorySink::new();
    let eval = evaluator(EngineConfig::default().max_concurrency(4));
    let report = eval.run(run_config(), sink.clone()).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.configs.len(), 4);
    for config in &report.configs {
        assert_eq!(config.n_queries, 10);
        assert_eq!(config.n_scored, 10);
        assert_eq!(config.state, ConfigState::Aggregated);
    }

    // 2 list metrics x 10 queries + 1 global, per config
    let rows = sink.rows();
    assert_eq!(rows.len(), 4 * 21);
    assert_eq!(report.rows_written, rows.len());
    assert_eq!(
        rows.iter().filter(|r| r.kind() == RowKind::GlobalMetric).count(),
        4
    );

    // 3 metrics per config
    assert_eq!(report.summary.len(), 12);
    let hits: Vec<&SummaryRow> = report.metric_rows("Hit@5").collect();
    assert_eq!(hits.len(), 4);
    assert!(hits.iter().all(|r| r.summary.count == 10));

    let status = eval.status();
    assert_eq!(status.len(), 4);
    assert!(status.iter().all(|(_, s)| *s == ConfigState::Aggregated));
}

#[tokio::test]
async fn test_failing_algorithm_isolated() {
    let run = run_config().algorithm(AlgorithmSpec::new("broken", || Box::new(BrokenTrainer)));
    let sink = MemorySink::new();
    let report = evaluator(EngineConfig::default())
        .run(run, sink.clone())
        .await
        .unwrap();

    assert_eq!(report.configs.len(), 6);
    let failed = report.failed_configs();
    assert_eq!(failed.len(), 2);
    for config in failed {
        assert_eq!(config.key.algorithm, "broken");
        assert!(matches!(
            config.state,
            ConfigState::Failed {
                stage: Stage::Training,
                ..
            }
        ));
        assert!(config.summary.is_empty());
    }

    let config_failures: Vec<_> = sink
        .rows()
        .into_iter()
        .filter(|r| r.kind() == RowKind::ConfigFailure)
        .collect();
    assert_eq!(config_failures.len(), 2);
    assert!(config_failures[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("model diverged"));

    let ok = report.config(&ConfigKey::new("pop", "fold-1")).unwrap();
    assert_eq!(ok.state, ConfigState::Aggregated);
}

#[tokio::test]
async fn test_failed_queries_reported_as_rows() {
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("flaky", || {
            Box::new(FlakyScorer::failing(&["u2", "u5"]))
        }))
        .split(small_split("fold-0"))
        .metric(Metric::list(Precision::at(3)))
        .n(3);
    let sink = MemorySink::new();
    let report = evaluator(EngineConfig::default())
        .run(run, sink.clone())
        .await
        .unwrap();

    let config = &report.configs[0];
    assert_eq!(config.n_failed, 2);
    assert_eq!(config.n_scored, 8);
    assert_eq!(config.summary["Precision@3"].count, 8);

    let failures: Vec<_> = sink
        .rows()
        .into_iter()
        .filter(|r| r.kind() == RowKind::QueryFailure)
        .map(|r| r.query.unwrap_or_default())
        .collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.contains(&"u2".to_string()));
    assert!(failures.contains(&"u5".to_string()));
}

#[tokio::test]
async fn test_ordered_output_follows_test_order() {
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("pop", || Box::new(PopScorer::new())))
        .split(small_split("fold-0"))
        .metric(Metric::list(Hit::new()))
        .n(3);
    let sink = MemorySink::new();
    let config = EngineConfig::default().max_concurrency(8).ordered_output(true);
    evaluator(config).run(run, sink.clone()).await.unwrap();

    let order: Vec<String> = sink.rows().into_iter().filter_map(|r| r.query).collect();
    let expected: Vec<String> = (0..10).map(|u| format!("u{}", u)).collect();
    assert_eq!(order, expected);
}

#[tokio::test]
async fn test_ordered_output_places_failures_in_order() {
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("flaky", || Box::new(FlakyScorer::failing(&["u5"]))))
        .split(small_split("fold-0"))
        .metric(Metric::list(Hit::new()))
        .n(3);
    let sink = MemorySink::new();
    let config = EngineConfig::default().max_concurrency(4).ordered_output(true);
    evaluator(config).run(run, sink.clone()).await.unwrap();

    let rows = sink.rows();
    let order: Vec<String> = rows.iter().filter_map(|r| r.query.clone()).collect();
    let expected: Vec<String> = (0..10).map(|u| format!("u{}", u)).collect();
    assert_eq!(order, expected);
    assert_eq!(rows[5].kind(), RowKind::QueryFailure);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_configs_share_scoring_budget() {
    let scorer = CountingScorer::sleeping(Duration::from_millis(10));
    let mut run = RunConfig::new()
        .split(small_split("fold-0"))
        .split(small_split("fold-1"))
        .metric(Metric::list(Hit::new()));
    for id in ["a", "b"] {
        let scorer = scorer.clone();
        run = run.algorithm(AlgorithmSpec::new(id, move || Box::new(scorer.clone())));
    }
    let config = EngineConfig::default()
        .max_concurrency(2)
        .max_concurrent_configs(4);
    let report = evaluator(config).run(run, MemorySink::new()).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.configs.iter().map(|c| c.n_scored).sum::<usize>(), 40);
    // four configurations at once, never more than two scoring calls
    assert!(scorer.peak() <= 2, "peak = {}", scorer.peak());
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_finished_rows() {
    let scorer = CountingScorer::sleeping(Duration::from_millis(60));
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("slow", move || Box::new(scorer.clone())))
        .split(small_split("fold-0"))
        .metric(Metric::list(Hit::new()));
    let eval = evaluator(EngineConfig::default().max_concurrency(1));
    let token = eval.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
    });
    let sink = MemorySink::new();
    let report = eval.run(run, sink.clone()).await.unwrap();

    assert!(report.cancelled);
    let config = &report.configs[0];
    assert!(matches!(
        config.state,
        ConfigState::Failed {
            stage: Stage::Scoring,
            ..
        }
    ));
    assert!(config.n_scored > 0);
    assert!(config.n_failed > 0);
    assert_eq!(config.n_scored + config.n_failed, 10);

    let rows = sink.rows();
    for u in 0..10 {
        let user = format!("u{}", u);
        let count = rows.iter().filter(|r| r.query.as_deref() == Some(user.as_str())).count();
        assert_eq!(count, 1, "rows for {}", user);
    }
    let scored = rows.iter().filter(|r| r.kind() == RowKind::ListMetric).count();
    assert_eq!(scored, config.n_scored);
    assert_eq!(
        rows.iter().filter(|r| r.kind() == RowKind::ConfigFailure).count(),
        1
    );
}

#[tokio::test]
async fn test_invalid_run_fails_fast() {
    let sink = MemorySink::new();
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("pop", || Box::new(PopScorer::new())))
        .split(small_split("fold-0"));
    let result = evaluator(EngineConfig::default()).run(run, sink.clone()).await;
    assert!(matches!(result, Err(EvalError::InvalidRunConfig(_))));
    assert!(sink.rows().is_empty());
}

#[tokio::test]
async fn test_cancelled_run() {
    let eval = evaluator(EngineConfig::default());
    eval.cancel();
    let report = eval.run(run_config(), MemorySink::new()).await.unwrap();
    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert_eq!(report.failed_configs().len(), 4);
}

#[tokio::test]
async fn test_query_timeout_from_config() {
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("slow", || {
            Box::new(FlakyScorer::hanging(&["u4"], Duration::from_millis(400)))
        }))
        .split(small_split("fold-0"))
        .metric(Metric::list(Hit::new()));
    let config = EngineConfig::default().query_timeout_secs(0.05);
    let sink = MemorySink::new();
    let report = evaluator(config).run(run, sink.clone()).await.unwrap();

    assert_eq!(report.configs[0].n_failed, 1);
    let row = sink
        .rows()
        .into_iter()
        .find(|r| r.kind() == RowKind::QueryFailure)
        .unwrap();
    assert_eq!(row.query.as_deref(), Some("u4"));
    assert!(row.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_csv_sink_receives_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");
    let sink = CsvSink::create(&path).unwrap();
    let run = RunConfig::new()
        .algorithm(AlgorithmSpec::new("pop", || Box::new(PopScorer::new())))
        .split(small_split("fold-0"))
        .metric(Metric::list(Hit::at(2)))
        .n(2);
    let report = evaluator(EngineConfig::default()).run(run, sink).await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    // header plus one row per query
    assert_eq!(text.lines().count(), 11);
    assert_eq!(report.rows_written, 10);
    assert_eq!(report.sink_errors, 0);
}

#[tokio::test]
async fn test_run_report_serializes() {
    let report = evaluator(EngineConfig::default().max_concurrency(2))
        .run(run_config(), MemorySink::new())
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["configs"].as_array().unwrap().len(), 4);
    assert!(json["run_id"].is_string());
}
