use chrono::NaiveDate;
use paddock_core::config::PipelineConfig;
use paddock_core::context::Services;
use paddock_core::engine::{DagRunner, RunRequest, Trigger};
use paddock_core::model::{EntityKind, RaceStatus, TaskState};
use paddock_core::pipelines::{self, Pipeline};
use paddock_core::providers::http::fake::{FakeReply, FakeTransport};
use paddock_core::retry::RetryPolicy;
use paddock_core::storage::Store;
use std::sync::Arc;

const CALENDAR_2025: &str = r#"{"races":[
  {"season":2025,"round":1,"name":"Bahrain Grand Prix","date":"2025-03-02","status":"completed",
   "circuit":{"id":"bahrain","name":"Bahrain International Circuit","lat":26.03,"lon":50.51}},
  {"season":2025,"round":2,"name":"Saudi Arabian Grand Prix","date":"2025-03-09","status":"completed",
   "circuit":{"id":"jeddah","name":"Jeddah Corniche Circuit","lat":21.63,"lon":39.10}},
  {"season":2025,"round":3,"name":"Canadian Grand Prix","date":"2025-06-08","status":"scheduled",
   "circuit":{"id":"villeneuve","name":"Circuit Gilles Villeneuve","lat":45.50,"lon":-73.52}}
]}"#;

const ROUND_1_JSON: &str = r#"{"season":2025,"round":1,"status":"completed","results":[
  {"driver_id":"alpha","team_id":"red","position":1,"points":25},
  {"driver_id":"bravo","team_id":"blue","position":2,"points":18},
  {"driver_id":"charlie","team_id":"red","position":3,"points":15}
]}"#;

const ROUND_2_CSV: &str = "driver_id,team_id,position,points\n\
bravo,blue,1,25\n\
alpha,red,2,18\n\
charlie,red,DNF,0\n";

const ROUND_3_JSON: &str = r#"{"season":2025,"round":3,"status":"completed","results":[
  {"driver_id":"bravo","team_id":"blue","position":1,"points":25},
  {"driver_id":"alpha","team_id":"red","position":2,"points":18},
  {"driver_id":"charlie","team_id":"red","position":3,"points":15}
]}"#;

const FORECAST: &str =
    r#"{"temperature_c":24.5,"precipitation_mm":0.0,"wind_kph":12.0,"humidity_pct":55.0}"#;

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn fast_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.retry = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 1,
        multiplier: 1.0,
        max_delay_ms: 1,
        jitter: 0.0,
    };
    cfg.api.max_retries = 2;
    cfg.api.backoff.base_delay_ms = 1;
    cfg.api.backoff.max_delay_ms = 1;
    cfg.api.backoff.jitter = 0.0;
    cfg
}

fn season_feed() -> Arc<FakeTransport> {
    let fake = Arc::new(FakeTransport::new());
    fake.on_query("races", &[("season", "2025")], FakeReply::ok(CALENDAR_2025))
        .on_query("results", &[("round", "1")], FakeReply::ok(ROUND_1_JSON))
        .on_query("results", &[("round", "2")], FakeReply::ok(ROUND_2_CSV))
        .on("forecast", FakeReply::ok(FORECAST));
    fake
}

fn services(fake: Arc<FakeTransport>) -> anyhow::Result<Services> {
    let store = Store::memory()?;
    store.init_schema()?;
    Ok(Services::new(store, fast_config(), fake))
}

fn driver_rating_sum(store: &Store) -> anyhow::Result<f64> {
    Ok(store
        .ratings(EntityKind::Driver)?
        .iter()
        .map(|r| r.value)
        .sum())
}

#[tokio::test]
async fn in_season_ingestion_runs_end_to_end() -> anyhow::Result<()> {
    let fake = season_feed();
    let svc = services(fake.clone())?;
    let graph = pipelines::ingestion()?;

    let report = DagRunner::new(svc.clone())
        .run(&graph, RunRequest::new(Trigger::Manual, day("2025-06-03")))
        .await?;
    assert!(report.succeeded(), "failed: {:?}", report.failed_tasks());

    let store = &svc.store;
    let races = store.list_races(2025)?;
    assert_eq!(races.len(), 3);
    assert_eq!(races[0].status, RaceStatus::Completed);
    assert_eq!(races[1].status, RaceStatus::Completed);
    assert_eq!(races[2].status, RaceStatus::Scheduled);
    assert!(races[0].ratings_applied && races[1].ratings_applied);

    let r2_results = store.results_for_race(races[1].id)?;
    let charlie = r2_results.iter().find(|r| r.driver_id == "charlie").unwrap();
    assert_eq!(charlie.finishing_position, None);

    // Pairwise Elo is zero-sum and nobody is near the floor.
    assert!((driver_rating_sum(store)? - 4500.0).abs() < 1e-6);
    let drivers = store.rating_values(EntityKind::Driver)?;
    assert!(drivers["bravo"] > 1500.0);
    assert!(drivers["charlie"] < 1500.0);
    assert_eq!(store.ratings(EntityKind::Team)?.len(), 2);

    let preds = store.predictions_for_race(races[2].id, "elo-v1")?;
    assert_eq!(preds.len(), 3);
    let total: f64 = preds.iter().map(|p| p.win_probability).sum();
    assert!((total - 100.0).abs() < 1e-9, "sum was {}", total);

    let weather = store.weather_for_race(races[2].id)?.unwrap();
    assert_eq!(weather.temperature_c, Some(24.5));
    assert_eq!(weather.observed_for, day("2025-06-08"));

    let validation = report.task(pipelines::VALIDATE_PREDICTIONS).unwrap();
    assert_eq!(validation.state, TaskState::Succeeded);
    assert!(store.count_rows("validation_results")? > 0);
    Ok(())
}

const ROUND_2_PROVISIONAL: &str = r#"{"season":2025,"round":2,"status":"scheduled","results":[
  {"driver_id":"charlie","team_id":"red","position":1,"points":25},
  {"driver_id":"alpha","team_id":"red","position":2,"points":18},
  {"driver_id":"bravo","team_id":"blue","position":3,"points":15}
]}"#;

#[tokio::test]
async fn non_final_results_leave_the_race_untouched() -> anyhow::Result<()> {
    let provisional = Arc::new(FakeTransport::new());
    provisional
        .on_query("races", &[("season", "2025")], FakeReply::ok(CALENDAR_2025))
        .on_query("results", &[("round", "1")], FakeReply::ok(ROUND_1_JSON))
        .on_query("results", &[("round", "2")], FakeReply::ok(ROUND_2_PROVISIONAL))
        .on("forecast", FakeReply::ok(FORECAST));
    let svc = services(provisional.clone())?;

    // Round 2 ran yesterday; the feed still reports it as scheduled.
    let report = DagRunner::new(svc.clone())
        .run(
            &pipelines::ingestion()?,
            RunRequest::new(Trigger::Manual, day("2025-03-10")),
        )
        .await?;
    assert!(report.succeeded(), "failed: {:?}", report.failed_tasks());
    let output = report.task(pipelines::INGEST_RESULTS).unwrap().output.clone();
    assert_eq!(
        output.as_deref(),
        Some("completed 1 race(s), 1 awaiting final results")
    );
    assert_eq!(provisional.call_count("results"), 2);

    let store = &svc.store;
    let r2 = store.race_by_round(2025, 2)?.unwrap();
    assert_eq!(r2.status, RaceStatus::Scheduled);
    assert!(!r2.ratings_applied);
    assert!(store.results_for_race(r2.id)?.is_empty());
    assert_eq!(store.count_rows("race_results")?, 3);

    // Ratings reflect round 1 only, same as a run before round 2 was due.
    let baseline = services(season_feed())?;
    DagRunner::new(baseline.clone())
        .run(
            &pipelines::ingestion()?,
            RunRequest::new(Trigger::Manual, day("2025-03-05")),
        )
        .await?;
    assert_eq!(
        store.rating_values(EntityKind::Driver)?,
        baseline.store.rating_values(EntityKind::Driver)?
    );
    assert_eq!(
        store.rating_values(EntityKind::Team)?,
        baseline.store.rating_values(EntityKind::Team)?
    );
    Ok(())
}

#[tokio::test]
async fn rerunning_does_not_double_apply_ratings() -> anyhow::Result<()> {
    let svc = services(season_feed())?;
    let graph = pipelines::ingestion()?;
    let runner = DagRunner::new(svc.clone());

    runner
        .run(&graph, RunRequest::new(Trigger::Manual, day("2025-06-03")))
        .await?;
    let first = svc.store.rating_values(EntityKind::Driver)?;
    let results_before = svc.store.count_rows("race_results")?;

    let again = runner
        .run(&graph, RunRequest::new(Trigger::Cron, day("2025-06-03")))
        .await?;
    assert!(again.succeeded());
    assert_eq!(svc.store.rating_values(EntityKind::Driver)?, first);
    assert_eq!(svc.store.count_rows("race_results")?, results_before);
    assert_eq!(svc.store.count_rows("pipeline_runs")?, 2);
    Ok(())
}

#[tokio::test]
async fn off_season_run_gates_in_season_tasks() -> anyhow::Result<()> {
    let fake = season_feed();
    let svc = services(fake.clone())?;
    let report = DagRunner::new(svc.clone())
        .run(
            &pipelines::ingestion()?,
            RunRequest::new(Trigger::Cron, day("2025-01-15")),
        )
        .await?;

    assert!(report.succeeded());
    for name in [
        pipelines::INGEST_RESULTS,
        pipelines::INGEST_WEATHER,
        pipelines::GENERATE_PREDICTIONS,
    ] {
        let t = report.task(name).unwrap();
        assert!(t.gated, "{} should be gated", name);
        assert_eq!(t.reason.as_deref(), Some("gated: off-season"));
    }
    assert_eq!(
        report.task(pipelines::INGEST_CALENDAR).unwrap().state,
        TaskState::Succeeded
    );
    assert_eq!(fake.call_count("results"), 0);
    assert_eq!(fake.call_count("forecast"), 0);
    Ok(())
}

#[tokio::test]
async fn calendar_client_error_fails_once_and_blocks_downstream() -> anyhow::Result<()> {
    let fake = Arc::new(FakeTransport::new());
    fake.on("races", FakeReply::status(404, "no such season"));
    let svc = services(fake.clone())?;

    let report = DagRunner::new(svc)
        .run(
            &pipelines::ingestion()?,
            RunRequest::new(Trigger::Manual, day("2025-06-03")),
        )
        .await?;

    assert!(!report.succeeded());
    let cal = report.task(pipelines::INGEST_CALENDAR).unwrap();
    assert_eq!(cal.state, TaskState::Failed);
    assert_eq!(cal.attempts, 1);
    assert_eq!(fake.call_count("races"), 1);
    assert_eq!(
        report.task(pipelines::INGEST_RESULTS).unwrap().reason.as_deref(),
        Some("upstream failed: ingest_calendar")
    );
    assert_eq!(
        report.task(pipelines::UPDATE_RATINGS).unwrap().state,
        TaskState::Skipped
    );
    Ok(())
}

#[tokio::test]
async fn server_errors_are_retried_at_both_layers() -> anyhow::Result<()> {
    let fake = Arc::new(FakeTransport::new());
    fake.on("races", FakeReply::status(500, "upstream down"));
    let svc = services(fake.clone())?;

    let report = DagRunner::new(svc)
        .run(
            &pipelines::ingestion()?,
            RunRequest::new(Trigger::Manual, day("2025-06-03")),
        )
        .await?;

    let cal = report.task(pipelines::INGEST_CALENDAR).unwrap();
    assert_eq!(cal.attempts, 2);
    assert!(cal.reason.as_deref().unwrap().contains("exhausted"));
    assert_eq!(fake.call_count("races"), 4);
    Ok(())
}

#[tokio::test]
async fn maintenance_scores_then_retention_purges() -> anyhow::Result<()> {
    let fake = season_feed();
    let svc = services(fake.clone())?;
    let runner = DagRunner::new(svc.clone());
    let ingestion = pipelines::ingestion()?;
    let maintenance = Pipeline::Maintenance.graph()?;

    runner
        .run(&ingestion, RunRequest::new(Trigger::Manual, day("2025-06-03")))
        .await?;
    let r3 = svc.store.race_by_round(2025, 3)?.unwrap();
    assert_eq!(svc.store.predictions_for_race(r3.id, "elo-v1")?.len(), 3);

    fake.on_query("results", &[("round", "3")], FakeReply::ok(ROUND_3_JSON));
    let after_race = runner
        .run(&ingestion, RunRequest::new(Trigger::Manual, day("2025-06-12")))
        .await?;
    assert!(after_race.succeeded(), "{:?}", after_race.failed_tasks());

    let scored = runner
        .run(&maintenance, RunRequest::new(Trigger::Manual, day("2025-06-12")))
        .await?;
    assert!(scored.succeeded());
    let acc = svc.store.accuracy_for_race(r3.id, "elo-v1")?.unwrap();
    assert_eq!(acc.sample_size, 3);
    assert!(acc.brier_score > 0.0 && acc.brier_score < 2.0);
    assert!(acc.log_loss > 0.0);
    // Inside the retention window the predictions survive.
    assert_eq!(svc.store.predictions_for_race(r3.id, "elo-v1")?.len(), 3);

    let later = runner
        .run(&maintenance, RunRequest::new(Trigger::Manual, day("2025-07-20")))
        .await?;
    assert!(later.succeeded());
    assert!(svc.store.predictions_for_race(r3.id, "elo-v1")?.is_empty());
    assert!(svc.store.accuracy_for_race(r3.id, "elo-v1")?.is_some());
    Ok(())
}

#[tokio::test]
async fn backfill_ingests_a_past_season_regardless_of_date() -> anyhow::Result<()> {
    let fake = season_feed();
    fake.on_query("results", &[("round", "3")], FakeReply::ok(ROUND_3_JSON));
    let svc = services(fake.clone())?;
    let report = DagRunner::new(svc.clone())
        .run(
            &pipelines::backfill()?,
            RunRequest::backfill(2025, day("2026-01-20")),
        )
        .await?;

    assert!(report.succeeded(), "{:?}", report.failed_tasks());
    assert!(report.tasks.iter().all(|t| !t.gated));
    assert_eq!(fake.calls()[0].query, vec![("season".to_string(), "2025".to_string())]);
    let races = svc.store.list_races(2025)?;
    assert!(races
        .iter()
        .all(|r| r.status == RaceStatus::Completed && r.ratings_applied));
    assert!(svc.store.weather_for_race(races[0].id)?.is_some());
    Ok(())
}
