use crate::errors::StoreUnavailable;
use crate::model::{
    AccuracyRecord, Circuit, EntityKind, Entry, Prediction, Race, RaceId, RaceResult, RaceStatus,
    RaceUpsert, Rating, RunId, RunStatus, TaskRunRow, TaskState, WeatherObservation,
};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Rating key: (kind, entity id).
pub type RatingKey = (EntityKind, String);

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

const RACE_COLUMNS: &str = "id, season_year, round_number, name, date, circuit_id, status, completed_at, ratings_applied_at";

fn race_from_row(row: &Row<'_>) -> rusqlite::Result<Race> {
    let status: String = row.get(6)?;
    let applied: Option<String> = row.get(8)?;
    Ok(Race {
        id: row.get(0)?,
        season_year: row.get(1)?,
        round_number: row.get(2)?,
        name: row.get(3)?,
        date: row.get(4)?,
        circuit_id: row.get(5)?,
        status: RaceStatus::parse(&status).unwrap_or(RaceStatus::Scheduled),
        completed_at: row.get(7)?,
        ratings_applied: applied.is_some(),
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<RaceResult> {
    Ok(RaceResult {
        race_id: row.get(0)?,
        driver_id: row.get(1)?,
        team_id: row.get(2)?,
        finishing_position: row.get(3)?,
        points: row.get(4)?,
    })
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreUnavailable("connection mutex poisoned".into()).into())
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    /// Cheap liveness probe used by the runner before starting each task.
    pub fn ping(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .context("store ping")?;
        Ok(())
    }

    // --- circuits & calendar ---

    pub fn upsert_circuit(&self, c: &Circuit) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO circuits (id, name, locality, country, lat, lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name,
                locality=COALESCE(excluded.locality, circuits.locality),
                country=COALESCE(excluded.country, circuits.country),
                lat=COALESCE(excluded.lat, circuits.lat),
                lon=COALESCE(excluded.lon, circuits.lon)",
            params![c.id, c.name, c.locality, c.country, c.lat, c.lon],
        )
        .context("upsert circuit")?;
        Ok(())
    }

    pub fn get_circuit(&self, id: &str) -> anyhow::Result<Option<Circuit>> {
        let conn = self.lock()?;
        let c = conn
            .query_row(
                "SELECT id, name, locality, country, lat, lon FROM circuits WHERE id = ?1",
                params![id],
                |r| {
                    Ok(Circuit {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        locality: r.get(2)?,
                        country: r.get(3)?,
                        lat: r.get(4)?,
                        lon: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(c)
    }

    /// Upserts a calendar entry by (season, round) and returns its local id.
    ///
    /// A race already marked `completed` keeps that status; only the results
    /// ingestor may complete a race, so an incoming `completed` is stored as
    /// `scheduled` until results land.
    pub fn upsert_race(&self, r: &RaceUpsert) -> anyhow::Result<RaceId> {
        let incoming = match r.status {
            RaceStatus::Cancelled => RaceStatus::Cancelled,
            _ => RaceStatus::Scheduled,
        };
        let conn = self.lock()?;
        let id = conn
            .query_row(
                "INSERT INTO races (season_year, round_number, name, date, circuit_id, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(season_year, round_number) DO UPDATE SET
                    name=excluded.name,
                    date=excluded.date,
                    circuit_id=excluded.circuit_id,
                    status=CASE WHEN races.status = 'completed' THEN races.status ELSE excluded.status END
                 RETURNING id",
                params![
                    r.season_year,
                    r.round_number,
                    r.name,
                    r.date,
                    r.circuit_id,
                    incoming.as_str()
                ],
                |row| row.get(0),
            )
            .context("upsert race")?;
        Ok(id)
    }

    pub fn get_race(&self, id: RaceId) -> anyhow::Result<Option<Race>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RACE_COLUMNS} FROM races WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], race_from_row).optional()?)
    }

    pub fn race_by_round(&self, season: i32, round: u32) -> anyhow::Result<Option<Race>> {
        let conn = self.lock()?;
        let sql =
            format!("SELECT {RACE_COLUMNS} FROM races WHERE season_year = ?1 AND round_number = ?2");
        Ok(conn
            .query_row(&sql, params![season, round], race_from_row)
            .optional()?)
    }

    fn query_races(&self, filter: &str, args: &[&dyn ToSql]) -> anyhow::Result<Vec<Race>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RACE_COLUMNS} FROM races WHERE {filter} ORDER BY season_year ASC, round_number ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, race_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_races(&self, season: i32) -> anyhow::Result<Vec<Race>> {
        self.query_races("season_year = ?1", &[&season])
    }

    /// Scheduled races on or before `as_of`, optionally restricted to a season.
    pub fn races_awaiting_results(
        &self,
        as_of: NaiveDate,
        season: Option<i32>,
    ) -> anyhow::Result<Vec<Race>> {
        self.query_races(
            "status = 'scheduled' AND date <= ?1 AND (?2 IS NULL OR season_year = ?2)",
            &[&as_of, &season],
        )
    }

    /// Scheduled races on or after `as_of`.
    pub fn upcoming_races(&self, as_of: NaiveDate, season: Option<i32>) -> anyhow::Result<Vec<Race>> {
        self.query_races(
            "status = 'scheduled' AND date >= ?1 AND (?2 IS NULL OR season_year = ?2)",
            &[&as_of, &season],
        )
    }

    /// Completed races whose ratings have not been applied, oldest first.
    pub fn races_pending_ratings(&self) -> anyhow::Result<Vec<Race>> {
        self.query_races("status = 'completed' AND ratings_applied_at IS NULL", &[])
    }

    // --- results ---

    /// Writes a race's results and marks it completed, atomically.
    ///
    /// Returns `false` without writing if the race is already completed.
    /// Existing result rows are never overwritten.
    pub fn complete_race(&self, race_id: RaceId, results: &[RaceResult]) -> anyhow::Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let status: Option<String> = tx
            .query_row("SELECT status FROM races WHERE id = ?1", params![race_id], |r| {
                r.get(0)
            })
            .optional()?;
        match status.as_deref() {
            None => anyhow::bail!("race {} does not exist", race_id),
            Some("completed") => return Ok(false),
            Some(_) => {}
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO race_results (race_id, driver_id, team_id, finishing_position, points)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(race_id, driver_id) DO NOTHING",
            )?;
            for r in results {
                stmt.execute(params![
                    race_id,
                    r.driver_id,
                    r.team_id,
                    r.finishing_position,
                    r.points
                ])
                .context("insert race result")?;
            }
        }

        tx.execute(
            "UPDATE races SET status = 'completed', completed_at = ?1 WHERE id = ?2",
            params![Utc::now(), race_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn results_for_race(&self, race_id: RaceId) -> anyhow::Result<Vec<RaceResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT race_id, driver_id, team_id, finishing_position, points
             FROM race_results WHERE race_id = ?1
             ORDER BY finishing_position IS NULL, finishing_position ASC, driver_id ASC",
        )?;
        let rows = stmt
            .query_map(params![race_id], result_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Entry list of the latest completed race strictly before
    /// (`season`, `round`) that has results.
    pub fn latest_entry_list(&self, season: i32, round: u32) -> anyhow::Result<Vec<Entry>> {
        let conn = self.lock()?;
        let source: Option<RaceId> = conn
            .query_row(
                "SELECT r.id FROM races r
                 WHERE r.status = 'completed'
                   AND (r.season_year < ?1 OR (r.season_year = ?1 AND r.round_number < ?2))
                   AND EXISTS (SELECT 1 FROM race_results rr WHERE rr.race_id = r.id)
                 ORDER BY r.season_year DESC, r.round_number DESC
                 LIMIT 1",
                params![season, round],
                |r| r.get(0),
            )
            .optional()?;
        let Some(race_id) = source else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            "SELECT driver_id, team_id FROM race_results WHERE race_id = ?1 ORDER BY driver_id",
        )?;
        let entries = stmt
            .query_map(params![race_id], |r| {
                Ok(Entry {
                    driver_id: r.get(0)?,
                    team_id: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- ratings ---

    pub fn ratings(&self, kind: EntityKind) -> anyhow::Result<Vec<Rating>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, value, updated_at FROM ratings
             WHERE entity_kind = ?1 ORDER BY value DESC, entity_id ASC",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], |r| {
                Ok(Rating {
                    entity_id: r.get(0)?,
                    entity_kind: kind,
                    value: r.get(1)?,
                    updated_at: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn rating_values(&self, kind: EntityKind) -> anyhow::Result<HashMap<String, f64>> {
        Ok(self
            .ratings(kind)?
            .into_iter()
            .map(|r| (r.entity_id, r.value))
            .collect())
    }

    /// Applies a race's rating update exactly once.
    ///
    /// Inside a single transaction: checks the race's `ratings_applied`
    /// marker, hands the race results and the current (pre-race) ratings to
    /// `compute`, upserts whatever it returns, and sets the marker. Returns
    /// `false` and writes nothing if the marker was already set.
    pub fn apply_race_ratings<F>(&self, race_id: RaceId, compute: F) -> anyhow::Result<bool>
    where
        F: FnOnce(&[RaceResult], &HashMap<RatingKey, f64>) -> Vec<(RatingKey, f64)>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let applied: Option<Option<String>> = tx
            .query_row(
                "SELECT ratings_applied_at FROM races WHERE id = ?1 AND status = 'completed'",
                params![race_id],
                |r| r.get(0),
            )
            .optional()?;
        match applied {
            None => anyhow::bail!("race {} is not completed", race_id),
            Some(Some(_)) => return Ok(false),
            Some(None) => {}
        }

        let results = {
            let mut stmt = tx.prepare(
                "SELECT race_id, driver_id, team_id, finishing_position, points
                 FROM race_results WHERE race_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![race_id], result_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let current = {
            let mut stmt = tx.prepare("SELECT entity_kind, entity_id, value FROM ratings")?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .filter_map(|(k, id, v)| EntityKind::parse(&k).map(|k| ((k, id), v)))
                .collect::<HashMap<_, _>>()
        };

        let updates = compute(&results, &current);
        let now = Utc::now();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO ratings (entity_kind, entity_id, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                    value=excluded.value, updated_at=excluded.updated_at",
            )?;
            for ((kind, id), value) in &updates {
                stmt.execute(params![kind.as_str(), id, value, now])?;
            }
        }
        tx.execute(
            "UPDATE races SET ratings_applied_at = ?1 WHERE id = ?2",
            params![now, race_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    // --- predictions ---

    /// Replaces every prediction of (`race_id`, `model_version`) with `rows`.
    pub fn replace_predictions(
        &self,
        race_id: RaceId,
        model_version: &str,
        rows: &[(String, f64)],
        generated_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM predictions WHERE race_id = ?1 AND model_version = ?2",
            params![race_id, model_version],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO predictions (race_id, driver_id, model_version, win_probability, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(race_id, driver_id, model_version) DO UPDATE SET
                    win_probability=excluded.win_probability, generated_at=excluded.generated_at",
            )?;
            for (driver_id, p) in rows {
                stmt.execute(params![race_id, driver_id, model_version, p, generated_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn predictions_for_race(
        &self,
        race_id: RaceId,
        model_version: &str,
    ) -> anyhow::Result<Vec<Prediction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT race_id, driver_id, model_version, win_probability, generated_at
             FROM predictions WHERE race_id = ?1 AND model_version = ?2
             ORDER BY win_probability DESC, driver_id ASC",
        )?;
        let rows = stmt
            .query_map(params![race_id, model_version], |r| {
                Ok(Prediction {
                    race_id: r.get(0)?,
                    driver_id: r.get(1)?,
                    model_version: r.get(2)?,
                    win_probability: r.get(3)?,
                    generated_at: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- accuracy & retention ---

    /// Completed races with predictions for `model_version` but no accuracy row.
    pub fn races_pending_accuracy(&self, model_version: &str) -> anyhow::Result<Vec<Race>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {RACE_COLUMNS} FROM races r
             WHERE r.status = 'completed'
               AND EXISTS (SELECT 1 FROM predictions p WHERE p.race_id = r.id AND p.model_version = ?1)
               AND NOT EXISTS (SELECT 1 FROM prediction_accuracy a WHERE a.race_id = r.id AND a.model_version = ?1)
             ORDER BY r.season_year, r.round_number"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![model_version], race_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_accuracy(&self, rec: &AccuracyRecord) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO prediction_accuracy (race_id, model_version, brier_score, log_loss, sample_size, evaluated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(race_id, model_version) DO UPDATE SET
                brier_score=excluded.brier_score, log_loss=excluded.log_loss,
                sample_size=excluded.sample_size, evaluated_at=excluded.evaluated_at",
            params![
                rec.race_id,
                rec.model_version,
                rec.brier_score,
                rec.log_loss,
                rec.sample_size,
                rec.evaluated_at
            ],
        )?;
        Ok(())
    }

    pub fn accuracy_for_race(
        &self,
        race_id: RaceId,
        model_version: &str,
    ) -> anyhow::Result<Option<AccuracyRecord>> {
        let conn = self.lock()?;
        let rec = conn
            .query_row(
                "SELECT race_id, model_version, brier_score, log_loss, sample_size, evaluated_at
                 FROM prediction_accuracy WHERE race_id = ?1 AND model_version = ?2",
                params![race_id, model_version],
                |r| {
                    Ok(AccuracyRecord {
                        race_id: r.get(0)?,
                        model_version: r.get(1)?,
                        brier_score: r.get(2)?,
                        log_loss: r.get(3)?,
                        sample_size: r.get(4)?,
                        evaluated_at: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(rec)
    }

    /// Deletes predictions of races dated before `cutoff` that accuracy
    /// evaluation will never read. Kept rows: races without a final outcome
    /// yet, and `model_version` rows of completed races that have a winner
    /// but no accuracy row. Returns the number of rows removed.
    pub fn purge_predictions_before(
        &self,
        cutoff: NaiveDate,
        model_version: &str,
    ) -> anyhow::Result<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM predictions
             WHERE EXISTS (
                SELECT 1 FROM races r
                WHERE r.id = predictions.race_id
                  AND r.date < ?1
                  AND (
                    r.status = 'cancelled'
                    OR (r.status = 'completed' AND (
                        predictions.model_version <> ?2
                        OR NOT EXISTS (
                            SELECT 1 FROM race_results rr
                            WHERE rr.race_id = r.id AND rr.finishing_position = 1)
                        OR EXISTS (
                            SELECT 1 FROM prediction_accuracy a
                            WHERE a.race_id = r.id AND a.model_version = predictions.model_version)))
                  )
             )",
            params![cutoff, model_version],
        )?;
        Ok(n)
    }

    /// Predictions past the cutoff that are kept because the accuracy
    /// evaluator can still score them.
    pub fn count_predictions_awaiting_accuracy(
        &self,
        cutoff: NaiveDate,
        model_version: &str,
    ) -> anyhow::Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions p
             JOIN races r ON r.id = p.race_id
             WHERE r.date < ?1 AND r.status = 'completed' AND p.model_version = ?2
               AND EXISTS (SELECT 1 FROM race_results rr
                           WHERE rr.race_id = r.id AND rr.finishing_position = 1)
               AND NOT EXISTS (SELECT 1 FROM prediction_accuracy a
                               WHERE a.race_id = r.id AND a.model_version = p.model_version)",
            params![cutoff, model_version],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    // --- weather ---

    pub fn upsert_weather(&self, w: &WeatherObservation) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO race_weather (race_id, observed_for, temperature_c, precipitation_mm, wind_kph, humidity_pct, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(race_id) DO UPDATE SET
                observed_for=excluded.observed_for,
                temperature_c=excluded.temperature_c,
                precipitation_mm=excluded.precipitation_mm,
                wind_kph=excluded.wind_kph,
                humidity_pct=excluded.humidity_pct,
                fetched_at=excluded.fetched_at",
            params![
                w.race_id,
                w.observed_for,
                w.temperature_c,
                w.precipitation_mm,
                w.wind_kph,
                w.humidity_pct,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    pub fn weather_for_race(&self, race_id: RaceId) -> anyhow::Result<Option<WeatherObservation>> {
        let conn = self.lock()?;
        let w = conn
            .query_row(
                "SELECT race_id, observed_for, temperature_c, precipitation_mm, wind_kph, humidity_pct
                 FROM race_weather WHERE race_id = ?1",
                params![race_id],
                |r| {
                    Ok(WeatherObservation {
                        race_id: r.get(0)?,
                        observed_for: r.get(1)?,
                        temperature_c: r.get(2)?,
                        precipitation_mm: r.get(3)?,
                        wind_kph: r.get(4)?,
                        humidity_pct: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(w)
    }

    /// Races that need a weather row: scheduled races dated within
    /// [`as_of`, `horizon`], plus completed races that never got one.
    pub fn races_needing_weather(
        &self,
        as_of: NaiveDate,
        horizon: NaiveDate,
        season: Option<i32>,
    ) -> anyhow::Result<Vec<Race>> {
        self.query_races(
            "(?3 IS NULL OR season_year = ?3) AND (
                (status = 'scheduled' AND date >= ?1 AND date <= ?2)
                OR (status = 'completed' AND date <= ?1
                    AND NOT EXISTS (SELECT 1 FROM race_weather w WHERE w.race_id = races.id))
             )",
            &[&as_of, &horizon, &season],
        )
    }

    // --- validation ---

    /// Evaluates a read-only SQL predicate that yields one numeric value.
    ///
    /// Named parameters present in `sql` are bound from `named`; unknown
    /// names in `named` are ignored. Statements that could write are refused.
    pub fn scalar_query(
        &self,
        sql: &str,
        named: &[(&str, &dyn ToSql)],
    ) -> anyhow::Result<Option<f64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).context("prepare predicate")?;
        if !stmt.readonly() {
            anyhow::bail!("predicate is not read-only");
        }
        for (name, value) in named {
            if let Some(idx) = stmt.parameter_index(name)? {
                stmt.raw_bind_parameter(idx, value)?;
            }
        }
        let mut rows = stmt.raw_query();
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let v: Option<f64> = row.get(0)?;
        Ok(v)
    }

    pub fn insert_validation_result(
        &self,
        run_id: Option<RunId>,
        rule_name: &str,
        passed: bool,
        observed: Option<f64>,
        message: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO validation_results (rule_name, run_id, passed, observed_value, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![rule_name, run_id, passed, observed, message, Utc::now()],
        )?;
        Ok(())
    }

    // --- runs ---

    pub fn create_run(
        &self,
        pipeline: &str,
        trigger: &str,
        as_of: NaiveDate,
        config_sha256: Option<&str>,
    ) -> anyhow::Result<RunId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pipeline_runs (pipeline, trigger, as_of, started_at, status, config_sha256)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pipeline,
                trigger,
                as_of,
                Utc::now(),
                RunStatus::Running.as_str(),
                config_sha256
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(&self, run_id: RunId, status: RunStatus) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = ?2 WHERE run_id = ?3",
            params![status.as_str(), Utc::now(), run_id],
        )?;
        Ok(())
    }

    pub fn run_status(&self, run_id: RunId) -> anyhow::Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT status FROM pipeline_runs WHERE run_id = ?1",
                params![run_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Opens the audit row for one attempt; returns its row id.
    pub fn start_task_attempt(&self, run_id: RunId, task: &str, attempt: u32) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO task_runs (run_id, task_name, attempt, state, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, task, attempt, TaskState::Running.as_str(), Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_task_attempt(
        &self,
        row_id: i64,
        state: TaskState,
        reason: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE task_runs SET state = ?1, reason = ?2, finished_at = ?3 WHERE id = ?4",
            params![state.as_str(), reason, Utc::now(), row_id],
        )?;
        Ok(())
    }

    pub fn record_skipped_task(&self, run_id: RunId, task: &str, reason: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO task_runs (run_id, task_name, attempt, state, reason, started_at, finished_at)
             VALUES (?1, ?2, 0, ?3, ?4, NULL, ?5)",
            params![run_id, task, TaskState::Skipped.as_str(), reason, now],
        )?;
        Ok(())
    }

    pub fn task_runs(&self, run_id: RunId) -> anyhow::Result<Vec<TaskRunRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, task_name, attempt, state, reason, started_at, finished_at
             FROM task_runs WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |r| {
                Ok(TaskRunRow {
                    run_id: r.get(0)?,
                    task_name: r.get(1)?,
                    attempt: r.get(2)?,
                    state: TaskState::parse(&r.get::<_, String>(3)?),
                    reason: r.get(4)?,
                    started_at: r.get(5)?,
                    finished_at: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        const TABLES: &[&str] = &[
            "circuits",
            "races",
            "race_results",
            "ratings",
            "predictions",
            "prediction_accuracy",
            "race_weather",
            "validation_results",
            "pipeline_runs",
            "task_runs",
        ];
        if !TABLES.contains(&table) {
            anyhow::bail!("Invalid table name for count_rows: {}", table);
        }
        let conn = self.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}
