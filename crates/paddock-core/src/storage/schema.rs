pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS circuits (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  locality TEXT,
  country TEXT,
  lat REAL,
  lon REAL
);

CREATE TABLE IF NOT EXISTS races (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  season_year INTEGER NOT NULL,
  round_number INTEGER NOT NULL,
  name TEXT NOT NULL,
  date TEXT NOT NULL,
  circuit_id TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'scheduled',
  completed_at TEXT,
  ratings_applied_at TEXT,
  UNIQUE (season_year, round_number)
);

CREATE TABLE IF NOT EXISTS race_results (
  race_id INTEGER NOT NULL REFERENCES races(id),
  driver_id TEXT NOT NULL,
  team_id TEXT NOT NULL,
  finishing_position INTEGER,
  points REAL NOT NULL DEFAULT 0,
  PRIMARY KEY (race_id, driver_id)
);

CREATE TABLE IF NOT EXISTS ratings (
  entity_kind TEXT NOT NULL,
  entity_id TEXT NOT NULL,
  value REAL NOT NULL DEFAULT 1500,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (entity_kind, entity_id)
);

CREATE TABLE IF NOT EXISTS predictions (
  race_id INTEGER NOT NULL REFERENCES races(id),
  driver_id TEXT NOT NULL,
  model_version TEXT NOT NULL,
  win_probability REAL NOT NULL,
  generated_at TEXT NOT NULL,
  PRIMARY KEY (race_id, driver_id, model_version)
);

CREATE TABLE IF NOT EXISTS prediction_accuracy (
  race_id INTEGER NOT NULL REFERENCES races(id),
  model_version TEXT NOT NULL,
  brier_score REAL NOT NULL,
  log_loss REAL NOT NULL,
  sample_size INTEGER NOT NULL,
  evaluated_at TEXT NOT NULL,
  PRIMARY KEY (race_id, model_version)
);

CREATE TABLE IF NOT EXISTS race_weather (
  race_id INTEGER PRIMARY KEY REFERENCES races(id),
  observed_for TEXT NOT NULL,
  temperature_c REAL,
  precipitation_mm REAL,
  wind_kph REAL,
  humidity_pct REAL,
  fetched_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS validation_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  rule_name TEXT NOT NULL,
  run_id INTEGER,
  passed INTEGER NOT NULL,
  observed_value REAL,
  message TEXT,
  timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
  run_id INTEGER PRIMARY KEY AUTOINCREMENT,
  pipeline TEXT NOT NULL,
  trigger TEXT NOT NULL,
  as_of TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  config_sha256 TEXT
);

CREATE TABLE IF NOT EXISTS task_runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES pipeline_runs(run_id),
  task_name TEXT NOT NULL,
  attempt INTEGER NOT NULL,
  state TEXT NOT NULL,
  reason TEXT,
  started_at TEXT,
  finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_races_status_date ON races(status, date);
CREATE INDEX IF NOT EXISTS idx_task_runs_run ON task_runs(run_id);
CREATE INDEX IF NOT EXISTS idx_validation_results_run ON validation_results(run_id);
"#;
