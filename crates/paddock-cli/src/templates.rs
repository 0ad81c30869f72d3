pub const SAMPLE_CONFIG: &str = r#"# paddock pipeline config
version: 1

database:
  path: .paddock/paddock.db

# Six-field cron, seconds first. Used by `paddock serve`.
schedules:
  ingestion: "0 0 */6 * * *"
  predictions: "0 30 * * * *"
  maintenance: "0 0 3 * * *"

api:
  sports_base_url: "http://127.0.0.1:8080/v1"
  weather_base_url: "http://127.0.0.1:8081/v1"
  # Prefer PADDOCK_SPORTS_API_KEY / PADDOCK_WEATHER_API_KEY over keys in this file.
  timeout_seconds: 30
  max_retries: 3
  backoff:
    base_delay_ms: 1000
    multiplier: 2.0
    max_delay_ms: 30000
    jitter: 0.2

elo:
  k_factor: 32
  rating_floor: 100
  initial_rating: 1500

predictions:
  model_version: elo-v1

retention:
  days: 30

# Task-level retries in the DAG runner (HTTP retries above are separate).
retry:
  max_attempts: 3
  base_delay_ms: 1000
  multiplier: 2.0
  max_delay_ms: 30000
  jitter: 0.2

scheduler:
  parallelism: 4
  task_timeout_seconds: 300

validation:
  builtin_rules: true
  rules:
    - name: races_without_circuit_coordinates
      stage: ingest
      fail_threshold: 5
      predicate: >
        SELECT COUNT(*) FROM races r JOIN circuits c ON c.id = r.circuit_id
        WHERE c.lat IS NULL OR c.lon IS NULL
"#;
