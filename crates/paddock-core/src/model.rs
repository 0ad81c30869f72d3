use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = i64;
pub type RaceId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl RaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaceStatus::Scheduled => "scheduled",
            RaceStatus::Completed => "completed",
            RaceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(RaceStatus::Scheduled),
            "completed" | "finished" => Some(RaceStatus::Completed),
            "cancelled" | "canceled" => Some(RaceStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// A calendar entry as ingested, before it has a local id.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceUpsert {
    pub season_year: i32,
    pub round_number: u32,
    pub name: String,
    pub date: NaiveDate,
    pub circuit_id: String,
    pub status: RaceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Race {
    pub id: RaceId,
    pub season_year: i32,
    pub round_number: u32,
    pub name: String,
    pub date: NaiveDate,
    pub circuit_id: String,
    pub status: RaceStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub ratings_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_id: RaceId,
    pub driver_id: String,
    pub team_id: String,
    /// `None` when the driver was not classified.
    pub finishing_position: Option<u32>,
    pub points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Driver,
    Team,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Driver => "driver",
            EntityKind::Team => "team",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "driver" => Some(EntityKind::Driver),
            "team" => Some(EntityKind::Team),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rating {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub race_id: RaceId,
    pub driver_id: String,
    pub model_version: String,
    /// Percent, 0..=100.
    pub win_probability: f64,
    pub generated_at: DateTime<Utc>,
}

/// A driver expected to start a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub driver_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub race_id: RaceId,
    pub observed_for: NaiveDate,
    pub temperature_c: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub wind_kph: Option<f64>,
    pub humidity_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyRecord {
    pub race_id: RaceId,
    pub model_version: String,
    pub brier_score: f64,
    pub log_loss: f64,
    pub sample_size: u32,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TaskState::Running,
            "succeeded" => TaskState::Succeeded,
            "failed" => TaskState::Failed,
            "retrying" => TaskState::Retrying,
            "skipped" => TaskState::Skipped,
            _ => TaskState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// One row of the `task_runs` audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRunRow {
    pub run_id: RunId,
    pub task_name: String,
    /// 0 for tasks that never started (skipped).
    pub attempt: u32,
    pub state: TaskState,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
