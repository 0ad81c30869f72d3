use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Month (1-based) in which the racing season opens.
pub const SEASON_OPENS_MONTH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonPhase {
    InSeason,
    OffSeason,
}

impl SeasonPhase {
    /// March 1 through December 31 is in season; January and February are not.
    pub fn of(date: NaiveDate) -> Self {
        if date.month() >= SEASON_OPENS_MONTH {
            SeasonPhase::InSeason
        } else {
            SeasonPhase::OffSeason
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonPhase::InSeason => "in-season",
            SeasonPhase::OffSeason => "off-season",
        }
    }
}

/// When a task is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Always,
    InSeason,
    OffSeason,
}

/// Per-run verdict for one task, computed once when the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskGate {
    Active,
    /// Skipped by design; does not fail the run or block dependents.
    GatedSkip(String),
}

impl TaskGate {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskGate::Active)
    }
}

/// Decides which tasks of a graph are active for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonGate {
    /// Gate by the season phase of this date.
    AsOf(NaiveDate),
    /// Every task is active regardless of the calendar (backfills).
    Disabled,
}

impl SeasonGate {
    pub fn phase(&self) -> Option<SeasonPhase> {
        match self {
            SeasonGate::AsOf(date) => Some(SeasonPhase::of(*date)),
            SeasonGate::Disabled => None,
        }
    }

    pub fn gate(&self, activation: Activation) -> TaskGate {
        let Some(phase) = self.phase() else {
            return TaskGate::Active;
        };
        match (activation, phase) {
            (Activation::Always, _)
            | (Activation::InSeason, SeasonPhase::InSeason)
            | (Activation::OffSeason, SeasonPhase::OffSeason) => TaskGate::Active,
            (Activation::InSeason, SeasonPhase::OffSeason) => {
                TaskGate::GatedSkip("gated: off-season".into())
            }
            (Activation::OffSeason, SeasonPhase::InSeason) => {
                TaskGate::GatedSkip("gated: in-season".into())
            }
        }
    }
}
