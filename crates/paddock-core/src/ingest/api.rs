//! Wire formats of the sports-data and weather APIs.
//!
//! Calendar:  `GET {sports}/races?season=Y`
//! Results:   `GET {sports}/results?season=Y&round=N` (JSON, or CSV with a
//!            `driver_id,team_id,position,points` header)
//! Forecast:  `GET {weather}/forecast?lat=..&lon=..&date=YYYY-MM-DD`

use crate::errors::TaskError;
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarPayload {
    pub races: Vec<CalendarRace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarRace {
    pub season: i32,
    pub round: u32,
    pub name: String,
    pub date: NaiveDate,
    #[serde(default = "default_status")]
    pub status: String,
    pub circuit: CircuitPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPayload {
    #[serde(default)]
    pub season: Option<i32>,
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub results: Vec<ResultRow>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultRow {
    pub driver_id: String,
    pub team_id: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub points: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastPayload {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub precipitation_mm: Option<f64>,
    #[serde(default)]
    pub wind_kph: Option<f64>,
    #[serde(default)]
    pub humidity_pct: Option<f64>,
}

fn default_status() -> String {
    "scheduled".into()
}

fn malformed(what: &str, e: impl std::fmt::Display) -> TaskError {
    TaskError::permanent(format!("malformed {} payload: {}", what, e))
}

pub fn parse_calendar(body: &str) -> Result<CalendarPayload, TaskError> {
    serde_json::from_str(body).map_err(|e| malformed("calendar", e))
}

pub fn parse_forecast(body: &str) -> Result<ForecastPayload, TaskError> {
    serde_json::from_str(body).map_err(|e| malformed("forecast", e))
}

/// Accepts the JSON document or the delimited-text export.
///
/// A delimited body carries no status line; a non-empty table is taken to
/// mean the race is completed.
pub fn parse_results(body: &str) -> Result<ResultsPayload, TaskError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| malformed("results", e));
    }

    let mut lines = trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));
    let header: Vec<String> = match lines.next() {
        Some(h) => h.split(',').map(|c| c.trim().to_ascii_lowercase()).collect(),
        None => {
            return Ok(ResultsPayload {
                season: None,
                round: None,
                status: default_status(),
                results: Vec::new(),
            })
        }
    };
    let col = |name: &str| {
        header
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| malformed("results", format!("missing column '{}'", name)))
    };
    let (c_driver, c_team, c_pos) = (col("driver_id")?, col("team_id")?, col("position")?);
    let c_points = header.iter().position(|c| c == "points");

    let mut results = Vec::new();
    for (n, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let cell = |i: usize| {
            cells
                .get(i)
                .copied()
                .ok_or_else(|| malformed("results", format!("row {} is too short", n + 1)))
        };
        let position = match cell(c_pos)? {
            "" | "DNF" | "DNS" | "DSQ" | "NC" | "R" => None,
            p => Some(p.parse::<u32>().map_err(|e| {
                malformed("results", format!("row {} position '{}': {}", n + 1, p, e))
            })?),
        };
        let points = match c_points.map(cell).transpose()? {
            None | Some("") => 0.0,
            Some(p) => p.parse::<f64>().map_err(|e| {
                malformed("results", format!("row {} points '{}': {}", n + 1, p, e))
            })?,
        };
        results.push(ResultRow {
            driver_id: cell(c_driver)?.to_string(),
            team_id: cell(c_team)?.to_string(),
            position,
            points,
        });
    }

    let status = if results.is_empty() {
        default_status()
    } else {
        "completed".into()
    };
    Ok(ResultsPayload {
        season: None,
        round: None,
        status,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_results() {
        let p = parse_results(
            r#"{"season":2025,"round":3,"status":"completed","results":[
                {"driver_id":"ver","team_id":"rbr","position":1,"points":25},
                {"driver_id":"ham","team_id":"fer","position":null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(p.status, "completed");
        assert_eq!(p.results.len(), 2);
        assert_eq!(p.results[1].position, None);
        assert_eq!(p.results[1].points, 0.0);
    }

    #[test]
    fn parses_delimited_results() {
        let body = "driver_id,team_id,position,points\nver,rbr,1,25\nlec,fer,2,18\nsai,fer,DNF,0\n";
        let p = parse_results(body).unwrap();
        assert_eq!(p.status, "completed");
        assert_eq!(
            p.results[2],
            ResultRow {
                driver_id: "sai".into(),
                team_id: "fer".into(),
                position: None,
                points: 0.0
            }
        );
    }

    #[test]
    fn header_only_table_is_not_completed() {
        let p = parse_results("driver_id,team_id,position\n").unwrap();
        assert_eq!(p.status, "scheduled");
        assert!(p.results.is_empty());
    }

    #[test]
    fn bad_rows_are_permanent_errors() {
        let err = parse_results("driver_id,team_id,position\nver,rbr,first\n").unwrap_err();
        assert!(matches!(err, TaskError::Permanent(_)));
        let err = parse_results("driver,team\nver,rbr\n").unwrap_err();
        assert!(err.to_string().contains("missing column 'driver_id'"));
        assert!(matches!(parse_calendar("not json"), Err(TaskError::Permanent(_))));
    }
}
