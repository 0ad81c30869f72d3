use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_K_FACTOR: f64 = 32.0;
pub const DEFAULT_RATING_FLOOR: f64 = 100.0;
pub const DEFAULT_INITIAL_RATING: f64 = 1500.0;

/// Tunables for the pairwise Elo update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloParams {
    pub k_factor: f64,
    pub rating_floor: f64,
    pub initial_rating: f64,
}

impl Default for EloParams {
    fn default() -> Self {
        Self {
            k_factor: DEFAULT_K_FACTOR,
            rating_floor: DEFAULT_RATING_FLOOR,
            initial_rating: DEFAULT_INITIAL_RATING,
        }
    }
}

/// One classified (or unclassified) participant of a race.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub entity_id: String,
    /// `None` means the entity was not classified.
    pub position: Option<u32>,
}

impl Standing {
    pub fn new(entity_id: impl Into<String>, position: Option<u32>) -> Self {
        Self {
            entity_id: entity_id.into(),
            position,
        }
    }
}

/// Probability that a player rated `rating_a` beats one rated `rating_b`.
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// Ordering between two standings: `Some(true)` if `a` finished ahead of `b`,
/// `Some(false)` if behind, `None` if the pair is not comparable.
fn finished_ahead(a: Option<u32>, b: Option<u32>) -> Option<bool> {
    match (a, b) {
        (Some(x), Some(y)) if x == y => None,
        (Some(x), Some(y)) => Some(x < y),
        (Some(_), None) => Some(true),
        (None, Some(_)) => Some(false),
        (None, None) => None,
    }
}

/// Computes the rating change for every entity in `standings` from all
/// pairwise comparisons of one race.
///
/// All expectations are computed from `ratings` as they were before the race;
/// nothing is re-read while the batch accumulates. Entities missing from
/// `ratings` start at `params.initial_rating`. Every entity in `standings`
/// appears in the output, with `0.0` if it took part in no comparison.
pub fn race_deltas(
    standings: &[Standing],
    ratings: &HashMap<String, f64>,
    params: &EloParams,
) -> BTreeMap<String, f64> {
    let rating_of = |id: &str| ratings.get(id).copied().unwrap_or(params.initial_rating);

    let mut deltas: BTreeMap<String, f64> = standings
        .iter()
        .map(|s| (s.entity_id.clone(), 0.0))
        .collect();

    for (i, a) in standings.iter().enumerate() {
        for b in &standings[i + 1..] {
            if a.entity_id == b.entity_id {
                continue;
            }
            let (winner, loser) = match finished_ahead(a.position, b.position) {
                Some(true) => (a, b),
                Some(false) => (b, a),
                None => continue,
            };

            let expected_winner = expected_score(rating_of(&winner.entity_id), rating_of(&loser.entity_id));
            let expected_loser = 1.0 - expected_winner;

            if let Some(d) = deltas.get_mut(&winner.entity_id) {
                *d += params.k_factor * (1.0 - expected_winner);
            }
            if let Some(d) = deltas.get_mut(&loser.entity_id) {
                *d += params.k_factor * (0.0 - expected_loser);
            }
        }
    }

    deltas
}

/// Applies `deltas` to the pre-race ratings, clamping each result to the floor.
pub fn apply_deltas(
    ratings: &HashMap<String, f64>,
    deltas: &BTreeMap<String, f64>,
    params: &EloParams,
) -> BTreeMap<String, f64> {
    deltas
        .iter()
        .map(|(id, delta)| {
            let before = ratings.get(id).copied().unwrap_or(params.initial_rating);
            (id.clone(), (before + delta).max(params.rating_floor))
        })
        .collect()
}

/// Collapses member results into one standing per group, keeping the best
/// position of each group. Used to rate teams from their drivers' finishes.
pub fn best_by_group<'a, I>(members: I) -> Vec<Standing>
where
    I: IntoIterator<Item = (&'a str, Option<u32>)>,
{
    let mut best: BTreeMap<&str, Option<u32>> = BTreeMap::new();
    for (group, position) in members {
        let slot = best.entry(group).or_insert(None);
        *slot = match (*slot, position) {
            (Some(cur), Some(p)) => Some(cur.min(p)),
            (None, p) => p,
            (cur, None) => cur,
        };
    }
    best.into_iter()
        .map(|(group, position)| Standing::new(group, position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(ids: &[&str]) -> HashMap<String, f64> {
        ids.iter().map(|id| (id.to_string(), 1500.0)).collect()
    }

    #[test]
    fn two_equal_drivers_move_sixteen_points() {
        let standings = vec![Standing::new("a", Some(1)), Standing::new("b", Some(2))];
        let ratings = flat(&["a", "b"]);
        let params = EloParams::default();

        let deltas = race_deltas(&standings, &ratings, &params);
        let after = apply_deltas(&ratings, &deltas, &params);

        assert!((after["a"] - 1516.0).abs() < 1e-9);
        assert!((after["b"] - 1484.0).abs() < 1e-9);
    }

    #[test]
    fn deltas_are_zero_sum_without_floor() {
        let standings = vec![
            Standing::new("ver", Some(1)),
            Standing::new("nor", Some(2)),
            Standing::new("lec", Some(3)),
            Standing::new("ham", None),
            Standing::new("alo", None),
        ];
        let mut ratings = HashMap::new();
        ratings.insert("ver".to_string(), 1720.0);
        ratings.insert("nor".to_string(), 1650.0);
        ratings.insert("lec".to_string(), 1610.0);
        ratings.insert("ham".to_string(), 1580.0);

        let deltas = race_deltas(&standings, &ratings, &EloParams::default());
        let total: f64 = deltas.values().sum();
        assert!(total.abs() < 1e-9, "sum of deltas was {total}");
        // alo starts at the initial rating and only loses
        assert!(deltas["alo"] < 0.0);
    }

    #[test]
    fn ties_and_double_dnfs_are_not_compared() {
        let standings = vec![
            Standing::new("a", Some(3)),
            Standing::new("b", Some(3)),
            Standing::new("c", None),
            Standing::new("d", None),
        ];
        let ratings = flat(&["a", "b", "c", "d"]);
        let deltas = race_deltas(&standings, &ratings, &EloParams::default());

        assert!((deltas["a"] - deltas["b"]).abs() < 1e-12);
        assert!((deltas["c"] - deltas["d"]).abs() < 1e-12);
        // a and b each beat c and d once: 2 * 16
        assert!((deltas["a"] - 32.0).abs() < 1e-9);
    }

    #[test]
    fn floor_clamps_runaway_losses() {
        let params = EloParams {
            k_factor: 400.0,
            rating_floor: 100.0,
            initial_rating: 1500.0,
        };
        let mut ratings = HashMap::new();
        ratings.insert("a".to_string(), 120.0);
        ratings.insert("b".to_string(), 110.0);
        let standings = vec![Standing::new("b", Some(1)), Standing::new("a", Some(2))];

        let deltas = race_deltas(&standings, &ratings, &params);
        let after = apply_deltas(&ratings, &deltas, &params);
        assert_eq!(after["a"], 100.0);
    }

    #[test]
    fn best_by_group_keeps_best_classified_position() {
        let members = vec![
            ("mclaren", Some(4)),
            ("ferrari", None),
            ("mclaren", Some(2)),
            ("ferrari", Some(7)),
            ("haas", None),
        ];
        let standings = best_by_group(members);
        assert_eq!(
            standings,
            vec![
                Standing::new("ferrari", Some(7)),
                Standing::new("haas", None),
                Standing::new("mclaren", Some(2)),
            ]
        );
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let p: EloParams = serde_yaml::from_str("k_factor: 24").unwrap();
        assert_eq!(p.k_factor, 24.0);
        assert_eq!(p.rating_floor, DEFAULT_RATING_FLOOR);
        assert_eq!(p.initial_rating, DEFAULT_INITIAL_RATING);
    }
}
