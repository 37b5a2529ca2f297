use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SeasonRoster;
use crate::error::{TrainError, TrainResult};

pub const MAX_SAMPLE_COUNT: usize = 1_000_000;
pub const PODIUM_SIZE: u32 = 3;

const CLEAR_WEATHER_RATE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TireStrategy {
    OneStop,
    TwoStop,
    ThreeStop,
}

impl TireStrategy {
    pub fn stops(self) -> u8 {
        match self {
            TireStrategy::OneStop => 1,
            TireStrategy::TwoStop => 2,
            TireStrategy::ThreeStop => 3,
        }
    }

    fn from_stops(stops: u8) -> Self {
        match stops {
            0 | 1 => TireStrategy::OneStop,
            2 => TireStrategy::TwoStop,
            _ => TireStrategy::ThreeStop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEntryRecord {
    pub race_id: u32,
    pub driver: String,
    pub team: String,
    pub circuit: String,
    pub qualifying_position: u32,
    pub weather_clear: bool,
    pub track_temperature: f64,
    pub tire_strategy: TireStrategy,
    pub avg_speed: f64,
    pub pit_stop_time: f64,
    pub driver_skill: f64,
    pub team_performance: f64,
    pub circuit_factor: f64,
    pub finishing_position: u32,
}

impl RaceEntryRecord {
    pub fn is_winner(&self) -> bool {
        self.finishing_position == 1
    }

    pub fn is_podium(&self) -> bool {
        self.finishing_position <= PODIUM_SIZE
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("driver", &self.driver),
            ("team", &self.team),
            ("circuit", &self.circuit),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{name} is empty"));
            }
        }
        if self.qualifying_position == 0 {
            return Err("qualifying_position must be at least 1".to_string());
        }
        if self.finishing_position == 0 {
            return Err("finishing_position must be at least 1".to_string());
        }
        for (name, value) in [
            ("track_temperature", self.track_temperature),
            ("avg_speed", self.avg_speed),
            ("pit_stop_time", self.pit_stop_time),
            ("driver_skill", self.driver_skill),
            ("team_performance", self.team_performance),
            ("circuit_factor", self.circuit_factor),
        ] {
            if !value.is_finite() {
                return Err(format!("{name} is not a finite number"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSummary {
    pub records: usize,
    pub races: usize,
    pub winners: usize,
    pub podiums: usize,
    pub max_podiums_per_race: usize,
}

pub fn label_summary(records: &[RaceEntryRecord]) -> LabelSummary {
    let mut podiums_by_race: BTreeMap<u32, usize> = BTreeMap::new();
    let mut races = BTreeSet::new();
    let mut winners = 0;
    let mut podiums = 0;
    for record in records {
        races.insert(record.race_id);
        if record.is_winner() {
            winners += 1;
        }
        if record.is_podium() {
            podiums += 1;
            *podiums_by_race.entry(record.race_id).or_default() += 1;
        }
    }
    LabelSummary {
        records: records.len(),
        races: races.len(),
        winners,
        podiums,
        max_podiums_per_race: podiums_by_race.values().copied().max().unwrap_or(0),
    }
}

#[derive(Debug, Clone)]
pub struct SampleGenerator {
    roster: SeasonRoster,
}

impl SampleGenerator {
    pub fn new(roster: SeasonRoster) -> TrainResult<Self> {
        roster.validate()?;
        Ok(Self { roster })
    }

    pub fn roster(&self) -> &SeasonRoster {
        &self.roster
    }

    /// Simulates races of one full grid each (the last race may be partial)
    /// until `n` entries exist. The same seed always yields the same records.
    pub fn generate(&self, n: usize, seed: Option<u64>) -> TrainResult<Vec<RaceEntryRecord>> {
        let grid = self.roster.grid_size();
        if n < grid {
            return Err(TrainError::Generation(format!(
                "sample count {n} is below one full grid of {grid} entrants"
            )));
        }
        if n > MAX_SAMPLE_COUNT {
            return Err(TrainError::Generation(format!(
                "sample count {n} exceeds the limit of {MAX_SAMPLE_COUNT}"
            )));
        }

        let seed = seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut records = Vec::with_capacity(n);
        let mut race_id = 0u32;

        while records.len() < n {
            let entrants = grid.min(n - records.len());
            self.simulate_race(race_id, entrants, &mut rng, &mut records);
            race_id += 1;
        }

        let summary = label_summary(&records);
        info!(
            samples = summary.records,
            races = summary.races,
            winners = summary.winners,
            podiums = summary.podiums,
            seed,
            season = self.roster.season,
            "generated race entries"
        );
        Ok(records)
    }

    fn simulate_race(
        &self,
        race_id: u32,
        entrants: usize,
        rng: &mut StdRng,
        out: &mut Vec<RaceEntryRecord>,
    ) {
        let roster = &self.roster;
        let circuit = &roster.circuits[rng.gen_range(0..roster.circuits.len())];
        let weather_clear = rng.gen_bool(CLEAR_WEATHER_RATE);
        let track_temperature = normal(rng, 35.0, 8.0).clamp(15.0, 55.0);
        let circuit_factor = rng.gen_range(0.8..1.2);
        let (speed_lo, speed_hi) = circuit.kind.speed_band();

        let mut lineup: Vec<usize> = (0..roster.drivers.len()).collect();
        lineup.shuffle(rng);
        lineup.truncate(entrants);

        let mut entries: Vec<RaceEntryRecord> = lineup
            .iter()
            .map(|&idx| {
                let driver = &roster.drivers[idx];
                let team_performance = roster
                    .team(&driver.team)
                    .map(|t| t.performance)
                    .unwrap_or(0.5);
                let stops = rng.gen_range(1..=3u8);
                let avg_speed = speed_lo
                    + (speed_hi - speed_lo) * (0.35 + 0.5 * team_performance)
                    + normal(rng, 0.0, 4.0);
                RaceEntryRecord {
                    race_id,
                    driver: driver.name.clone(),
                    team: driver.team.clone(),
                    circuit: circuit.name.clone(),
                    qualifying_position: 0,
                    weather_clear,
                    track_temperature,
                    tire_strategy: TireStrategy::from_stops(stops),
                    avg_speed,
                    pit_stop_time: normal(rng, 2.5, 0.5).clamp(1.8, 6.0),
                    driver_skill: driver.skill,
                    team_performance,
                    circuit_factor,
                    finishing_position: 0,
                }
            })
            .collect();

        let quali_scores: Vec<f64> = entries
            .iter()
            .map(|e| {
                (1.0 - e.driver_skill) * 20.0
                    + (1.0 - e.team_performance) * 5.0
                    + normal(rng, 0.0, 3.0)
            })
            .collect();
        for (entry, rank) in entries.iter_mut().zip(ranks(&quali_scores)) {
            entry.qualifying_position = rank;
        }

        let race_noise = if weather_clear { 1.0 } else { 1.8 };
        let finish_scores: Vec<f64> = entries
            .iter()
            .map(|e| {
                e.qualifying_position as f64
                    + (1.0 - e.driver_skill) * 10.0
                    + (1.0 - e.team_performance) * 8.0
                    + (e.pit_stop_time - 2.5) * 0.6
                    + (e.tire_strategy.stops() as f64 - 2.0) * 0.3
                    + normal(rng, 0.0, race_noise) * e.circuit_factor
            })
            .collect();
        for (entry, rank) in entries.iter_mut().zip(ranks(&finish_scores)) {
            entry.finishing_position = rank;
        }

        debug!(race_id, circuit = %circuit.name, entrants, "simulated race");
        out.extend(entries);
    }
}

// Each race needs one winner, at most three podium entries and distinct positions.
pub fn load_records(path: &Path) -> TrainResult<Vec<RaceEntryRecord>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| TrainError::Encoding(format!("read {}: {err}", path.display())))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .map_err(|err| TrainError::Encoding(format!("parse {}: {err}", path.display())))?;
    if values.is_empty() {
        return Err(TrainError::Generation(format!(
            "{} holds no race entries",
            path.display()
        )));
    }

    let mut records = Vec::with_capacity(values.len());
    for (idx, value) in values.into_iter().enumerate() {
        let record: RaceEntryRecord = serde_json::from_value(value)
            .map_err(|err| TrainError::Encoding(format!("record {idx}: {err}")))?;
        record
            .validate()
            .map_err(|reason| TrainError::Encoding(format!("record {idx}: {reason}")))?;
        records.push(record);
    }

    let mut races: BTreeMap<u32, RaceTally> = BTreeMap::new();
    for record in &records {
        let tally = races.entry(record.race_id).or_default();
        if !tally.positions.insert(record.finishing_position) {
            return Err(TrainError::Encoding(format!(
                "race {} repeats finishing position {}",
                record.race_id, record.finishing_position
            )));
        }
        if record.is_winner() {
            tally.winners += 1;
        }
        if record.is_podium() {
            tally.podiums += 1;
        }
    }
    for (race_id, tally) in &races {
        if tally.winners != 1 {
            return Err(TrainError::Encoding(format!(
                "race {race_id} has {} winners, expected exactly one",
                tally.winners
            )));
        }
        if tally.podiums > PODIUM_SIZE as usize {
            return Err(TrainError::Encoding(format!(
                "race {race_id} has {} podium entries, expected at most {PODIUM_SIZE}",
                tally.podiums
            )));
        }
    }

    info!(
        path = %path.display(),
        samples = records.len(),
        races = races.len(),
        "loaded race entries"
    );
    Ok(records)
}

#[derive(Default)]
struct RaceTally {
    winners: usize,
    podiums: usize,
    positions: BTreeSet<u32>,
}

// 1-based rank of each score, lowest score first. Equal scores keep input order.
fn ranks(scores: &[f64]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut out = vec![0u32; scores.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        out[idx] = rank as u32 + 1;
    }
    out
}

fn normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    mean + std * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> SampleGenerator {
        SampleGenerator::new(SeasonRoster::season_2025()).unwrap()
    }

    #[test]
    fn every_race_has_one_winner_and_three_podiums() {
        let records = generator().generate(410, Some(3)).unwrap();
        let summary = label_summary(&records);
        assert_eq!(summary.records, 410);
        assert_eq!(summary.races, 21);
        assert_eq!(summary.winners, summary.races);
        assert!(summary.max_podiums_per_race <= 3);
    }

    #[test]
    fn same_seed_same_population() {
        let a = generator().generate(60, Some(11)).unwrap();
        let b = generator().generate(60, Some(11)).unwrap();
        let c = generator().generate(60, Some(12)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn positions_are_a_permutation_within_each_race() {
        let records = generator().generate(40, Some(5)).unwrap();
        for race in 0..2u32 {
            let mut quali: Vec<u32> = records
                .iter()
                .filter(|r| r.race_id == race)
                .map(|r| r.qualifying_position)
                .collect();
            let mut finish: Vec<u32> = records
                .iter()
                .filter(|r| r.race_id == race)
                .map(|r| r.finishing_position)
                .collect();
            quali.sort_unstable();
            finish.sort_unstable();
            let expected: Vec<u32> = (1..=20).collect();
            assert_eq!(quali, expected);
            assert_eq!(finish, expected);
        }
    }

    #[test]
    fn population_smaller_than_a_grid_is_rejected() {
        let err = generator().generate(1, Some(42)).unwrap_err();
        assert!(matches!(err, TrainError::Generation(_)));
        let err = generator().generate(MAX_SAMPLE_COUNT + 1, None).unwrap_err();
        assert!(matches!(err, TrainError::Generation(_)));
    }

    #[test]
    fn ranks_lowest_score_first() {
        assert_eq!(ranks(&[2.5, -1.0, 9.0, 0.0]), vec![3, 1, 4, 2]);
    }
}
