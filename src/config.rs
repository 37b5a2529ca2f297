use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encoder::FeatureSpec;
use crate::error::{TrainError, TrainResult};
use crate::estimator::Algorithm;

pub const DEFAULT_SAMPLE_COUNT: usize = 3000;
pub const DEFAULT_EVAL_FRACTION: f64 = 0.2;
pub const DEFAULT_SPLIT_SEED: u64 = 42;
pub const DEFAULT_MODELS_DIR: &str = "models";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    Street,
    Permanent,
    HighSpeed,
}

impl CircuitKind {
    // Typical race-average speed band in km/h.
    pub fn speed_band(self) -> (f64, f64) {
        match self {
            CircuitKind::Street => (160.0, 190.0),
            CircuitKind::Permanent => (190.0, 220.0),
            CircuitKind::HighSpeed => (220.0, 245.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamProfile {
    pub name: String,
    pub performance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub name: String,
    pub team: String,
    pub skill: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitProfile {
    pub name: String,
    pub kind: CircuitKind,
}

/// Drivers, teams and circuits of one season. Passed into the generator
/// rather than baked in, so several rosters can coexist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonRoster {
    pub season: u16,
    pub teams: Vec<TeamProfile>,
    pub drivers: Vec<DriverProfile>,
    pub circuits: Vec<CircuitProfile>,
}

impl SeasonRoster {
    pub fn season_2025() -> Self {
        let teams = [
            ("McLaren", 0.95),
            ("Ferrari", 0.85),
            ("Mercedes", 0.84),
            ("Red Bull Racing", 0.83),
            ("Williams", 0.66),
            ("Racing Bulls", 0.62),
            ("Aston Martin", 0.60),
            ("Haas", 0.58),
            ("Kick Sauber", 0.57),
            ("Alpine", 0.45),
        ];
        let drivers = [
            ("Lando Norris", "McLaren", 0.91),
            ("Oscar Piastri", "McLaren", 0.90),
            ("Charles Leclerc", "Ferrari", 0.87),
            ("Lewis Hamilton", "Ferrari", 0.80),
            ("George Russell", "Mercedes", 0.86),
            ("Kimi Antonelli", "Mercedes", 0.74),
            ("Max Verstappen", "Red Bull Racing", 0.95),
            ("Yuki Tsunoda", "Red Bull Racing", 0.64),
            ("Alexander Albon", "Williams", 0.72),
            ("Carlos Sainz", "Williams", 0.76),
            ("Isack Hadjar", "Racing Bulls", 0.70),
            ("Liam Lawson", "Racing Bulls", 0.62),
            ("Fernando Alonso", "Aston Martin", 0.75),
            ("Lance Stroll", "Aston Martin", 0.55),
            ("Esteban Ocon", "Haas", 0.63),
            ("Oliver Bearman", "Haas", 0.65),
            ("Nico Hulkenberg", "Kick Sauber", 0.66),
            ("Gabriel Bortoleto", "Kick Sauber", 0.60),
            ("Pierre Gasly", "Alpine", 0.68),
            ("Franco Colapinto", "Alpine", 0.52),
        ];
        let circuits = [
            ("Australia", CircuitKind::Permanent),
            ("China", CircuitKind::Permanent),
            ("Japan", CircuitKind::Permanent),
            ("Bahrain", CircuitKind::Permanent),
            ("Saudi Arabia", CircuitKind::Street),
            ("Miami", CircuitKind::Street),
            ("Emilia Romagna", CircuitKind::Permanent),
            ("Monaco", CircuitKind::Street),
            ("Spain", CircuitKind::Permanent),
            ("Canada", CircuitKind::Street),
            ("Austria", CircuitKind::HighSpeed),
            ("Britain", CircuitKind::HighSpeed),
            ("Belgium", CircuitKind::HighSpeed),
            ("Hungary", CircuitKind::Permanent),
            ("Netherlands", CircuitKind::Permanent),
            ("Italy", CircuitKind::HighSpeed),
            ("Azerbaijan", CircuitKind::Street),
            ("Singapore", CircuitKind::Street),
            ("United States", CircuitKind::Permanent),
            ("Mexico", CircuitKind::Permanent),
            ("Brazil", CircuitKind::Permanent),
            ("Las Vegas", CircuitKind::Street),
            ("Qatar", CircuitKind::HighSpeed),
            ("Abu Dhabi", CircuitKind::Permanent),
        ];

        Self {
            season: 2025,
            teams: teams
                .iter()
                .map(|(name, performance)| TeamProfile {
                    name: name.to_string(),
                    performance: *performance,
                })
                .collect(),
            drivers: drivers
                .iter()
                .map(|(name, team, skill)| DriverProfile {
                    name: name.to_string(),
                    team: team.to_string(),
                    skill: *skill,
                })
                .collect(),
            circuits: circuits
                .iter()
                .map(|(name, kind)| CircuitProfile {
                    name: name.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    pub fn load(path: &Path) -> TrainResult<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            TrainError::Generation(format!("read roster {}: {err}", path.display()))
        })?;
        let roster: SeasonRoster = serde_json::from_str(&raw).map_err(|err| {
            TrainError::Generation(format!("parse roster {}: {err}", path.display()))
        })?;
        roster.validate()?;
        Ok(roster)
    }

    pub fn validate(&self) -> TrainResult<()> {
        if self.drivers.is_empty() {
            return Err(TrainError::Generation("roster has no drivers".to_string()));
        }
        if self.circuits.is_empty() {
            return Err(TrainError::Generation("roster has no circuits".to_string()));
        }
        for team in &self.teams {
            if !(0.0..=1.0).contains(&team.performance) {
                return Err(TrainError::Generation(format!(
                    "team {} performance {} outside [0, 1]",
                    team.name, team.performance
                )));
            }
        }
        for driver in &self.drivers {
            if !(0.0..=1.0).contains(&driver.skill) {
                return Err(TrainError::Generation(format!(
                    "driver {} skill {} outside [0, 1]",
                    driver.name, driver.skill
                )));
            }
            if self.team(&driver.team).is_none() {
                return Err(TrainError::Generation(format!(
                    "driver {} races for unknown team {}",
                    driver.name, driver.team
                )));
            }
        }
        Ok(())
    }

    pub fn team(&self, name: &str) -> Option<&TeamProfile> {
        self.teams.iter().find(|t| t.name == name)
    }

    pub fn grid_size(&self) -> usize {
        self.drivers.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            max_depth: 3,
            learning_rate: 0.1,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub l2: f64,
    pub max_iters: usize,
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            l2: 1e-3,
            max_iters: 1000,
            tolerance: 1e-7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearParams {
    pub l2: f64,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { l2: 1e-6 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EstimatorParams {
    pub forest: ForestParams,
    pub boosting: BoostingParams,
    pub logistic: LogisticParams,
    pub linear: LinearParams,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub sample_count: usize,
    pub seed: Option<u64>,
    pub eval_fraction: f64,
    pub split_seed: u64,
    pub models_dir: PathBuf,
    pub run_id: Option<String>,
    pub roster_path: Option<PathBuf>,
    pub records_path: Option<PathBuf>,
    pub features: FeatureSpec,
    pub algorithms: Vec<Algorithm>,
    pub params: EstimatorParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            seed: None,
            eval_fraction: DEFAULT_EVAL_FRACTION,
            split_seed: DEFAULT_SPLIT_SEED,
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            run_id: None,
            roster_path: None,
            records_path: None,
            features: FeatureSpec::default(),
            algorithms: Algorithm::ALL.to_vec(),
            params: EstimatorParams::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_env() -> TrainResult<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Overlays `RACE_*` settings looked up through `lookup`. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> TrainResult<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("RACE_TRAIN_SAMPLES") {
            self.sample_count = parse_sample_count(&raw)?;
        }
        if let Some(raw) = get("RACE_TRAIN_SEED") {
            self.seed = Some(parse_seed(&raw)?);
        }
        if let Some(raw) = get("RACE_EVAL_FRACTION") {
            let fraction = raw.trim().parse::<f64>().map_err(|_| {
                TrainError::Generation(format!("invalid eval fraction {raw:?}"))
            })?;
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(TrainError::Generation(format!(
                    "eval fraction {fraction} must lie strictly between 0 and 1"
                )));
            }
            self.eval_fraction = fraction;
        }
        if let Some(raw) = get("RACE_MODELS_DIR") {
            self.models_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = get("RACE_ROSTER_PATH") {
            self.roster_path = Some(PathBuf::from(raw.trim()));
        }
        Ok(())
    }

    /// Overlays command-line flags (`--samples N` or `--samples=N`, same for
    /// `--seed`, `--models-dir`, `--run-id`, `--roster`, `--records`).
    pub fn apply_args(&mut self, args: &[String]) -> TrainResult<()> {
        if let Some(raw) = arg_value(args, "--samples") {
            self.sample_count = parse_sample_count(&raw)?;
        }
        if let Some(raw) = arg_value(args, "--seed") {
            self.seed = Some(parse_seed(&raw)?);
        }
        if let Some(raw) = arg_value(args, "--models-dir") {
            self.models_dir = PathBuf::from(raw);
        }
        if let Some(raw) = arg_value(args, "--run-id") {
            self.run_id = Some(raw);
        }
        if let Some(raw) = arg_value(args, "--roster") {
            self.roster_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = arg_value(args, "--records") {
            self.records_path = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    pub fn roster(&self) -> TrainResult<SeasonRoster> {
        match &self.roster_path {
            Some(path) => SeasonRoster::load(path),
            None => Ok(SeasonRoster::season_2025()),
        }
    }
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{name}="))
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

pub fn parse_sample_count(raw: &str) -> TrainResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| TrainError::Generation(format!("invalid sample count {raw:?}")))
}

pub fn parse_seed(raw: &str) -> TrainResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| TrainError::Generation(format!("invalid seed {raw:?}")))
}
