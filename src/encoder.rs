use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{TrainError, TrainResult};
use crate::sample_gen::RaceEntryRecord;

/// Code given to a category value that was not seen at fit time.
pub const UNKNOWN_CODE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    QualifyingPosition,
    WeatherClear,
    TrackTemperature,
    TireStrategy,
    AvgSpeed,
    PitStopTime,
    DriverSkill,
    TeamPerformance,
    CircuitFactor,
    DriverEncoded,
    TeamEncoded,
    CircuitEncoded,
}

impl Feature {
    pub const ALL: [Feature; 12] = [
        Feature::QualifyingPosition,
        Feature::WeatherClear,
        Feature::TrackTemperature,
        Feature::TireStrategy,
        Feature::AvgSpeed,
        Feature::PitStopTime,
        Feature::DriverSkill,
        Feature::TeamPerformance,
        Feature::CircuitFactor,
        Feature::DriverEncoded,
        Feature::TeamEncoded,
        Feature::CircuitEncoded,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::QualifyingPosition => "qualifying_position",
            Feature::WeatherClear => "weather_clear",
            Feature::TrackTemperature => "track_temperature",
            Feature::TireStrategy => "tire_strategy",
            Feature::AvgSpeed => "avg_speed",
            Feature::PitStopTime => "pit_stop_time",
            Feature::DriverSkill => "driver_skill",
            Feature::TeamPerformance => "team_performance",
            Feature::CircuitFactor => "circuit_factor",
            Feature::DriverEncoded => "driver_encoded",
            Feature::TeamEncoded => "team_encoded",
            Feature::CircuitEncoded => "circuit_encoded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    columns: Vec<Feature>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            columns: Feature::ALL.to_vec(),
        }
    }
}

impl FeatureSpec {
    pub fn new(columns: Vec<Feature>) -> TrainResult<Self> {
        if columns.is_empty() {
            return Err(TrainError::Encoding("feature list is empty".to_string()));
        }
        for (idx, feature) in columns.iter().enumerate() {
            if columns[..idx].contains(feature) {
                return Err(TrainError::Encoding(format!(
                    "feature {} listed twice",
                    feature.name()
                )));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Feature] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Sorted distinct values; a value's code is its index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryTable {
    values: Vec<String>,
}

impl CategoryTable {
    fn fit<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let mut values: Vec<String> = values.map(str::to_string).collect();
        values.sort_unstable();
        values.dedup();
        Self { values }
    }

    pub fn code(&self, value: &str) -> f64 {
        match self.values.binary_search_by(|v| v.as_str().cmp(value)) {
            Ok(idx) => idx as f64,
            Err(_) => UNKNOWN_CODE,
        }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryTables {
    pub driver: CategoryTable,
    pub team: CategoryTable,
    pub circuit: CategoryTable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl ScalerState {
    fn fit(raw: &[Vec<f64>], width: usize) -> Self {
        let n = raw.len().max(1) as f64;
        let mut means = vec![0.0; width];
        for row in raw {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; width];
        for row in raw {
            for ((s, x), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (x - m) * (x - m);
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
            // Constant columns pass through centred but unscaled.
            if *s < 1e-12 {
                *s = 1.0;
            }
        }
        Self { means, stds }
    }

    fn apply(&self, row: &mut [f64]) {
        for ((x, m), s) in row.iter_mut().zip(&self.means).zip(&self.stds) {
            *x = (*x - m) / s;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderState {
    features: FeatureSpec,
    categories: CategoryTables,
    scaler: ScalerState,
    fingerprint: String,
}

impl EncoderState {
    /// Rebuilds a state from persisted parts and checks it against the
    /// fingerprint it was saved with.
    pub fn from_parts(
        features: FeatureSpec,
        categories: CategoryTables,
        scaler: ScalerState,
        expected_fingerprint: &str,
    ) -> TrainResult<Self> {
        if scaler.means.len() != features.len() || scaler.stds.len() != features.len() {
            return Err(TrainError::Encoding(format!(
                "scaler has {} columns, feature list has {}",
                scaler.means.len(),
                features.len()
            )));
        }
        let fingerprint = fingerprint_of(&features, &categories, &scaler)?;
        if fingerprint != expected_fingerprint {
            return Err(TrainError::Encoding(format!(
                "encoder fingerprint mismatch: stored {expected_fingerprint}, computed {fingerprint}"
            )));
        }
        Ok(Self {
            features,
            categories,
            scaler,
            fingerprint,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn features(&self) -> &FeatureSpec {
        &self.features
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.names()
    }

    pub fn categories(&self) -> &CategoryTables {
        &self.categories
    }

    pub fn scaler(&self) -> &ScalerState {
        &self.scaler
    }

    pub fn raw_row(&self, record: &RaceEntryRecord) -> Vec<f64> {
        raw_row(&self.features, &self.categories, record)
    }

    pub fn transform_record(&self, record: &RaceEntryRecord) -> TrainResult<Vec<f64>> {
        record
            .validate()
            .map_err(|reason| {
                TrainError::Encoding(format!("{} / {}: {reason}", record.race_id, record.driver))
            })?;
        let mut row = self.raw_row(record);
        self.scaler.apply(&mut row);
        Ok(row)
    }

    pub fn transform(&self, records: &[RaceEntryRecord]) -> TrainResult<FeatureMatrix> {
        let mut rows = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            record
                .validate()
                .map_err(|reason| TrainError::Encoding(format!("record {idx}: {reason}")))?;
            let mut row = self.raw_row(record);
            self.scaler.apply(&mut row);
            rows.push(row);
        }
        Ok(FeatureMatrix {
            rows,
            feature_names: self.feature_names(),
            fingerprint: self.fingerprint.clone(),
        })
    }

    /// Fails unless `matrix` was produced by this state.
    pub fn check(&self, matrix: &FeatureMatrix) -> TrainResult<()> {
        if matrix.fingerprint != self.fingerprint {
            return Err(TrainError::Encoding(format!(
                "matrix was encoded with state {}, expected {}",
                matrix.fingerprint, self.fingerprint
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub rows: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
    pub fingerprint: String,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.feature_names.len()
    }

    pub fn select(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            feature_names: self.feature_names.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodedFeatureMatrix {
    pub matrix: FeatureMatrix,
    pub state: EncoderState,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureEncoder {
    spec: FeatureSpec,
}

impl FeatureEncoder {
    pub fn new(spec: FeatureSpec) -> Self {
        Self { spec }
    }

    pub fn fit(&self, records: &[RaceEntryRecord]) -> TrainResult<EncodedFeatureMatrix> {
        if records.is_empty() {
            return Err(TrainError::Encoding("no records to fit on".to_string()));
        }
        for (idx, record) in records.iter().enumerate() {
            record
                .validate()
                .map_err(|reason| TrainError::Encoding(format!("record {idx}: {reason}")))?;
        }

        let categories = CategoryTables {
            driver: CategoryTable::fit(records.iter().map(|r| r.driver.as_str())),
            team: CategoryTable::fit(records.iter().map(|r| r.team.as_str())),
            circuit: CategoryTable::fit(records.iter().map(|r| r.circuit.as_str())),
        };
        let raw: Vec<Vec<f64>> = records
            .iter()
            .map(|r| raw_row(&self.spec, &categories, r))
            .collect();
        let scaler = ScalerState::fit(&raw, self.spec.len());
        let fingerprint = fingerprint_of(&self.spec, &categories, &scaler)?;

        let state = EncoderState {
            features: self.spec.clone(),
            categories,
            scaler,
            fingerprint,
        };
        let mut rows = raw;
        for row in &mut rows {
            state.scaler.apply(row);
        }

        info!(
            rows = rows.len(),
            columns = state.features.len(),
            drivers = state.categories.driver.values().len(),
            teams = state.categories.team.values().len(),
            circuits = state.categories.circuit.values().len(),
            fingerprint = %state.fingerprint,
            "fitted feature encoder"
        );
        Ok(EncodedFeatureMatrix {
            matrix: FeatureMatrix {
                rows,
                feature_names: state.feature_names(),
                fingerprint: state.fingerprint.clone(),
            },
            state,
        })
    }
}

pub fn transform(records: &[RaceEntryRecord], state: &EncoderState) -> TrainResult<FeatureMatrix> {
    state.transform(records)
}

fn raw_row(spec: &FeatureSpec, categories: &CategoryTables, record: &RaceEntryRecord) -> Vec<f64> {
    spec.columns()
        .iter()
        .map(|feature| match feature {
            Feature::QualifyingPosition => record.qualifying_position as f64,
            Feature::WeatherClear => {
                if record.weather_clear {
                    1.0
                } else {
                    0.0
                }
            }
            Feature::TrackTemperature => record.track_temperature,
            Feature::TireStrategy => record.tire_strategy.stops() as f64,
            Feature::AvgSpeed => record.avg_speed,
            Feature::PitStopTime => record.pit_stop_time,
            Feature::DriverSkill => record.driver_skill,
            Feature::TeamPerformance => record.team_performance,
            Feature::CircuitFactor => record.circuit_factor,
            Feature::DriverEncoded => categories.driver.code(&record.driver),
            Feature::TeamEncoded => categories.team.code(&record.team),
            Feature::CircuitEncoded => categories.circuit.code(&record.circuit),
        })
        .collect()
}

fn fingerprint_of(
    features: &FeatureSpec,
    categories: &CategoryTables,
    scaler: &ScalerState,
) -> TrainResult<String> {
    let payload = serde_json::to_vec(&(features, categories, scaler))
        .map_err(|err| TrainError::Encoding(format!("fingerprint encoder state: {err}")))?;
    let digest = Sha256::digest(&payload);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
