// Manifest is written last; existing files are never replaced.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::encoder::{CategoryTables, EncoderState, FeatureSpec, ScalerState};
use crate::error::{TrainError, TrainResult};
use crate::estimator::{Algorithm, FittedModel, Task};
use crate::metrics::MetricsBundle;
use crate::sample_gen::RaceEntryRecord;
use crate::selector::{SelectedModels, SelectionPolicy};
use crate::training::{CandidateModel, SkippedCandidate};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
const MANIFEST_PREFIX: &str = "ml_metadata_";
const EXT: &str = "json";

static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedModelEntry {
    pub algorithm: Algorithm,
    pub file: String,
    pub metrics: MetricsBundle,
    pub selection_policy: SelectionPolicy,
    pub policy_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub task: Task,
    pub algorithm: Algorithm,
    pub metrics: MetricsBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRunManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub sample_count: usize,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub seed: Option<u64>,
    pub feature_list: Vec<String>,
    pub encoder_file: String,
    pub scaler_file: String,
    pub encoder_fingerprint: String,
    /// Keyed by task name.
    pub selected_models: BTreeMap<String, SelectedModelEntry>,
    pub candidates: Vec<CandidateSummary>,
    pub skipped: Vec<SkippedCandidate>,
    pub files_saved: Vec<String>,
}

impl TrainingRunManifest {
    pub fn selected(&self, task: Task) -> Option<&SelectedModelEntry> {
        self.selected_models.get(task.name())
    }
}

/// Run-level facts recorded in the manifest next to the selected models.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary<'a> {
    pub sample_count: usize,
    pub train_rows: usize,
    pub eval_rows: usize,
    pub seed: Option<u64>,
    pub candidates: &'a [CandidateModel],
    pub skipped: &'a [SkippedCandidate],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ModelArtifact {
    schema_version: u32,
    run_id: String,
    task: Task,
    algorithm: Algorithm,
    encoder_fingerprint: String,
    feature_list: Vec<String>,
    model: FittedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EncoderArtifact {
    run_id: String,
    fingerprint: String,
    features: FeatureSpec,
    categories: CategoryTables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScalerArtifact {
    run_id: String,
    fingerprint: String,
    feature_list: Vec<String>,
    scaler: ScalerState,
}

pub fn model_file_name(task: Task, run_id: &str) -> String {
    format!("{}_{run_id}.{EXT}", task.file_stem())
}

pub fn encoder_file_name(run_id: &str) -> String {
    format!("encoders_{run_id}.{EXT}")
}

pub fn scaler_file_name(run_id: &str) -> String {
    format!("scaler_{run_id}.{EXT}")
}

pub fn manifest_file_name(run_id: &str) -> String {
    format!("{MANIFEST_PREFIX}{run_id}.{EXT}")
}

pub fn validate_run_id(run_id: &str) -> TrainResult<()> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(TrainError::persist(
            Path::new(run_id),
            "run id must be non-empty and use only [A-Za-z0-9_-]",
        ))
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    models_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn persist(
        &self,
        selected: &SelectedModels,
        encoder: &EncoderState,
        run_id: &str,
        summary: &RunSummary<'_>,
    ) -> TrainResult<TrainingRunManifest> {
        validate_run_id(run_id)?;
        for (task, chosen) in selected.iter() {
            if chosen.candidate.encoder_fingerprint != encoder.fingerprint() {
                return Err(TrainError::Encoding(format!(
                    "{task} model was trained against encoder {} but the run encoder is {}",
                    chosen.candidate.encoder_fingerprint,
                    encoder.fingerprint()
                )));
            }
        }
        fs::create_dir_all(&self.models_dir)
            .map_err(|err| TrainError::persist(&self.models_dir, err))?;

        let feature_list = encoder.feature_names();
        let mut files_saved = Vec::new();

        let encoder_file = encoder_file_name(run_id);
        self.write_once(
            &encoder_file,
            &EncoderArtifact {
                run_id: run_id.to_string(),
                fingerprint: encoder.fingerprint().to_string(),
                features: encoder.features().clone(),
                categories: encoder.categories().clone(),
            },
        )?;
        files_saved.push(encoder_file.clone());

        let scaler_file = scaler_file_name(run_id);
        self.write_once(
            &scaler_file,
            &ScalerArtifact {
                run_id: run_id.to_string(),
                fingerprint: encoder.fingerprint().to_string(),
                feature_list: feature_list.clone(),
                scaler: encoder.scaler().clone(),
            },
        )?;
        files_saved.push(scaler_file.clone());

        let mut selected_models = BTreeMap::new();
        for (task, chosen) in selected.iter() {
            let file = model_file_name(task, run_id);
            self.write_once(
                &file,
                &ModelArtifact {
                    schema_version: MANIFEST_SCHEMA_VERSION,
                    run_id: run_id.to_string(),
                    task,
                    algorithm: chosen.candidate.algorithm,
                    encoder_fingerprint: encoder.fingerprint().to_string(),
                    feature_list: feature_list.clone(),
                    model: chosen.candidate.model.clone(),
                },
            )?;
            files_saved.push(file.clone());
            selected_models.insert(
                task.name().to_string(),
                SelectedModelEntry {
                    algorithm: chosen.candidate.algorithm,
                    file,
                    metrics: chosen.candidate.metrics.clone(),
                    selection_policy: chosen.policy,
                    policy_description: chosen.policy.describe().to_string(),
                },
            );
        }

        let manifest = TrainingRunManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            sample_count: summary.sample_count,
            train_rows: summary.train_rows,
            eval_rows: summary.eval_rows,
            seed: summary.seed,
            feature_list,
            encoder_file,
            scaler_file,
            encoder_fingerprint: encoder.fingerprint().to_string(),
            selected_models,
            candidates: summary
                .candidates
                .iter()
                .map(|c| CandidateSummary {
                    task: c.task,
                    algorithm: c.algorithm,
                    metrics: c.metrics.clone(),
                })
                .collect(),
            skipped: summary.skipped.to_vec(),
            files_saved,
        };
        let manifest_file = manifest_file_name(run_id);
        self.write_once(&manifest_file, &manifest)?;
        info!(run_id, dir = %self.models_dir.display(), "run persisted");
        Ok(manifest)
    }

    fn write_once<T: Serialize>(&self, name: &str, value: &T) -> TrainResult<()> {
        let path = self.models_dir.join(name);
        let mut bytes =
            serde_json::to_vec_pretty(value).map_err(|err| TrainError::persist(&path, err))?;
        bytes.push(b'\n');

        let tmp = temp_path(&path);
        fs::write(&tmp, &bytes).map_err(|err| TrainError::persist(&tmp, err))?;
        // hard_link never replaces an existing target.
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {
                debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let existing = fs::read(&path).map_err(|err| TrainError::persist(&path, err))?;
                if existing == bytes {
                    debug!(path = %path.display(), "identical file already present");
                    Ok(())
                } else {
                    Err(TrainError::persist(
                        &path,
                        "already exists with different contents",
                    ))
                }
            }
            Err(err) => Err(TrainError::persist(&path, err)),
        }
    }
}

// Unique per process and per call, so concurrent writers never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{n}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> TrainResult<T> {
    let raw = fs::read(path).map_err(|err| TrainError::persist(path, err))?;
    serde_json::from_slice(&raw).map_err(|err| TrainError::persist(path, err))
}

pub fn read_manifest(models_dir: &Path, run_id: &str) -> TrainResult<TrainingRunManifest> {
    validate_run_id(run_id)?;
    read_json(&models_dir.join(manifest_file_name(run_id)))
}

/// Run id of the lexicographically greatest manifest in `models_dir`.
pub fn latest_run_id(models_dir: &Path) -> TrainResult<Option<String>> {
    let entries = match fs::read_dir(models_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(TrainError::persist(models_dir, err)),
    };
    let suffix = format!(".{EXT}");
    let mut latest: Option<String> = None;
    for entry in entries {
        let entry = entry.map_err(|err| TrainError::persist(models_dir, err))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(run_id) = name
            .strip_prefix(MANIFEST_PREFIX)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        if validate_run_id(run_id).is_err() {
            continue;
        }
        if latest.as_deref().is_none_or(|current| run_id > current) {
            latest = Some(run_id.to_string());
        }
    }
    Ok(latest)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RacePrediction {
    pub position: f64,
    pub win_probability: f64,
    pub podium_probability: f64,
}

/// A persisted run read back for scoring.
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub manifest: TrainingRunManifest,
    pub encoder: EncoderState,
    models: BTreeMap<Task, FittedModel>,
}

impl LoadedRun {
    pub fn model(&self, task: Task) -> Option<&FittedModel> {
        self.models.get(&task)
    }

    pub fn predict(&self, record: &RaceEntryRecord) -> TrainResult<RacePrediction> {
        let row = self.encoder.transform_record(record)?;
        let score = |task: Task| -> TrainResult<f64> {
            self.models
                .get(&task)
                .map(|m| m.predict(&row))
                .ok_or(TrainError::Selection { task })
        };
        Ok(RacePrediction {
            position: score(Task::Position)?,
            win_probability: score(Task::Winner)?,
            podium_probability: score(Task::Podium)?,
        })
    }
}

pub fn load_run(models_dir: &Path, run_id: &str) -> TrainResult<LoadedRun> {
    let manifest = read_manifest(models_dir, run_id)?;
    let mismatch = |path: &Path, what: &str| {
        TrainError::persist(path, format!("{what} does not match the manifest"))
    };

    let encoder_path = models_dir.join(&manifest.encoder_file);
    let encoder_art: EncoderArtifact = read_json(&encoder_path)?;
    if encoder_art.fingerprint != manifest.encoder_fingerprint {
        return Err(mismatch(&encoder_path, "encoder fingerprint"));
    }
    let scaler_path = models_dir.join(&manifest.scaler_file);
    let scaler_art: ScalerArtifact = read_json(&scaler_path)?;
    if scaler_art.fingerprint != manifest.encoder_fingerprint {
        return Err(mismatch(&scaler_path, "scaler fingerprint"));
    }
    let encoder = EncoderState::from_parts(
        encoder_art.features,
        encoder_art.categories,
        scaler_art.scaler,
        &manifest.encoder_fingerprint,
    )?;
    if encoder.feature_names() != manifest.feature_list {
        return Err(mismatch(&encoder_path, "feature list"));
    }

    let mut models = BTreeMap::new();
    for task in Task::ALL {
        let entry = manifest
            .selected(task)
            .ok_or_else(|| mismatch(&models_dir.join(manifest_file_name(run_id)), task.name()))?;
        let path = models_dir.join(&entry.file);
        let artifact: ModelArtifact = read_json(&path)?;
        if artifact.task != task
            || artifact.algorithm != entry.algorithm
            || artifact.encoder_fingerprint != manifest.encoder_fingerprint
        {
            return Err(mismatch(&path, "model artifact"));
        }
        models.insert(task, artifact.model);
    }
    debug!(run_id, "run loaded");

    Ok(LoadedRun {
        manifest,
        encoder,
        models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_share_the_run_id() {
        assert_eq!(
            model_file_name(Task::Position, "20250101_120000"),
            "position_model_20250101_120000.json"
        );
        assert_eq!(encoder_file_name("r1"), "encoders_r1.json");
        assert_eq!(scaler_file_name("r1"), "scaler_r1.json");
        assert_eq!(manifest_file_name("r1"), "ml_metadata_r1.json");
    }

    #[test]
    fn run_ids_are_restricted() {
        assert!(validate_run_id("20250101_120000").is_ok());
        assert!(validate_run_id("nightly-3").is_ok());
        assert!(validate_run_id("").is_err());
        assert!(validate_run_id("../escape").is_err());
        assert!(validate_run_id("a b").is_err());
    }

    #[test]
    fn latest_run_is_lexicographic_max() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_run_id(dir.path()).unwrap(), None);
        for name in [
            "ml_metadata_20250101_000000.json",
            "ml_metadata_20250301_000000.json",
            "ml_metadata_20250201_000000.json",
            "ml_metadata_20251231_000000.json.tmp",
            "winner_model_20260101_000000.json",
        ] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        assert_eq!(
            latest_run_id(dir.path()).unwrap().as_deref(),
            Some("20250301_000000")
        );
    }

    #[test]
    fn missing_dir_has_no_runs() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_run_id(&dir.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn write_once_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        writer.write_once("x.json", &vec![1, 2, 3]).unwrap();
        writer.write_once("x.json", &vec![1, 2, 3]).unwrap();
        let err = writer.write_once("x.json", &vec![4]).unwrap_err();
        assert_eq!(err.stage(), "persist");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("x.json")]);
    }

    #[test]
    fn temp_names_are_unique_per_call() {
        let path = Path::new("/models/winner_model_a.json");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("winner_model_a.json."));
        assert!(name.ends_with(".tmp"));
        assert!(name.contains(&std::process::id().to_string()));
    }
}
