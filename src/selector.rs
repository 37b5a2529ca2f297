use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{TrainError, TrainResult};
use crate::estimator::Task;
use crate::training::CandidateModel;

/// How the promoted candidate is chosen for a task. Every policy ends with
/// the fixed algorithm priority so full ties never depend on input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    MinMae,
    MaxAccuracyThenF1,
}

impl SelectionPolicy {
    pub fn for_task(task: Task) -> Self {
        match task {
            Task::Position => SelectionPolicy::MinMae,
            Task::Winner | Task::Podium => SelectionPolicy::MaxAccuracyThenF1,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            SelectionPolicy::MinMae => "min mae; tie: algorithm priority",
            SelectionPolicy::MaxAccuracyThenF1 => {
                "max accuracy; tie: max f1; tie: algorithm priority"
            }
        }
    }
}

/// Orders two candidates of the same task; `Less` means `a` is preferred.
pub fn compare_candidates(a: &CandidateModel, b: &CandidateModel) -> Ordering {
    let by_metrics = match SelectionPolicy::for_task(a.task) {
        SelectionPolicy::MinMae => {
            let mae = |c: &CandidateModel| c.metrics.mae().unwrap_or(f64::INFINITY);
            mae(a).total_cmp(&mae(b))
        }
        SelectionPolicy::MaxAccuracyThenF1 => {
            let acc = |c: &CandidateModel| c.metrics.accuracy().unwrap_or(f64::NEG_INFINITY);
            let f1 = |c: &CandidateModel| c.metrics.f1().unwrap_or(f64::NEG_INFINITY);
            acc(b)
                .total_cmp(&acc(a))
                .then_with(|| f1(b).total_cmp(&f1(a)))
        }
    };
    by_metrics.then_with(|| a.algorithm.priority().cmp(&b.algorithm.priority()))
}

#[derive(Debug, Clone)]
pub struct SelectedModel {
    pub policy: SelectionPolicy,
    pub candidate: CandidateModel,
}

#[derive(Debug, Clone)]
pub struct SelectedModels {
    pub position: SelectedModel,
    pub winner: SelectedModel,
    pub podium: SelectedModel,
}

impl SelectedModels {
    pub fn get(&self, task: Task) -> &SelectedModel {
        match task {
            Task::Position => &self.position,
            Task::Winner => &self.winner,
            Task::Podium => &self.podium,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Task, &SelectedModel)> {
        Task::ALL.into_iter().map(move |task| (task, self.get(task)))
    }
}

pub fn select(candidates: &[CandidateModel]) -> TrainResult<SelectedModels> {
    let pick = |task: Task| -> TrainResult<SelectedModel> {
        let best = candidates
            .iter()
            .filter(|c| c.task == task)
            .min_by(|a, b| compare_candidates(a, b))
            .ok_or(TrainError::Selection { task })?;
        info!(
            task = %task,
            algorithm = %best.algorithm,
            metrics = %best.metrics.summary(),
            "selected"
        );
        Ok(SelectedModel {
            policy: SelectionPolicy::for_task(task),
            candidate: best.clone(),
        })
    };

    Ok(SelectedModels {
        position: pick(Task::Position)?,
        winner: pick(Task::Winner)?,
        podium: pick(Task::Podium)?,
    })
}
