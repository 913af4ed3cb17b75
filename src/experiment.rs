use serde::{Deserialize, Serialize};

use crate::{Error, Result, Treatment};

/// Experiment definition as served by the SimpleAB API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    /// Salt for treatment bucketing. Changing it re-randomizes all assignments.
    pub allocation_randomization_token: String,
    /// Salt for the exposure gate. Independent of `allocation_randomization_token` so that
    /// exposure and treatment bucketing are not correlated.
    pub exposure_randomization_token: String,
    pub stages: Vec<ExperimentStage>,
    #[serde(default)]
    pub treatments: Vec<TreatmentDefinition>,
    #[serde(default)]
    pub overrides: Vec<Override>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStage {
    /// Stage name, e.g. `Beta` or `Prod`.
    pub stage: String,
    pub stage_dimensions: Vec<StageDimension>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDimension {
    pub dimension: String,
    pub enabled: bool,
    /// Percentage of traffic admitted to the experiment, in `[0, 100]`.
    pub exposure: f64,
    /// Evaluated in order. Allocations do not need to sum up to 100.
    #[serde(default)]
    pub treatment_allocations: Vec<TreatmentAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentAllocation {
    pub id: Treatment,
    /// Percentage of exposed traffic, in `[0, 100]`.
    pub allocation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentDefinition {
    pub id: Treatment,
}

/// Forced treatments for a single allocation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    pub allocation_key: String,
    pub stage_overrides: Vec<StageOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOverride {
    pub stage: String,
    pub enabled: bool,
    pub dimensions: Vec<String>,
    pub treatment: Treatment,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

impl<T> From<T> for TryParse<T> {
    fn from(value: T) -> Self {
        TryParse::Parsed(value)
    }
}

impl Experiment {
    pub fn find_stage(&self, stage: &str) -> Result<&ExperimentStage> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .ok_or_else(|| Error::StageNotFound {
                experiment_id: self.id.clone(),
                stage: stage.to_owned(),
            })
    }

    pub fn find_treatment(&self, treatment: Treatment) -> Result<&TreatmentDefinition> {
        self.treatments
            .iter()
            .find(|t| t.id == treatment)
            .ok_or_else(|| Error::TreatmentNotFound {
                experiment_id: self.id.clone(),
                treatment: treatment.to_string(),
            })
    }
}

impl ExperimentStage {
    pub fn find_dimension(&self, dimension: &str) -> Result<&StageDimension> {
        self.stage_dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .ok_or_else(|| Error::DimensionNotFound {
                stage: self.stage.clone(),
                dimension: dimension.to_owned(),
            })
    }
}
