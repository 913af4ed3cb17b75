use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    experiment::{Experiment, ExperimentStage},
    Result,
};

/// Visitor segment used to pick a targeting dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub country_code: String,
    pub region: String,
    pub device_type: String,
}

impl Segment {
    pub fn new(
        country_code: impl Into<String>,
        region: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Segment {
        Segment {
            country_code: country_code.into(),
            region: region.into(),
            device_type: device_type.into(),
        }
    }

    /// Dimension names this segment can match, most specific first.
    fn candidate_dimensions(&self) -> [String; 6] {
        let Segment {
            country_code,
            region,
            device_type,
        } = self;
        [
            format!("{country_code}-{device_type}"),
            format!("{country_code}-all"),
            format!("{region}-{device_type}"),
            format!("{region}-all"),
            format!("GLO-{device_type}"),
            "GLO-all".to_owned(),
        ]
    }
}

impl ExperimentStage {
    /// Most specific enabled dimension matching `segment`, if any.
    pub fn resolve_dimension(&self, segment: &Segment) -> Option<String> {
        let enabled: HashSet<&str> = self
            .stage_dimensions
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.dimension.as_str())
            .collect();

        segment
            .candidate_dimensions()
            .into_iter()
            .find(|candidate| enabled.contains(candidate.as_str()))
    }
}

impl Experiment {
    /// Resolve `segment` to a dimension of `stage`.
    ///
    /// `Ok(None)` means no enabled dimension matches and the visitor gets no treatment. An unknown
    /// stage is an error.
    pub fn resolve_dimension(&self, stage: &str, segment: &Segment) -> Result<Option<String>> {
        Ok(self.find_stage(stage)?.resolve_dimension(segment))
    }
}
