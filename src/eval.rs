use crate::{
    experiment::{Experiment, TreatmentAllocation},
    sharder::Sharder,
    Result, Treatment,
};

impl Experiment {
    /// Assign `allocation_key` to a treatment in the given stage and dimension.
    ///
    /// Returns `Ok(Treatment::None)` when the visitor is legitimately excluded (disabled
    /// dimension, outside of exposure, unallocated remainder). Returns an error when the stage or
    /// dimension does not exist.
    ///
    /// The result only depends on the arguments, so repeated calls always agree.
    pub fn assign(
        &self,
        stage: &str,
        dimension: &str,
        allocation_key: &str,
        sharder: &impl Sharder,
    ) -> Result<Treatment> {
        if let Some(treatment) = self.find_override(stage, dimension, allocation_key) {
            return Ok(treatment);
        }

        let stage_dimension = self.find_stage(stage)?.find_dimension(dimension)?;

        if !stage_dimension.enabled {
            return Ok(Treatment::None);
        }

        let exposure_hash =
            sharder.hash_int(&format!("{}{}", allocation_key, self.exposure_randomization_token));
        if !is_in_exposure_bucket(exposure_hash, stage_dimension.exposure) {
            return Ok(Treatment::None);
        }

        let allocation_fraction = sharder.hash_fraction(&format!(
            "{}{}",
            allocation_key, self.allocation_randomization_token
        ));
        Ok(determine_treatment(
            allocation_fraction,
            &stage_dimension.treatment_allocations,
        ))
    }

    /// First enabled stage override for `allocation_key` that covers `dimension`.
    fn find_override(
        &self,
        stage: &str,
        dimension: &str,
        allocation_key: &str,
    ) -> Option<Treatment> {
        self.overrides
            .iter()
            .filter(|o| o.allocation_key == allocation_key)
            .flat_map(|o| &o.stage_overrides)
            .find(|so| {
                so.stage == stage && so.enabled && so.dimensions.iter().any(|d| d == dimension)
            })
            .map(|so| so.treatment)
    }
}

/// Return `true` if a 32-bit exposure hash falls within `exposure` percent of traffic.
fn is_in_exposure_bucket(hash: u32, exposure: f64) -> bool {
    // Exact boundaries are decided explicitly instead of trusting float division.
    if hash == u32::MAX && exposure == 100.0 {
        return true;
    }
    if hash == 0 && exposure == 0.0 {
        return false;
    }
    f64::from(hash) / f64::from(u32::MAX) < exposure / 100.0
}

/// Walk allocations in order and pick the first whose cumulative boundary exceeds `fraction`.
fn determine_treatment(fraction: f64, allocations: &[TreatmentAllocation]) -> Treatment {
    let mut cumulative = 0.0;
    for allocation in allocations {
        cumulative += allocation.allocation / 100.0;
        if fraction < cumulative {
            return allocation.id;
        }
    }
    Treatment::None
}
