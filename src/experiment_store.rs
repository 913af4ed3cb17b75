use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use crate::{
    experiment::{Experiment, TryParse},
    remote::{ExperimentFetcher, FETCH_BATCH_SIZE},
    Error, Result,
};

/// `ExperimentStore` caches experiment definitions by identifier and fetches missing ones from
/// the remote service.
///
/// Readers receive an `Arc` snapshot of a definition, so a concurrent refresh never changes an
/// experiment in the middle of an assignment. Refreshed definitions replace cached ones
/// completely.
pub struct ExperimentStore {
    experiments: RwLock<HashMap<String, Arc<Experiment>>>,
    fetcher: Arc<dyn ExperimentFetcher + Send + Sync>,
    /// Serializes fetches, so concurrent misses for the same experiment issue a single request.
    fetch_lock: Mutex<()>,
}

impl ExperimentStore {
    pub fn new(fetcher: Arc<dyn ExperimentFetcher + Send + Sync>) -> Self {
        Self {
            experiments: RwLock::new(HashMap::new()),
            fetcher,
            fetch_lock: Mutex::new(()),
        }
    }

    /// Get experiment from the cache, fetching it on a miss.
    ///
    /// # Errors
    ///
    /// - [`Error::ExperimentNotFound`] if the remote service does not know the experiment.
    /// - Any error returned by the fetcher.
    pub fn get(&self, experiment_id: &str) -> Result<Arc<Experiment>> {
        if let Some(experiment) = self.get_cached(experiment_id) {
            return Ok(experiment);
        }

        let _guard = self.fetch_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have fetched it while we were waiting for the lock.
        if let Some(experiment) = self.get_cached(experiment_id) {
            return Ok(experiment);
        }

        self.fetch(&[experiment_id.to_owned()])?;

        self.get_cached(experiment_id)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_owned()))
    }

    pub fn get_cached(&self, experiment_id: &str) -> Option<Arc<Experiment>> {
        // Only a panicking writer can poison the lock and the map stays consistent in that case
        // (inserts are atomic), so reading through the poison is fine.
        let experiments = self
            .experiments
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        experiments.get(experiment_id).cloned()
    }

    /// Fetch `experiment_ids` in batches and store whatever the service returns.
    ///
    /// Stops at the first failed batch. Batches fetched before the failure stay cached.
    pub fn load(&self, experiment_ids: &[String]) -> Result<()> {
        let _guard = self.fetch_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.fetch(experiment_ids)
    }

    /// Re-fetch every cached experiment.
    ///
    /// Failed batches are logged and skipped, so one bad batch does not hold back the others.
    pub fn refresh(&self) {
        let ids: Vec<String> = self.snapshot().into_keys().collect();
        if ids.is_empty() {
            return;
        }

        log::debug!(target: "simpleab", count = ids.len(); "refreshing experiments");
        let _guard = self.fetch_lock.lock().unwrap_or_else(PoisonError::into_inner);
        for batch in ids.chunks(FETCH_BATCH_SIZE) {
            if let Err(err) = self.fetch_batch(batch) {
                log::warn!(target: "simpleab", "error refreshing experiments: {err}");
            }
        }
    }

    /// Copy of the current cache contents, for diagnostics.
    pub fn snapshot(&self) -> HashMap<String, Arc<Experiment>> {
        self.experiments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Insert experiment directly, replacing any cached definition with the same identifier.
    pub fn insert(&self, experiment: Experiment) -> Option<Arc<Experiment>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let value = Arc::new(experiment);

        let mut experiments = self
            .experiments
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        experiments.insert(value.id.clone(), value)
    }

    fn fetch(&self, experiment_ids: &[String]) -> Result<()> {
        for batch in experiment_ids.chunks(FETCH_BATCH_SIZE) {
            self.fetch_batch(batch)?;
        }
        Ok(())
    }

    fn fetch_batch(&self, batch: &[String]) -> Result<()> {
        log::debug!(target: "simpleab", count = batch.len(); "fetching experiments");
        let response = self.fetcher.fetch_experiments(batch)?;

        for failure in &response.failures {
            log::warn!(target: "simpleab",
                failure:serde;
                "remote service failed to return an experiment");
        }

        for entry in response.success {
            match entry {
                TryParse::Parsed(experiment) => {
                    self.insert(experiment);
                }
                TryParse::ParseFailed(value) => {
                    log::warn!(target: "simpleab",
                        value:serde;
                        "failed to parse experiment, skipping it");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::ExperimentStore;
    use crate::{
        experiment::{Experiment, TryParse},
        remote::{ExperimentFetcher, FetchExperimentsResponse},
        Error, Result,
    };

    fn experiment(id: &str, token: &str) -> Experiment {
        Experiment {
            id: id.to_owned(),
            allocation_randomization_token: token.to_owned(),
            exposure_randomization_token: token.to_owned(),
            stages: vec![],
            treatments: vec![],
            overrides: vec![],
        }
    }

    /// Fetcher that knows every id except those starting with "missing", recording each call.
    fn recording_fetcher(
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    ) -> Arc<dyn ExperimentFetcher + Send + Sync> {
        Arc::new(move |ids: &[String]| -> Result<FetchExperimentsResponse> {
            calls.lock().unwrap().push(ids.to_vec());
            Ok(ids
                .iter()
                .filter(|id| !id.starts_with("missing"))
                .map(|id| experiment(id, "v1"))
                .collect())
        })
    }

    #[test]
    fn fetches_on_miss_and_caches() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let store = ExperimentStore::new(recording_fetcher(calls.clone()));

        assert_eq!(store.get("exp-1").unwrap().id, "exp-1");
        assert_eq!(store.get("exp-1").unwrap().id, "exp-1");
        assert_eq!(*calls.lock().unwrap(), vec![vec!["exp-1".to_owned()]]);
    }

    #[test]
    fn unknown_experiment_is_not_found() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let store = ExperimentStore::new(recording_fetcher(calls));

        assert!(matches!(
            store.get("missing-exp"),
            Err(Error::ExperimentNotFound(id)) if id == "missing-exp"
        ));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn fetch_errors_propagate() {
        let fetcher = |_ids: &[String]| -> Result<FetchExperimentsResponse> {
            Err(Error::Unauthorized)
        };
        let store = ExperimentStore::new(Arc::new(fetcher));
        assert!(matches!(store.get("exp-1"), Err(Error::Unauthorized)));
    }

    #[test]
    fn load_splits_into_batches_of_fifty() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let store = ExperimentStore::new(recording_fetcher(calls.clone()));

        let ids: Vec<String> = (0..120).map(|i| format!("exp-{i}")).collect();
        store.load(&ids).unwrap();

        let sizes: Vec<usize> = calls.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(store.snapshot().len(), 120);
    }

    #[test]
    fn skips_unparsable_experiments() {
        let fetcher = |_ids: &[String]| -> Result<FetchExperimentsResponse> {
            Ok(FetchExperimentsResponse {
                success: vec![
                    TryParse::Parsed(experiment("good", "v1")),
                    TryParse::ParseFailed(serde_json::json!({"id": "bad"})),
                ],
                failures: vec![serde_json::json!({"id": "other", "error": "boom"})],
            })
        };
        let store = ExperimentStore::new(Arc::new(fetcher));

        store.load(&["good".to_owned(), "bad".to_owned()]).unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.contains_key("good"));
        assert!(!snapshot.contains_key("bad"));
    }

    #[test]
    fn refresh_replaces_cached_definitions() {
        let version = Arc::new(AtomicUsize::new(1));
        let store = {
            let version = version.clone();
            let fetcher = move |ids: &[String]| -> Result<FetchExperimentsResponse> {
                let token = format!("v{}", version.load(Ordering::SeqCst));
                Ok(ids.iter().map(|id| experiment(id, &token)).collect())
            };
            ExperimentStore::new(Arc::new(fetcher))
        };

        let before = store.get("exp-1").unwrap();
        assert_eq!(before.allocation_randomization_token, "v1");

        version.store(2, Ordering::SeqCst);
        store.refresh();

        assert_eq!(store.get("exp-1").unwrap().allocation_randomization_token, "v2");
        // Snapshots taken before the refresh are unaffected.
        assert_eq!(before.allocation_randomization_token, "v1");
    }

    #[test]
    fn concurrent_misses_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = {
            let calls = calls.clone();
            Arc::new(ExperimentStore::new(Arc::new(
                move |ids: &[String]| -> Result<FetchExperimentsResponse> {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    Ok(ids.iter().map(|id| experiment(id, "v1")).collect())
                },
            )))
        };

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.get("exp-1").unwrap().id.clone())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "exp-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
