use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use simpleab::{
    experiment::Experiment, AggregatedValue, AggregationType, Client, ClientConfig, Error,
    FetchExperimentsResponse, Metric, MetricRecord, Result, Segment, SegmentMetric, Stage,
    Treatment,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fixture() -> Vec<Experiment> {
    let f = File::open("tests/data/experiments.json")
        .expect("Failed to open tests/data/experiments.json");
    serde_json::from_reader(BufReader::new(f)).unwrap()
}

struct TestClient {
    client: Client,
    fetches: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<MetricRecord>>>,
}

fn test_client() -> TestClient {
    init();

    let experiments = fixture();
    let fetches = Arc::new(AtomicUsize::new(0));
    let sent = Arc::new(Mutex::new(Vec::new()));

    let fetcher = {
        let fetches = fetches.clone();
        move |ids: &[String]| -> Result<FetchExperimentsResponse> {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(experiments
                .iter()
                .filter(|e| ids.contains(&e.id))
                .cloned()
                .collect())
        }
    };
    let sender = {
        let sent = sent.clone();
        move |batch: &[MetricRecord]| -> Result<()> {
            sent.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    };

    TestClient {
        client: Client::with_remote(
            ClientConfig::from_api_key("test-key"),
            Arc::new(fetcher),
            Arc::new(sender),
        ),
        fetches,
        sent,
    }
}

fn metric(
    dimension: &str,
    treatment: &str,
    metric_name: &str,
    metric_value: f64,
    aggregation_type: Option<&str>,
) -> Metric {
    Metric {
        experiment_id: "checkout-button".to_owned(),
        stage: "Prod".to_owned(),
        dimension: dimension.to_owned(),
        treatment: treatment.to_owned(),
        metric_name: metric_name.to_owned(),
        metric_value,
        aggregation_type: aggregation_type.map(str::to_owned),
    }
}

#[test]
fn assignment_is_stable_across_clients() {
    let a = test_client();
    let b = test_client();

    for i in 0..200 {
        let key = format!("user-{i}");
        let first = a.client.get_treatment("checkout-button", "Prod", "GLO-all", &key);
        assert_ne!(first, Treatment::None, "full exposure must assign {key}");
        assert_eq!(
            first,
            a.client.get_treatment("checkout-button", "Prod", "GLO-all", &key)
        );
        assert_eq!(
            first,
            b.client.get_treatment("checkout-button", "Prod", "GLO-all", &key)
        );
    }
}

#[test]
fn assignment_spreads_over_all_treatments() {
    let t = test_client();

    let seen: HashSet<Treatment> = (0..1000)
        .map(|i| {
            t.client
                .get_treatment("checkout-button", "Prod", "US-all", &format!("user-{i}"))
        })
        .collect();
    let expected: HashSet<Treatment> = ["C", "T1", "T2"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn override_wins_in_listed_dimensions_only() {
    let t = test_client();
    let t2 = Treatment::variant(2).unwrap();

    assert_eq!(
        t.client.get_treatment("checkout-button", "Prod", "US-all", "qa-user"),
        t2
    );
    assert_eq!(
        t.client.get_treatment("checkout-button", "Prod", "GLO-all", "qa-user"),
        t2
    );
    // Beta has no T2 allocation, so hashing can never produce it.
    assert_ne!(
        t.client.get_treatment("checkout-button", "Beta", "GLO-all", "qa-user"),
        t2
    );
}

#[test]
fn gated_visitors_get_no_treatment() {
    let t = test_client();

    for i in 0..100 {
        let key = format!("user-{i}");
        assert_eq!(
            t.client.get_treatment("pricing-page", "Prod", "GLO-all", &key),
            Treatment::None
        );
        assert_eq!(
            t.client.get_treatment("checkout-button", "Prod", "US-mobile", &key),
            Treatment::None
        );
    }
}

#[test]
fn lookup_failures_are_errors_but_not_for_get_treatment() {
    let t = test_client();

    assert_eq!(
        t.client.get_treatment("missing", "Prod", "GLO-all", "user-1"),
        Treatment::None
    );
    assert!(matches!(
        t.client.try_get_treatment("missing", "Prod", "GLO-all", "user-1"),
        Err(Error::ExperimentNotFound(id)) if id == "missing"
    ));
    assert!(matches!(
        t.client.try_get_treatment("checkout-button", "Prod", "FR-all", "user-1"),
        Err(Error::DimensionNotFound { .. })
    ));
    assert!(matches!(
        t.client.try_get_treatment("checkout-button", "Gamma", "GLO-all", "user-1"),
        Err(Error::StageNotFound { .. })
    ));
}

#[test]
fn experiments_are_fetched_once() {
    let t = test_client();

    for i in 0..50 {
        t.client
            .get_treatment("checkout-button", "Prod", "GLO-all", &format!("user-{i}"));
    }
    assert_eq!(t.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(t.client.cached_experiments().len(), 1);
}

#[test]
fn segment_picks_most_specific_enabled_dimension() {
    let t = test_client();

    // US-mobile exists but is disabled, so US-all is the best match.
    let us_mobile = Segment::new("US", "CA", "mobile");
    let elsewhere = Segment::new("FR", "IDF", "desktop");

    for i in 0..100 {
        let key = format!("user-{i}");
        assert_eq!(
            t.client
                .get_treatment_with_segment("checkout-button", "Prod", &us_mobile, &key),
            t.client.get_treatment("checkout-button", "Prod", "US-all", &key)
        );
        assert_eq!(
            t.client
                .get_treatment_with_segment("checkout-button", "Prod", &elsewhere, &key),
            t.client.get_treatment("checkout-button", "Prod", "GLO-all", &key)
        );
    }

    let beta_only_global = Segment::new("US", "CA", "mobile");
    assert_ne!(
        t.client
            .get_treatment_with_segment("checkout-button", "Beta", &beta_only_global, "user-1"),
        Treatment::None
    );
}

#[test]
fn tracked_metrics_are_aggregated_and_flushed() {
    let t = test_client();

    for value in [1.0, 2.0, 3.0] {
        t.client
            .track_metric(&metric("US-all", "C", "purchases", value, None))
            .unwrap();
        t.client
            .track_metric(&metric("US-all", "C", "cart-size", value, Some("average")))
            .unwrap();
    }
    for value in 1..=100 {
        t.client
            .track_metric(&metric(
                "US-all",
                "T1",
                "latency",
                f64::from(value),
                Some("percentile"),
            ))
            .unwrap();
    }

    let summary = t.client.flush();
    assert_eq!(summary.records, 3);
    assert_eq!(summary.batches_sent, 1);
    assert_eq!(summary.batches_failed, 0);
    assert!(t.client.buffered_metrics().is_empty());

    let sent = t.sent.lock().unwrap();
    let find = |name: &str| sent.iter().find(|r| r.metric_name == name).unwrap();

    let purchases = find("purchases");
    assert_eq!(purchases.stage, Stage::Prod);
    assert_eq!(purchases.treatment, Treatment::Control);
    assert_eq!(purchases.aggregation_type, AggregationType::Sum);
    assert_eq!(purchases.value, AggregatedValue::Value { value: 6.0 });
    assert_eq!(purchases.count, 3);

    assert_eq!(find("cart-size").value, AggregatedValue::Value { value: 2.0 });
    assert_eq!(
        find("latency").value,
        AggregatedValue::Percentiles {
            p50: 50.0,
            p90: 90.0,
            p99: 99.0
        }
    );
    assert_eq!(find("latency").count, 100);
}

#[test]
fn segment_metrics_use_the_resolved_dimension() {
    let t = test_client();

    t.client
        .track_metric_with_segment(&SegmentMetric {
            experiment_id: "checkout-button".to_owned(),
            stage: "Prod".to_owned(),
            segment: Segment::new("DE", "BE", "desktop"),
            treatment: "T2".to_owned(),
            metric_name: "purchases".to_owned(),
            metric_value: 1.0,
            aggregation_type: None,
        })
        .unwrap();

    let buffered = t.client.buffered_metrics();
    assert_eq!(buffered.len(), 1);
    assert_eq!(buffered.keys().next().unwrap().dimension, "GLO-all");
}

#[test]
fn invalid_metrics_are_rejected() {
    let t = test_client();

    let negative_sum = t
        .client
        .track_metric(&metric("US-all", "C", "purchases", -1.0, None));
    assert!(matches!(negative_sum, Err(ref err) if err.is_validation()));

    let bad_treatment = t
        .client
        .track_metric(&metric("US-all", "T0", "purchases", 1.0, None));
    assert!(matches!(bad_treatment, Err(ref err) if err.is_validation()));

    let bad_aggregation = t
        .client
        .track_metric(&metric("US-all", "C", "purchases", 1.0, Some("median")));
    assert!(matches!(bad_aggregation, Err(ref err) if err.is_validation()));

    let unknown_treatment = t
        .client
        .track_metric(&metric("US-all", "T7", "purchases", 1.0, None));
    assert!(matches!(
        unknown_treatment,
        Err(Error::TreatmentNotFound { .. })
    ));

    // Negative values are fine when they are not summed.
    t.client
        .track_metric(&metric("US-all", "C", "delta", -1.0, Some("average")))
        .unwrap();
    assert_eq!(t.client.buffered_metrics().len(), 1);
}

#[test]
fn metrics_without_treatment_are_ignored() {
    let t = test_client();

    let mut m = metric("US-all", "", "purchases", 1.0, None);
    m.experiment_id = "missing".to_owned();
    t.client.track_metric(&m).unwrap();

    assert!(t.client.buffered_metrics().is_empty());
    assert_eq!(t.fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_flushes_remaining_metrics() {
    let t = test_client();

    t.client
        .track_metric(&metric("GLO-all", "T1", "purchases", 2.0, None))
        .unwrap();
    let summary = t.client.shutdown();

    assert_eq!(summary.records, 1);
    assert_eq!(t.sent.lock().unwrap().len(), 1);
}
