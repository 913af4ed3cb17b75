use simpleab::{Metric, Segment};

pub fn main() -> simpleab::Result<()> {
    let api_key = std::env::var("SIMPLEAB_API_KEY").unwrap();
    let client = simpleab::ClientConfig::from_api_key(api_key)
        .preload_experiments(["checkout-button"])
        .to_client()?;

    // Upload metrics every minute in the background.
    let flush_thread = client.start_flush_thread()?;

    let segment = Segment::new("US", "CA", "mobile");
    let treatment =
        client.get_treatment_with_segment("checkout-button", "Prod", &segment, "user-42");
    println!("Treatment: {treatment}");

    if let Some(dimension) = client
        .cached_experiments()
        .get("checkout-button")
        .and_then(|experiment| experiment.resolve_dimension("Prod", &segment).ok().flatten())
    {
        client.track_metric(&Metric {
            experiment_id: "checkout-button".to_owned(),
            stage: "Prod".to_owned(),
            dimension,
            treatment: treatment.to_string(),
            metric_name: "purchases".to_owned(),
            metric_value: 1.0,
            aggregation_type: None,
        })?;
    }

    flush_thread.shutdown()?;
    let summary = client.shutdown();
    println!("Uploaded {} metrics", summary.records);

    Ok(())
}
