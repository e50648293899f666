use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

/// Register help text for the engine's series once per process.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_all);
}

fn describe_all() {
    describe_counter!("ingest_articles_total", "New candidate articles inserted.");
    describe_counter!("ingest_items_parsed_total", "Items parsed from sources.");
    describe_counter!("ingest_duplicates_total", "Items dropped as already known or near-duplicate.");
    describe_counter!("ingest_provider_errors_total", "Source fetch/parse errors.");
    describe_histogram!("ingest_parse_ms", "Source parse time in milliseconds.");
    describe_gauge!("ingest_last_run_ts", "Unix ts when ingest last ran.");
    describe_counter!("reconcile_fetched_total", "Raw feed items fetched.");
    describe_counter!("reconcile_new_total", "Events created by sync.");
    describe_counter!("reconcile_updated_total", "Events whose feed fields changed.");
    describe_counter!("reconcile_errors_total", "Failed days, rejected items and failed upserts.");
    describe_counter!("reconcile_deactivated_total", "Events deactivated after sync.");
    describe_gauge!("reconcile_last_run_ts", "Unix ts of the last finished sync.");
    describe_counter!("oracle_calls_total", "Oracle calls by prompt.");
    describe_counter!("oracle_failures_total", "Failed or rejected oracle calls by prompt.");
    describe_counter!("scoring_articles_total", "Articles scored.");
    describe_counter!("scoring_failures_total", "Articles whose scoring failed.");
    describe_counter!("dedup_retired_total", "Articles retired as duplicates.");
    describe_counter!("factcheck_results_total", "Fact-check verdicts.");
    describe_counter!("factcheck_regenerations_total", "Copy regenerations after a failed check.");
    describe_counter!("selection_runs_total", "Selector invocations by section.");
    describe_counter!("campaign_transitions_total", "Campaign status changes by target status.");
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if a recorder is already set.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
