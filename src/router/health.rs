//! Pre-flight check of the daemons a request depends on.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::constants::codes;
use crate::error::{ApiError, DapiError, Result};

const RUNNING: &str = "running";

/// Source of local daemon statuses
#[async_trait]
pub trait DaemonStatusProvider: Send + Sync + Debug {
    /// Status of every known daemon, e.g. `{"dapi-db": "running"}`
    async fn statuses(&self) -> Result<HashMap<String, String>>;
}

/// Fail with "system not ready" unless every service in `services` is running
///
/// Services missing from the status report count as `stopped`.
pub async fn check_basic_services(
    provider: &dyn DaemonStatusProvider,
    services: &[String],
    node_name: &str,
) -> Result<()> {
    if services.is_empty() {
        return Ok(());
    }

    let statuses = provider.statuses().await?;
    let not_ready: BTreeMap<&str, &str> = services
        .iter()
        .map(|service| {
            let status = statuses.get(service).map(String::as_str).unwrap_or("stopped");
            (service.as_str(), status)
        })
        .filter(|(_, status)| *status != RUNNING)
        .collect();

    if not_ready.is_empty() {
        return Ok(());
    }

    let not_ready_daemons = not_ready
        .iter()
        .map(|(daemon, status)| format!("{daemon}->{status}"))
        .collect::<Vec<_>>()
        .join(", ");
    warn!(node = %node_name, daemons = %not_ready_daemons, "Basic services are not ready");

    Err(DapiError::Internal(
        ApiError::new(codes::SYSTEM_NOT_READY)
            .with_extra(format!("\"{node_name}\" ({not_ready_daemons})"))
            .with_context("node_name", Value::from(node_name))
            .with_context("not_ready_daemons", Value::from(not_ready_daemons)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Statuses(HashMap<String, String>);

    #[async_trait]
    impl DaemonStatusProvider for Statuses {
        async fn statuses(&self) -> Result<HashMap<String, String>> {
            Ok(self.0.clone())
        }
    }

    fn provider(entries: &[(&str, &str)]) -> Statuses {
        Statuses(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_running_passes() {
        let provider = provider(&[("dapi-db", "running"), ("dapi-execd", "running")]);
        check_basic_services(&provider, &services(&["dapi-db", "dapi-execd"]), "master")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_not_ready_reports_daemons_and_node() {
        let provider = provider(&[("dapi-db", "running"), ("dapi-execd", "failed")]);
        let error = check_basic_services(
            &provider,
            &services(&["dapi-db", "dapi-execd", "dapi-analysisd"]),
            "worker1",
        )
        .await
        .unwrap_err();

        assert_eq!(error.code(), Some(codes::SYSTEM_NOT_READY));
        let api = error.api_error().unwrap();
        assert_eq!(api.context["node_name"], Value::from("worker1"));
        assert_eq!(
            api.context["not_ready_daemons"],
            Value::from("dapi-analysisd->stopped, dapi-execd->failed")
        );
    }

    #[tokio::test]
    async fn test_empty_service_list_skips_check() {
        let provider = provider(&[]);
        check_basic_services(&provider, &[], "master").await.unwrap();
    }
}
