//! Parallel batch runner.
//!
//! Documents are independent search sessions, so a batch runs them on the
//! rayon pool, one document per task. Each search stays sequential; only the
//! shared `Arc<Model>` is read concurrently.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::document::DocumentOutcome;
use crate::error::EngineResult;
use crate::model::Model;
use crate::scenario::{DocumentSpec, Scenario};
use crate::EngineConfig;

/// Result of one document in a batch.
#[derive(Debug)]
pub struct BatchItem {
    pub name: String,
    pub result: EngineResult<DocumentOutcome>,
}

/// Serializable summary of a batch.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchReportItem>,
}

#[derive(Debug, Serialize)]
pub struct BatchReportItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DocumentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build and process every document of `specs` in parallel.
///
/// Items come back in the order of `specs`.
pub fn process_all(
    model: Arc<Model>,
    config: &EngineConfig,
    specs: &[DocumentSpec],
) -> Vec<BatchItem> {
    let start = Instant::now();
    let items: Vec<BatchItem> = specs
        .par_iter()
        .map(|spec| {
            let result = Scenario::build_document(spec, Arc::clone(&model), config.clone())
                .and_then(|mut doc| doc.process());
            if let Err(e) = &result {
                warn!("Document {} failed: {}", spec.name, e);
            }
            BatchItem {
                name: spec.name.clone(),
                result,
            }
        })
        .collect();

    info!(
        "Processed {} documents in {:?} ({} failed)",
        items.len(),
        start.elapsed(),
        items.iter().filter(|i| i.result.is_err()).count()
    );
    items
}

/// Run all documents of a scenario in parallel.
pub fn run_scenario(scenario: &Scenario, config: &EngineConfig) -> EngineResult<Vec<BatchItem>> {
    let model = Arc::new(scenario.build_model()?);
    Ok(process_all(model, config, &scenario.documents))
}

impl BatchReport {
    pub fn from_items(items: Vec<BatchItem>) -> Self {
        let documents = items.len();
        let items: Vec<BatchReportItem> = items
            .into_iter()
            .map(|item| match item.result {
                Ok(outcome) => BatchReportItem {
                    name: item.name,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(e) => BatchReportItem {
                    name: item.name,
                    outcome: None,
                    error: Some(e.to_string()),
                },
            })
            .collect();
        let succeeded = items.iter().filter(|i| i.outcome.is_some()).count();
        Self {
            documents,
            succeeded,
            failed: documents - succeeded,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    const SCENARIO: &str = r#"
neurons:
  - { label: X, input: true }
  - { label: Y, activation_function: rectified_linear_unit }
synapses:
  - { from: X, to: Y, weight: 1.0 }
  - { from: Y, to: Y, weight: 1.0, recurrent: true }
  - { from: X, to: Y, weight: 0.5 }
documents:
  - name: stable
    inputs: [{ neuron: X, value: 0.0 }]
  - name: oscillating
    inputs: [{ neuron: X, value: 1.0 }]
  - name: stable-again
    inputs: [{ neuron: X, value: 0.0 }]
"#;

    #[test]
    fn test_batch_keeps_order_and_isolates_failures() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        let items = run_scenario(&scenario, &EngineConfig::default()).unwrap();

        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["stable", "oscillating", "stable-again"]);
        assert!(items[0].result.is_ok());
        assert!(matches!(
            items[1].result,
            Err(EngineError::Oscillation(ref e)) if e.round == 21
        ));
        assert!(items[2].result.is_ok());

        let report = BatchReport::from_items(items);
        assert_eq!((report.documents, report.succeeded, report.failed), (3, 2, 1));
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["items"][1]["error"].as_str().unwrap().contains("oscillating"));
        assert!(json["items"][0].get("error").is_none());
    }

    #[test]
    fn test_documents_get_distinct_ids() {
        let scenario = Scenario::from_yaml(SCENARIO).unwrap();
        let items = run_scenario(&scenario, &EngineConfig::default()).unwrap();
        let a = items[0].result.as_ref().unwrap().document_id;
        let b = items[2].result.as_ref().unwrap().document_id;
        assert_ne!(a, b);
    }
}
