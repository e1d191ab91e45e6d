//! Declarative scenarios.
//!
//! A scenario describes a model (neurons and synapses, referenced by label)
//! and one or more documents to run against it: interpretation nodes,
//! conflicts, seeded inputs and extra activations. Activations are linked
//! with [`Document::link_forward`] unless a document opts out.
//!
//! ```yaml
//! neurons:
//!   - { label: A, input: true }
//!   - { label: T, bias: 0.0 }
//! synapses:
//!   - { from: A, to: T, weight: 1.0 }
//! documents:
//!   - name: doc-1
//!     interpretations: [{ label: iA }]
//!     inputs: [{ neuron: A, value: 1.0, interpretation: iA }]
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentOutcome};
use crate::error::{EngineError, EngineResult};
use crate::lattice::InterprId;
use crate::model::{ActivationFunction, Model, NeuronId};
use crate::EngineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: Option<String>,
    pub neurons: Vec<NeuronSpec>,
    pub synapses: Vec<SynapseSpec>,
    pub documents: Vec<DocumentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuronSpec {
    pub label: String,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub activation_function: ActivationFunction,
    #[serde(default)]
    pub input: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapseSpec {
    pub from: String,
    pub to: String,
    pub weight: f64,
    #[serde(default)]
    pub recurrent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSpec {
    pub name: String,
    pub interpretations: Vec<InterpretationSpec>,
    /// Pairs of mutually exclusive interpretation labels.
    pub conflicts: Vec<(String, String)>,
    pub inputs: Vec<InputSpec>,
    pub activations: Vec<ActivationSpec>,
    pub link_forward: bool,
}

impl Default for DocumentSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            interpretations: Vec::new(),
            conflicts: Vec::new(),
            inputs: Vec::new(),
            activations: Vec::new(),
            link_forward: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretationSpec {
    pub label: String,
    #[serde(default)]
    pub caused_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub neuron: String,
    pub value: f64,
    pub interpretation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationSpec {
    pub neuron: String,
    pub interpretation: Option<String>,
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| EngineError::Scenario(e.to_string()))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse scenario {}", path.display()))
    }

    pub fn build_model(&self) -> EngineResult<Model> {
        let mut model = Model::new();
        for n in &self.neurons {
            if model.neuron_by_label(&n.label).is_some() {
                return Err(EngineError::Scenario(format!(
                    "duplicate neuron label {}",
                    n.label
                )));
            }
            if n.input {
                model.add_input_neuron(n.label.clone());
            } else {
                model.add_neuron(n.label.clone(), n.bias, n.activation_function);
            }
        }
        for s in &self.synapses {
            let from = neuron(&model, &s.from)?;
            let to = neuron(&model, &s.to)?;
            model.add_synapse(from, to, s.weight, s.recurrent)?;
        }
        Ok(model)
    }

    /// Build the document described by `spec`, ready to be processed.
    pub fn build_document(
        spec: &DocumentSpec,
        model: Arc<Model>,
        config: EngineConfig,
    ) -> EngineResult<Document> {
        let mut doc = Document::new(Arc::clone(&model), config);

        for i in &spec.interpretations {
            let parents = i
                .caused_by
                .iter()
                .map(|p| interpretation(&doc, Some(p.as_str())))
                .collect::<EngineResult<Vec<_>>>()?;
            doc.create_interpretation(i.label.clone(), &parents)?;
        }
        for (a, b) in &spec.conflicts {
            let a = interpretation(&doc, Some(a.as_str()))?;
            let b = interpretation(&doc, Some(b.as_str()))?;
            doc.add_conflict(a, b)?;
        }
        for input in &spec.inputs {
            let n = neuron(&model, &input.neuron)?;
            let i = interpretation(&doc, input.interpretation.as_deref())?;
            doc.add_input(n, input.value, i)?;
        }
        for act in &spec.activations {
            let n = neuron(&model, &act.neuron)?;
            let i = interpretation(&doc, act.interpretation.as_deref())?;
            doc.create_activation(n, i)?;
        }
        if spec.link_forward {
            doc.link_forward()?;
        }
        Ok(doc)
    }

    /// Build and process every document sequentially.
    pub fn run(&self, config: &EngineConfig) -> EngineResult<Vec<DocumentOutcome>> {
        let model = Arc::new(self.build_model()?);
        self.documents
            .iter()
            .map(|spec| {
                let mut doc = Self::build_document(spec, Arc::clone(&model), config.clone())?;
                doc.process()
            })
            .collect()
    }
}

fn neuron(model: &Model, label: &str) -> EngineResult<NeuronId> {
    model
        .neuron_by_label(label)
        .ok_or_else(|| EngineError::UnknownNeuron(label.to_string()))
}

fn interpretation(doc: &Document, label: Option<&str>) -> EngineResult<InterprId> {
    match label {
        None => Ok(InterprId::ROOT),
        Some(label) => doc
            .lattice()
            .by_label(label)
            .ok_or_else(|| EngineError::UnknownInterpretation(label.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFLICT: &str = r#"
name: conflict
neurons:
  - { label: A, input: true }
  - { label: B, input: true }
  - { label: T, bias: 0.0 }
synapses:
  - { from: A, to: T, weight: 1.0 }
  - { from: B, to: T, weight: 1.0 }
documents:
  - name: doc-1
    interpretations: [{ label: iA }, { label: iB }]
    conflicts: [[iA, iB]]
    inputs:
      - { neuron: A, value: 1.0, interpretation: iA }
      - { neuron: B, value: 1.0, interpretation: iB }
"#;

    #[test]
    fn test_parse_and_build_model() {
        let scenario = Scenario::from_yaml(CONFLICT).unwrap();
        assert_eq!(scenario.name.as_deref(), Some("conflict"));
        assert!(scenario.documents[0].link_forward);

        let model = scenario.build_model().unwrap();
        assert_eq!(model.neuron_count(), 3);
        assert_eq!(model.synapse_count(), 2);
        let t = model.neuron_by_label("T").unwrap();
        assert_eq!(
            model.neuron(t).activation_function,
            ActivationFunction::RectifiedHyperbolicTangent
        );
    }

    #[test]
    fn test_build_document_wires_lattice() {
        let scenario = Scenario::from_yaml(CONFLICT).unwrap();
        let model = Arc::new(scenario.build_model().unwrap());
        let doc =
            Scenario::build_document(&scenario.documents[0], model, EngineConfig::default()).unwrap();

        let ia = doc.lattice().by_label("iA").unwrap();
        let ib = doc.lattice().by_label("iB").unwrap();
        assert!(doc.lattice().node(ia).excludes.contains(&ib));
        // A, B and the forward-created T
        assert_eq!(doc.network().len(), 3);
        assert_eq!(doc.network().link_count(), 2);
    }

    #[test]
    fn test_unknown_labels_are_reported() {
        let yaml = r#"
neurons: [{ label: A, input: true }]
synapses: [{ from: A, to: Missing, weight: 1.0 }]
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert!(matches!(scenario.build_model(), Err(EngineError::UnknownNeuron(ref l)) if l == "Missing"));

        let yaml = r#"
neurons: [{ label: A, input: true }]
documents:
  - inputs: [{ neuron: A, value: 1.0, interpretation: nope }]
"#;
        let err = Scenario::from_yaml(yaml).unwrap().run(&EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownInterpretation(_)));
    }

    #[test]
    fn test_duplicate_interpretation_label_rejected() {
        let yaml = r#"
neurons: [{ label: A, input: true }]
documents:
  - name: twice
    interpretations: [{ label: iA }, { label: iA }]
"#;
        let err = Scenario::from_yaml(yaml).unwrap().run(&EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::Scenario(ref m) if m.contains("iA")));
    }

    #[test]
    fn test_malformed_yaml_is_a_scenario_error() {
        assert!(matches!(
            Scenario::from_yaml("neurons: 12"),
            Err(EngineError::Scenario(_))
        ));
    }
}
