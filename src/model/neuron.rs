//! Neurons and their transfer functions.

use serde::{Deserialize, Serialize};

/// Index of a neuron inside its [`Model`](super::Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NeuronId(pub u32);

impl NeuronId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NeuronId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Transfer function applied to a neuron's net input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    /// Upper half of tanh: `max(0, tanh(x))`.
    #[default]
    RectifiedHyperbolicTangent,
    /// `max(0, x)`
    RectifiedLinearUnit,
    /// Passes the net input through; used by input neurons.
    Identity,
}

impl ActivationFunction {
    pub fn f(self, x: f64) -> f64 {
        match self {
            Self::RectifiedHyperbolicTangent => x.tanh().max(0.0),
            Self::RectifiedLinearUnit => x.max(0.0),
            Self::Identity => x,
        }
    }
}

impl std::fmt::Display for ActivationFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RectifiedHyperbolicTangent => write!(f, "RECTIFIED_HYPERBOLIC_TANGENT"),
            Self::RectifiedLinearUnit => write!(f, "RECTIFIED_LINEAR_UNIT"),
            Self::Identity => write!(f, "IDENTITY"),
        }
    }
}

/// Static description of a neuron. Bias and transfer function are owned by the
/// (external) training side and never change while a document is searched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neuron {
    pub id: NeuronId,
    pub label: String,
    pub bias: f64,
    pub activation_function: ActivationFunction,
    /// Input neurons take their value from the caller instead of their links.
    pub is_input: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectified_tanh_clamps_negative_net() {
        let f = ActivationFunction::RectifiedHyperbolicTangent;
        assert_eq!(f.f(-3.0), 0.0);
        assert_eq!(f.f(0.0), 0.0);
        assert!((f.f(1.0) - 1.0_f64.tanh()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_relu_and_identity() {
        assert_eq!(ActivationFunction::RectifiedLinearUnit.f(-0.5), 0.0);
        assert_eq!(ActivationFunction::RectifiedLinearUnit.f(2.5), 2.5);
        assert_eq!(ActivationFunction::Identity.f(-0.5), -0.5);
    }

    #[test]
    fn test_activation_function_yaml_names() {
        let f: ActivationFunction = serde_yaml::from_str("rectified_linear_unit").unwrap();
        assert_eq!(f, ActivationFunction::RectifiedLinearUnit);
        assert_eq!(ActivationFunction::default(), ActivationFunction::RectifiedHyperbolicTangent);
    }
}
