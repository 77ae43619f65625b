//! Activation and aggregation functions available to node genes.
//!
//! Both sets are closed enums so genomes serialize by name and decoding never
//! has to look anything up at activation time.

use serde::{Deserialize, Serialize};

/// Node activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Sigmoid,
    Tanh,
    Sin,
    Gauss,
    Relu,
    Elu,
    Lelu,
    Selu,
    Softplus,
    Identity,
    Clamped,
    Inv,
    Log,
    Exp,
    Abs,
    Hat,
    Square,
    Cube,
}

impl Activation {
    /// Every activation function, in declaration order.
    pub const ALL: [Activation; 18] = [
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Sin,
        Activation::Gauss,
        Activation::Relu,
        Activation::Elu,
        Activation::Lelu,
        Activation::Selu,
        Activation::Softplus,
        Activation::Identity,
        Activation::Clamped,
        Activation::Inv,
        Activation::Log,
        Activation::Exp,
        Activation::Abs,
        Activation::Hat,
        Activation::Square,
        Activation::Cube,
    ];

    /// Apply the function.
    ///
    /// Inputs to the exponential-style functions are clamped first so that
    /// outputs stay finite for any finite input.
    #[inline]
    pub fn apply(self, z: f32) -> f32 {
        match self {
            Activation::Sigmoid => {
                let z = (5.0 * z).clamp(-60.0, 60.0);
                1.0 / (1.0 + (-z).exp())
            }
            Activation::Tanh => (2.5 * z).clamp(-60.0, 60.0).tanh(),
            Activation::Sin => (5.0 * z).clamp(-60.0, 60.0).sin(),
            Activation::Gauss => {
                let z = z.clamp(-3.4, 3.4);
                (-5.0 * z * z).exp()
            }
            Activation::Relu => z.max(0.0),
            Activation::Elu => {
                if z > 0.0 {
                    z
                } else {
                    z.exp() - 1.0
                }
            }
            Activation::Lelu => {
                if z > 0.0 {
                    z
                } else {
                    0.005 * z
                }
            }
            Activation::Selu => {
                const LAMBDA: f32 = 1.050_701;
                const ALPHA: f32 = 1.673_263_2;
                if z > 0.0 {
                    LAMBDA * z
                } else {
                    LAMBDA * ALPHA * (z.exp() - 1.0)
                }
            }
            Activation::Softplus => {
                let z = (5.0 * z).clamp(-60.0, 60.0);
                0.2 * (1.0 + z.exp()).ln()
            }
            Activation::Identity => z,
            Activation::Clamped => z.clamp(-1.0, 1.0),
            Activation::Inv => {
                if z == 0.0 {
                    0.0
                } else {
                    1.0 / z
                }
            }
            Activation::Log => z.max(1e-7).ln(),
            Activation::Exp => z.clamp(-60.0, 60.0).exp(),
            Activation::Abs => z.abs(),
            Activation::Hat => (1.0 - z.abs()).max(0.0),
            Activation::Square => z * z,
            Activation::Cube => z * z * z,
        }
    }
}

/// Node aggregation function combining weighted inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Sum,
    Product,
    Max,
    Min,
    #[serde(rename = "maxabs", alias = "max_abs")]
    MaxAbs,
    Median,
    Mean,
}

impl Aggregation {
    /// Every aggregation function, in declaration order.
    pub const ALL: [Aggregation; 7] = [
        Aggregation::Sum,
        Aggregation::Product,
        Aggregation::Max,
        Aggregation::Min,
        Aggregation::MaxAbs,
        Aggregation::Median,
        Aggregation::Mean,
    ];

    /// Combine the weighted inputs of a node. An empty input set yields 0.
    pub fn apply(self, values: &[f32]) -> f32 {
        if values.is_empty() {
            return 0.0;
        }

        match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Product => values.iter().product(),
            Aggregation::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Aggregation::Min => values.iter().copied().fold(f32::INFINITY, f32::min),
            Aggregation::MaxAbs => values
                .iter()
                .copied()
                .fold(0.0f32, |acc, v| if v.abs() > acc.abs() { v } else { acc }),
            Aggregation::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f32::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) * 0.5
                } else {
                    sorted[mid]
                }
            }
            Aggregation::Mean => values.iter().sum::<f32>() / values.len() as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_midpoint() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-6);
        assert!(Activation::Sigmoid.apply(100.0) <= 1.0);
        assert!(Activation::Sigmoid.apply(-100.0) >= 0.0);
    }

    #[test]
    fn test_activations_finite() {
        for activation in Activation::ALL {
            for z in [-1e6f32, -3.0, -0.5, 0.0, 0.5, 3.0, 1e6] {
                let out = activation.apply(z);
                assert!(out.is_finite(), "{activation:?}({z}) = {out}");
            }
        }
    }

    #[test]
    fn test_aggregations() {
        let values = [1.0, -4.0, 3.0];
        assert_eq!(Aggregation::Sum.apply(&values), 0.0);
        assert_eq!(Aggregation::Product.apply(&values), -12.0);
        assert_eq!(Aggregation::Max.apply(&values), 3.0);
        assert_eq!(Aggregation::Min.apply(&values), -4.0);
        assert_eq!(Aggregation::MaxAbs.apply(&values), -4.0);
        assert_eq!(Aggregation::Median.apply(&values), 1.0);
        assert!((Aggregation::Mean.apply(&values) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_aggregation_is_zero() {
        for aggregation in Aggregation::ALL {
            assert_eq!(aggregation.apply(&[]), 0.0);
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Aggregation::MaxAbs).unwrap();
        assert_eq!(json, "\"maxabs\"");
        let parsed: Aggregation = serde_json::from_str("\"maxabs\"").unwrap();
        assert_eq!(parsed, Aggregation::MaxAbs);
        let parsed: Activation = serde_json::from_str("\"tanh\"").unwrap();
        assert_eq!(parsed, Activation::Tanh);
    }
}
