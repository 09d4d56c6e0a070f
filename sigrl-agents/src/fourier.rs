use std::f64::consts::PI;

/// Fourier cosine basis over the unit box. Coefficient vectors have at most two non-zero entries.
#[derive(Debug, Clone)]
pub struct FourierBasis {
    order: usize,
    coefficients: Vec<Vec<f64>>,
    /// `1 / ||c||`, 1 for the constant term.
    learning_rate_scale: Vec<f64>,
}

impl FourierBasis {
    pub fn new(state_dims: usize, order: usize) -> Self {
        let mut coefficients = vec![vec![0.; state_dims]];
        for i in 0..state_dims {
            for a in 1..=order {
                let mut c = vec![0.; state_dims];
                c[i] = a as f64;
                coefficients.push(c);
            }
        }
        for i in 0..state_dims {
            for j in (i + 1)..state_dims {
                for a in 1..=order {
                    for b in 1..=order {
                        let mut c = vec![0.; state_dims];
                        c[i] = a as f64;
                        c[j] = b as f64;
                        coefficients.push(c);
                    }
                }
            }
        }
        let learning_rate_scale = coefficients
            .iter()
            .map(|c| {
                let norm = c.iter().map(|x| x * x).sum::<f64>().sqrt();
                if norm == 0. { 1. } else { 1. / norm }
            })
            .collect();
        Self {
            order,
            coefficients,
            learning_rate_scale,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn size(&self) -> usize {
        self.coefficients.len()
    }

    pub fn learning_rate_scale(&self) -> &[f64] {
        &self.learning_rate_scale
    }

    pub fn features(&self, state: &[f32]) -> Vec<f64> {
        self.coefficients
            .iter()
            .map(|c| {
                let dot: f64 = c
                    .iter()
                    .zip(state)
                    .map(|(c, s)| c * (*s as f64).clamp(0., 1.))
                    .sum();
                (PI * dot).cos()
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basis_size_counts_pairs() {
        // 1 + d * n + C(d, 2) * n^2
        assert_eq!(FourierBasis::new(3, 2).size(), 1 + 6 + 3 * 4);
        assert_eq!(FourierBasis::new(11, 7).size(), 1 + 77 + 55 * 49);
    }

    #[test]
    fn constant_term_and_scaling() {
        let basis = FourierBasis::new(2, 1);
        let features = basis.features(&[0.5, 0.]);
        assert_eq!(features[0], 1.);
        assert!(features[1].abs() < 1e-12);
        assert_eq!(basis.learning_rate_scale()[0], 1.);
        assert!((basis.learning_rate_scale()[3] - 1. / 2f64.sqrt()).abs() < 1e-12);
    }
}
