//! Derivative-free minimization (Nelder-Mead simplex)

/// Simplex search settings
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    pub max_iterations: usize,
    /// Convergence threshold on both the simplex spread and the objective spread
    pub tolerance: f64,
    /// Edge length of the initial simplex along coordinates that start at zero
    pub initial_step: f64,
}

/// Best point found by the search
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

impl NelderMead {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            initial_step: 0.25,
        }
    }

    /// Minimize `f` starting from `x0`. NaN objective values count as +inf.
    pub fn minimize<F>(&self, f: F, x0: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = x0.len();
        let eval = |x: &[f64]| {
            let v = f(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
        simplex.push(x0.to_vec());
        for i in 0..n {
            let mut vertex = x0.to_vec();
            vertex[i] = if vertex[i] != 0.0 {
                vertex[i] * 1.05
            } else {
                self.initial_step
            };
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();
        sort_simplex(&mut simplex, &mut values);

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            if self.has_converged(&simplex, &values) {
                converged = true;
                break;
            }
            iterations += 1;

            let worst = n;
            let centroid = centroid(&simplex[..n]);

            let reflected = affine(&centroid, &simplex[worst], -REFLECTION);
            let f_reflected = eval(&reflected);

            let mut shrink = false;
            if f_reflected < values[0] {
                let expanded = affine(&centroid, &simplex[worst], -REFLECTION * EXPANSION);
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[worst] = expanded;
                    values[worst] = f_expanded;
                } else {
                    simplex[worst] = reflected;
                    values[worst] = f_reflected;
                }
            } else if f_reflected < values[n - 1] {
                simplex[worst] = reflected;
                values[worst] = f_reflected;
            } else if f_reflected < values[worst] {
                let outside = affine(&centroid, &simplex[worst], -REFLECTION * CONTRACTION);
                let f_outside = eval(&outside);
                if f_outside <= f_reflected {
                    simplex[worst] = outside;
                    values[worst] = f_outside;
                } else {
                    shrink = true;
                }
            } else {
                let inside = affine(&centroid, &simplex[worst], CONTRACTION);
                let f_inside = eval(&inside);
                if f_inside < values[worst] {
                    simplex[worst] = inside;
                    values[worst] = f_inside;
                } else {
                    shrink = true;
                }
            }

            if shrink {
                let best = simplex[0].clone();
                for j in 1..=n {
                    for (x, b) in simplex[j].iter_mut().zip(&best) {
                        *x = b + SHRINK * (*x - b);
                    }
                    values[j] = eval(&simplex[j]);
                }
            }

            sort_simplex(&mut simplex, &mut values);
        }

        if !converged {
            converged = self.has_converged(&simplex, &values);
        }

        Minimum {
            x: simplex[0].clone(),
            value: values[0],
            iterations,
            converged,
        }
    }

    fn has_converged(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        let best = &simplex[0];
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|v| (v - values[0]).abs())
            .fold(0.0, f64::max);
        x_spread <= self.tolerance && f_spread <= self.tolerance
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

fn centroid(points: &[Vec<f64>]) -> Vec<f64> {
    let n = points.len() as f64;
    let mut c = vec![0.0; points[0].len()];
    for p in points {
        for (ci, pi) in c.iter_mut().zip(p) {
            *ci += pi / n;
        }
    }
    c
}

/// `centroid + coef * (point - centroid)`
fn affine(centroid: &[f64], point: &[f64], coef: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(point)
        .map(|(c, p)| c + coef * (p - c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_bowl() {
        let optimizer = NelderMead::new(2000, 1e-10);
        let result = optimizer.minimize(
            |x| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2),
            &[0.0, 0.0],
        );
        assert!(result.converged);
        assert!((result.x[0] - 3.0).abs() < 1e-4);
        assert!((result.x[1] + 1.0).abs() < 1e-4);
        assert!(result.value < 1e-8);
    }

    #[test]
    fn test_rosenbrock() {
        let optimizer = NelderMead::new(10_000, 1e-10);
        let result = optimizer.minimize(
            |x| 100.0 * (x[1] - x[0] * x[0]).powi(2) + (1.0 - x[0]).powi(2),
            &[-1.2, 1.0],
        );
        assert!(result.converged);
        assert!((result.x[0] - 1.0).abs() < 1e-3);
        assert!((result.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_nan_is_treated_as_infinite() {
        let optimizer = NelderMead::new(2000, 1e-10);
        let result = optimizer.minimize(
            |x| if x[0] < 0.0 { f64::NAN } else { (x[0] - 0.5).powi(2) },
            &[1.0],
        );
        assert!((result.x[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_iteration_budget() {
        let optimizer = NelderMead::new(3, 1e-12);
        let result = optimizer.minimize(|x| x[0] * x[0] + x[1] * x[1], &[5.0, 5.0]);
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
    }
}
