// src/snake.rs - Active contour (snake) evolution engine

use image::{ImageBuffer, Luma};
use log::debug;
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::SnakeParams;
use crate::errors::{Result, SnakeFusionError};
use crate::image_utils::{
    central_gradient, gaussian_smooth, sample_bilinear, sobel_magnitude, validate_intensity_image,
    IntensityImage,
};

/// A sub-pixel contour vertex in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContourPoint {
    pub row: f64,
    pub col: f64,
}

impl ContourPoint {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.row.is_finite() && self.col.is_finite()
    }

    #[inline]
    pub fn distance(&self, other: &ContourPoint) -> f64 {
        (self.row - other.row).hypot(self.col - other.col)
    }
}

/// Closed polygon of at least three points; the last point connects to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContour")]
pub struct Contour {
    points: Vec<ContourPoint>,
}

/// Unchecked serde shape of a contour
#[derive(Deserialize)]
struct RawContour {
    points: Vec<ContourPoint>,
}

impl TryFrom<RawContour> for Contour {
    type Error = SnakeFusionError;

    fn try_from(raw: RawContour) -> Result<Self> {
        Contour::new(raw.points)
    }
}

impl Contour {
    /// Build a contour, rejecting fewer than three points or non-finite coordinates
    pub fn new(points: Vec<ContourPoint>) -> Result<Self> {
        if points.len() < 3 {
            return Err(SnakeFusionError::invalid(format!(
                "a contour needs at least 3 points, got {}",
                points.len()
            )));
        }
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(SnakeFusionError::invalid(format!(
                "contour point {} has non-finite coordinates",
                index
            )));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[ContourPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<ContourPoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.points.iter().all(ContourPoint::is_finite)
    }

    /// Mean of the vertices
    pub fn centroid(&self) -> ContourPoint {
        let n = self.points.len() as f64;
        let (row_sum, col_sum) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(r, c), p| (r + p.row, c + p.col));
        ContourPoint::new(row_sum / n, col_sum / n)
    }

    /// Mean vertex distance to `center`
    pub fn mean_radius(&self, center: ContourPoint) -> f64 {
        self.points.iter().map(|p| p.distance(&center)).sum::<f64>() / self.points.len() as f64
    }

    /// Mean per-point distance to another contour with the same number of points
    pub fn mean_displacement(&self, other: &Contour) -> f64 {
        mean_displacement(&self.points, &other.points)
    }

    /// True when every vertex lies in `[0, height-1] x [0, width-1]`
    pub fn within_bounds(&self, width: u32, height: u32) -> bool {
        let max_row = height as f64 - 1.0;
        let max_col = width as f64 - 1.0;
        self.points
            .iter()
            .all(|p| p.row >= 0.0 && p.row <= max_row && p.col >= 0.0 && p.col <= max_col)
    }
}

fn mean_displacement(a: &[ContourPoint], b: &[ContourPoint]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(p, q)| p.distance(q)).sum::<f64>() / a.len() as f64
}

/// Build a circular initial contour around `(center_x, center_y)`.
///
/// Points are evenly spaced in angle; the first point is not repeated at the end.
pub fn initialize_contour(center_x: f64, center_y: f64, radius: f64, n_points: usize) -> Result<Contour> {
    if !radius.is_finite() || radius < 0.0 {
        return Err(SnakeFusionError::invalid(format!(
            "contour radius must be >= 0, got {}",
            radius
        )));
    }

    let points = (0..n_points)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / n_points as f64;
            ContourPoint::new(center_y + radius * angle.sin(), center_x + radius * angle.cos())
        })
        .collect();

    Contour::new(points)
}

/// How the first and last contour points are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryMode {
    /// Closed curve, the operator wraps around
    #[default]
    Periodic,
    /// Both end points stay where they are
    Fixed,
    /// Both end points move freely
    Free,
    /// Fixed start, free end
    FixedFree,
    /// Free start, fixed end
    FreeFixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndCondition {
    Periodic,
    Fixed,
    Free,
}

impl BoundaryMode {
    fn start(self) -> EndCondition {
        match self {
            BoundaryMode::Periodic => EndCondition::Periodic,
            BoundaryMode::Fixed | BoundaryMode::FixedFree => EndCondition::Fixed,
            BoundaryMode::Free | BoundaryMode::FreeFixed => EndCondition::Free,
        }
    }

    fn end(self) -> EndCondition {
        match self {
            BoundaryMode::Periodic => EndCondition::Periodic,
            BoundaryMode::Fixed | BoundaryMode::FreeFixed => EndCondition::Fixed,
            BoundaryMode::Free | BoundaryMode::FixedFree => EndCondition::Free,
        }
    }

    /// Smallest contour the boundary rows fit into
    fn min_points(self) -> usize {
        if self.start() == EndCondition::Free || self.end() == EndCondition::Free {
            4
        } else {
            3
        }
    }
}

fn set_row(matrix: &mut DMatrix<f64>, row: usize, first_col: usize, values: &[f64]) {
    matrix.row_mut(row).fill(0.0);
    for (offset, value) in values.iter().enumerate() {
        matrix[(row, first_col + offset)] = *value;
    }
}

/// Pentadiagonal internal-energy operator `A = -alpha * D2 + beta * D4`.
///
/// Entries are accumulated modulo `n`, so for very short contours the wrapped
/// neighbours add up instead of overwriting each other. Non-periodic ends
/// replace the first/last two rows with one-sided difference stencils.
pub fn internal_energy_matrix(n: usize, alpha: f64, beta: f64, mode: BoundaryMode) -> DMatrix<f64> {
    let mut a = DMatrix::<f64>::zeros(n, n);

    for i in 0..n {
        let wrap = |offset: isize| (i as isize + offset).rem_euclid(n as isize) as usize;
        a[(i, i)] += 2.0 * alpha + 6.0 * beta;
        for offset in [-1, 1] {
            a[(i, wrap(offset))] += -alpha - 4.0 * beta;
        }
        for offset in [-2, 2] {
            a[(i, wrap(offset))] += beta;
        }
    }

    match mode.start() {
        EndCondition::Fixed => {
            a.row_mut(0).fill(0.0);
            set_row(&mut a, 1, 0, &[1.0, -2.0, 1.0]);
        }
        EndCondition::Free => {
            set_row(&mut a, 0, 0, &[1.0, -2.0, 1.0]);
            set_row(&mut a, 1, 0, &[-1.0, 3.0, -3.0, 1.0]);
        }
        EndCondition::Periodic => {}
    }

    match mode.end() {
        EndCondition::Fixed => {
            a.row_mut(n - 1).fill(0.0);
            set_row(&mut a, n - 2, n - 3, &[1.0, -2.0, 1.0]);
        }
        EndCondition::Free => {
            set_row(&mut a, n - 1, n - 3, &[1.0, -2.0, 1.0]);
            set_row(&mut a, n - 2, n - 4, &[-1.0, 3.0, -3.0, 1.0]);
        }
        EndCondition::Periodic => {}
    }

    a
}

/// Gradient of the normalized external potential, ready for sub-pixel sampling
pub struct ExternalField {
    d_row: IntensityImage,
    d_col: IntensityImage,
}

impl ExternalField {
    /// Potential `w_line * smoothed + w_edge * |grad smoothed|`, rescaled so its
    /// largest magnitude is 1. The force on a point is the potential's gradient.
    pub fn from_image(image: &IntensityImage, params: &SnakeParams) -> Self {
        let smoothed = gaussian_smooth(image, params.smoothing_sigma);
        let edge = (params.w_edge != 0.0).then(|| sobel_magnitude(&smoothed));

        let (width, height) = image.dimensions();
        let mut potential: IntensityImage = ImageBuffer::from_fn(width, height, |x, y| {
            let line = smoothed.get_pixel(x, y)[0] as f64;
            let edge = edge.as_ref().map_or(0.0, |e| e.get_pixel(x, y)[0] as f64);
            Luma([(params.w_line * line + params.w_edge * edge) as f32])
        });

        let peak = potential.pixels().fold(0.0f32, |acc, p| acc.max(p[0].abs()));
        if peak > 0.0 {
            potential.pixels_mut().for_each(|p| p[0] /= peak);
        }
        debug!(
            "External potential {}x{} (sigma {:.2}, peak {:.5} before normalization)",
            width, height, params.smoothing_sigma, peak
        );

        let (d_row, d_col) = central_gradient(&potential);
        Self { d_row, d_col }
    }

    /// Force `(row, col)` at a sub-pixel position
    #[inline]
    pub fn force_at(&self, point: ContourPoint) -> (f64, f64) {
        (
            sample_bilinear(&self.d_row, point.row, point.col),
            sample_bilinear(&self.d_col, point.row, point.col),
        )
    }
}

/// Terminal state of a run that did not diverge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvolutionStatus {
    Converged,
    IterationBudgetExhausted,
}

/// Result of one evolution run
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionReport {
    pub contour: Contour,
    pub iterations: usize,
    pub status: EvolutionStatus,
    /// Mean per-point displacement of the last iteration
    pub final_displacement: f64,
}

/// Snake evolution engine for one image, point count and parameter set.
///
/// The external field and the factorization of `A + gamma * I` are computed
/// once in `new` and reused by every `run`.
pub struct SnakeEngine {
    params: SnakeParams,
    field: ExternalField,
    system: LU<f64, Dyn, Dyn>,
    n_points: usize,
    width: u32,
    height: u32,
}

impl SnakeEngine {
    pub fn new(image: &IntensityImage, n_points: usize, params: &SnakeParams) -> Result<Self> {
        validate_intensity_image(image)?;
        params.validate()?;

        let min_points = params.boundary_mode.min_points();
        if n_points < min_points {
            return Err(SnakeFusionError::invalid(format!(
                "{:?} boundary needs at least {} points, got {}",
                params.boundary_mode, min_points, n_points
            )));
        }

        let field = ExternalField::from_image(image, params);

        let operator = internal_energy_matrix(n_points, params.alpha, params.beta, params.boundary_mode);
        let system = (operator + DMatrix::<f64>::identity(n_points, n_points) * params.gamma).lu();

        let (width, height) = image.dimensions();
        Ok(Self {
            params: params.clone(),
            field,
            system,
            n_points,
            width,
            height,
        })
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Evolve `initial` until convergence or the iteration budget runs out.
    ///
    /// Fails with `InvalidInput` for a contour of the wrong length or outside the
    /// image, and with `NumericalDivergence` if the solve stops producing finite
    /// coordinates.
    pub fn run(&self, initial: Contour) -> Result<EvolutionReport> {
        if initial.len() != self.n_points {
            return Err(SnakeFusionError::invalid(format!(
                "engine prepared for {} points, contour has {}",
                self.n_points,
                initial.len()
            )));
        }
        if !initial.within_bounds(self.width, self.height) {
            return Err(SnakeFusionError::invalid(format!(
                "initial contour leaves the {}x{} image",
                self.width, self.height
            )));
        }
        if !self.system.is_invertible() {
            return Err(SnakeFusionError::NumericalDivergence {
                iteration: 0,
                last_valid: initial,
            });
        }

        let params = &self.params;
        let n = self.n_points;
        let start = params.boundary_mode.start();
        let end = params.boundary_mode.end();
        let max_row = self.height as f64 - 1.0;
        let max_col = self.width as f64 - 1.0;

        let mut current = initial.into_points();
        let mut displacement = f64::INFINITY;

        for iteration in 1..=params.max_iterations {
            let mut forces: Vec<(f64, f64)> = if params.use_parallel {
                current.par_iter().map(|p| self.field.force_at(*p)).collect()
            } else {
                current.iter().map(|p| self.field.force_at(*p)).collect()
            };

            match start {
                EndCondition::Fixed => forces[0] = (0.0, 0.0),
                EndCondition::Free => forces[0] = (forces[0].0 * 2.0, forces[0].1 * 2.0),
                EndCondition::Periodic => {}
            }
            match end {
                EndCondition::Fixed => forces[n - 1] = (0.0, 0.0),
                EndCondition::Free => forces[n - 1] = (forces[n - 1].0 * 2.0, forces[n - 1].1 * 2.0),
                EndCondition::Periodic => {}
            }

            let rhs_row = DVector::from_iterator(
                n,
                current.iter().zip(&forces).map(|(p, f)| params.gamma * p.row + f.0),
            );
            let rhs_col = DVector::from_iterator(
                n,
                current.iter().zip(&forces).map(|(p, f)| params.gamma * p.col + f.1),
            );

            let solved = self.system.solve(&rhs_row).zip(self.system.solve(&rhs_col));
            let (target_row, target_col) = match solved {
                Some((r, c)) if r.iter().chain(c.iter()).all(|v| v.is_finite()) => (r, c),
                _ => {
                    debug!("Snake diverged at iteration {}", iteration);
                    return Err(SnakeFusionError::NumericalDivergence {
                        iteration,
                        last_valid: Contour { points: current },
                    });
                }
            };

            let next: Vec<ContourPoint> = current
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let pinned = (i == 0 && start == EndCondition::Fixed)
                        || (i == n - 1 && end == EndCondition::Fixed);
                    if pinned {
                        return *p;
                    }
                    let d_row = params.max_px_move * (target_row[i] - p.row).tanh();
                    let d_col = params.max_px_move * (target_col[i] - p.col).tanh();
                    ContourPoint::new(
                        (p.row + d_row).clamp(0.0, max_row),
                        (p.col + d_col).clamp(0.0, max_col),
                    )
                })
                .collect();

            displacement = mean_displacement(&current, &next);
            current = next;

            if displacement < params.convergence_threshold {
                debug!(
                    "Snake converged after {} iterations (mean displacement {:.4})",
                    iteration, displacement
                );
                return Ok(EvolutionReport {
                    contour: Contour { points: current },
                    iterations: iteration,
                    status: EvolutionStatus::Converged,
                    final_displacement: displacement,
                });
            }
        }

        debug!(
            "Snake used its {} iteration budget (mean displacement {:.4})",
            params.max_iterations, displacement
        );
        Ok(EvolutionReport {
            contour: Contour { points: current },
            iterations: params.max_iterations,
            status: EvolutionStatus::IterationBudgetExhausted,
            final_displacement: displacement,
        })
    }
}

/// Evolve `initial_contour` over `image` and return the final contour
pub fn evolve(image: &IntensityImage, initial_contour: Contour, params: &SnakeParams) -> Result<Contour> {
    let engine = SnakeEngine::new(image, initial_contour.len(), params)?;
    Ok(engine.run(initial_contour)?.contour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn flat_image(value: f32) -> IntensityImage {
        ImageBuffer::from_pixel(40, 30, Luma([value]))
    }

    #[test]
    fn circle_has_requested_radius_and_centre() {
        let contour = initialize_contour(20.0, 15.0, 6.0, 64).unwrap();
        assert_eq!(contour.len(), 64);

        let centroid = contour.centroid();
        assert_approx_eq!(centroid.row, 15.0, 1e-9);
        assert_approx_eq!(centroid.col, 20.0, 1e-9);
        assert_approx_eq!(contour.mean_radius(centroid), 6.0, 1e-9);
        assert_ne!(contour.points()[0], contour.points()[63]);
    }

    #[test]
    fn short_or_broken_contours_are_rejected() {
        let two = vec![ContourPoint::new(1.0, 1.0), ContourPoint::new(2.0, 2.0)];
        assert!(matches!(Contour::new(two), Err(SnakeFusionError::InvalidInput(_))));

        let nan = vec![
            ContourPoint::new(1.0, 1.0),
            ContourPoint::new(f64::NAN, 2.0),
            ContourPoint::new(3.0, 1.0),
        ];
        assert!(Contour::new(nan).is_err());
    }

    #[test]
    fn deserialization_applies_contour_checks() {
        assert!(serde_json::from_str::<Contour>(r#"{"points":[]}"#).is_err());
        assert!(serde_json::from_str::<Contour>(
            r#"{"points":[{"row":1.0,"col":1.0},{"row":2.0,"col":2.0}]}"#
        )
        .is_err());

        let contour = initialize_contour(10.0, 10.0, 3.0, 6).unwrap();
        let json = serde_json::to_string(&contour).unwrap();
        assert_eq!(serde_json::from_str::<Contour>(&json).unwrap(), contour);
    }

    #[test]
    fn periodic_operator_is_symmetric_with_zero_row_sums() {
        let a = internal_energy_matrix(8, 0.3, 0.7, BoundaryMode::Periodic);
        assert_eq!(a, a.transpose());
        for row in a.row_iter() {
            assert_approx_eq!(row.sum(), 0.0, 1e-12);
        }
        assert_approx_eq!(a[(0, 0)], 2.0 * 0.3 + 6.0 * 0.7, 1e-12);
        assert_approx_eq!(a[(0, 7)], -0.3 - 4.0 * 0.7, 1e-12);
        assert_approx_eq!(a[(0, 6)], 0.7, 1e-12);
    }

    #[test]
    fn three_point_operator_accumulates_wrapped_neighbours() {
        let a = internal_energy_matrix(3, 0.1, 0.2, BoundaryMode::Periodic);
        assert_approx_eq!(a[(0, 1)], -0.1 - 3.0 * 0.2, 1e-12);
        assert_approx_eq!(a[(0, 0)], 0.2 + 1.2, 1e-12);
    }

    #[test]
    fn boundary_rows_follow_the_end_conditions() {
        let fixed = internal_energy_matrix(6, 0.1, 0.2, BoundaryMode::Fixed);
        assert!(fixed.row(0).iter().all(|v| *v == 0.0));
        assert_eq!(fixed.row(1).iter().copied().collect::<Vec<_>>(), vec![1.0, -2.0, 1.0, 0.0, 0.0, 0.0]);
        assert!(fixed.row(5).iter().all(|v| *v == 0.0));
        assert_eq!(fixed.row(4).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0, 1.0, -2.0, 1.0]);

        let free = internal_energy_matrix(6, 0.1, 0.2, BoundaryMode::FreeFixed);
        assert_eq!(free.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, -2.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(free.row(1).iter().copied().collect::<Vec<_>>(), vec![-1.0, 3.0, -3.0, 1.0, 0.0, 0.0]);
        assert!(free.row(5).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn flat_image_converges_immediately() {
        let image = flat_image(0.5);
        let initial = initialize_contour(20.0, 15.0, 8.0, 200).unwrap();
        let engine = SnakeEngine::new(&image, 200, &SnakeParams::default()).unwrap();
        let report = engine.run(initial.clone()).unwrap();

        assert_eq!(report.status, EvolutionStatus::Converged);
        assert_eq!(report.iterations, 1);
        assert!(report.contour.mean_displacement(&initial) < 0.1);
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        let image = flat_image(0.5);
        let initial = initialize_contour(20.0, 15.0, 8.0, 50).unwrap();
        let params = SnakeParams {
            max_iterations: 3,
            convergence_threshold: 0.0,
            ..SnakeParams::default()
        };
        let report = SnakeEngine::new(&image, 50, &params).unwrap().run(initial).unwrap();

        assert_eq!(report.status, EvolutionStatus::IterationBudgetExhausted);
        assert_eq!(report.iterations, 3);
        assert!(report.contour.is_finite());
    }

    #[test]
    fn out_of_bounds_contour_is_rejected() {
        let image = flat_image(0.5);
        let initial = initialize_contour(20.0, 15.0, 20.0, 30).unwrap();
        assert!(matches!(
            evolve(&image, initial, &SnakeParams::default()),
            Err(SnakeFusionError::InvalidInput(_))
        ));
    }

    #[test]
    fn contour_length_must_match_engine() {
        let image = flat_image(0.5);
        let engine = SnakeEngine::new(&image, 12, &SnakeParams::default()).unwrap();
        let initial = initialize_contour(20.0, 15.0, 5.0, 10).unwrap();
        assert!(engine.run(initial).is_err());
    }

    #[test]
    fn free_ends_need_four_points() {
        let image = flat_image(0.5);
        let params = SnakeParams {
            boundary_mode: BoundaryMode::Free,
            ..SnakeParams::default()
        };
        assert!(SnakeEngine::new(&image, 3, &params).is_err());
        assert!(SnakeEngine::new(&image, 4, &params).is_ok());
    }

    #[test]
    fn fixed_ends_do_not_move() {
        let image: IntensityImage = ImageBuffer::from_fn(40, 30, |x, _| Luma([x as f32 / 39.0]));
        let points: Vec<ContourPoint> = (0..10).map(|i| ContourPoint::new(5.0 + 2.0 * i as f64, 10.0)).collect();
        let params = SnakeParams {
            boundary_mode: BoundaryMode::Fixed,
            w_line: 1.0,
            w_edge: 0.0,
            smoothing_sigma: 0.0,
            max_iterations: 20,
            ..SnakeParams::default()
        };

        let result = evolve(&image, Contour::new(points.clone()).unwrap(), &params).unwrap();
        assert_eq!(result.points()[0], points[0]);
        assert_eq!(result.points()[9], points[9]);
        assert!(result.points()[5].col > points[5].col);
    }

    #[test]
    fn overflowing_operator_reports_divergence() {
        let image = flat_image(0.5);
        let initial = initialize_contour(20.0, 15.0, 8.0, 20).unwrap();
        let params = SnakeParams {
            alpha: f64::MAX,
            beta: f64::MAX,
            ..SnakeParams::default()
        };

        match evolve(&image, initial.clone(), &params) {
            Err(SnakeFusionError::NumericalDivergence { last_valid, .. }) => {
                assert_eq!(last_valid, initial);
            }
            other => panic!("expected divergence, got {:?}", other),
        }
    }

    #[test]
    fn serial_and_parallel_sampling_agree() {
        let image: IntensityImage = ImageBuffer::from_fn(40, 30, |x, y| {
            Luma([if (x as i32 - 20).pow(2) + (y as i32 - 15).pow(2) < 36 { 0.9 } else { 0.1 }])
        });
        let initial = initialize_contour(20.0, 15.0, 11.0, 40).unwrap();
        let serial = SnakeParams { use_parallel: false, smoothing_sigma: 3.0, ..SnakeParams::default() };
        let parallel = SnakeParams { use_parallel: true, ..serial.clone() };

        let a = evolve(&image, initial.clone(), &serial).unwrap();
        let b = evolve(&image, initial, &parallel).unwrap();
        assert_eq!(a, b);
    }
}
