//! Target formations
//!
//! Samples the two static point clouds the particles converge toward: a
//! volume-uniform nebula sphere and a tapered tree cone. Both are generated
//! once when a scene mounts and stay immutable for its lifetime; slot `i`
//! in each cloud belongs to particle `i`.

use std::f32::consts::TAU;

use glam::Vec3;
use rand::Rng;

pub struct Formations {
    pub nebula: Vec<Vec3>,
    pub tree: Vec<Vec3>,
}

impl Formations {
    /// Sample both formations. Parameters must already be validated, see
    /// `SceneConfig::validate`.
    pub fn generate(count: usize, nebula_radius: f32, tree_height: f32, tree_radius: f32) -> Self {
        let mut rng = rand::rng();
        let mut nebula = Vec::with_capacity(count);
        let mut tree = Vec::with_capacity(count);

        for _ in 0..count {
            // Uniform over the ball: arccos-distributed polar angle for a
            // uniform direction, cube-root radius for uniform volume density.
            let theta = rng.random_range(0.0..TAU);
            let phi = (rng.random_range(0.0f32..1.0) * 2.0 - 1.0).acos();
            let r = rng.random_range(0.0f32..1.0).cbrt() * nebula_radius;
            nebula.push(Vec3::new(
                r * phi.sin() * theta.cos(),
                r * phi.sin() * theta.sin(),
                r * phi.cos(),
            ));

            // Cone radius tapers linearly with height. The 20..100% jitter
            // keeps the surface ragged instead of a clean shell.
            let y = rng.random_range(0.0..tree_height);
            let taper = 1.0 - y / tree_height;
            let radius = tree_radius * taper * (0.2 + 0.8 * rng.random_range(0.0f32..1.0));
            let angle = rng.random_range(0.0..TAU);
            tree.push(Vec3::new(
                radius * angle.cos(),
                y - tree_height / 2.0,
                radius * angle.sin(),
            ));
        }

        Self { nebula, tree }
    }

    pub fn len(&self) -> usize {
        self.nebula.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nebula.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT: usize = 20_000;
    const NEBULA_RADIUS: f32 = 15.0;
    const TREE_HEIGHT: f32 = 12.0;
    const TREE_RADIUS: f32 = 5.0;

    fn generate() -> Formations {
        Formations::generate(COUNT, NEBULA_RADIUS, TREE_HEIGHT, TREE_RADIUS)
    }

    #[test]
    fn test_clouds_are_paired_per_particle() {
        let formations = generate();
        assert_eq!(formations.nebula.len(), COUNT);
        assert_eq!(formations.tree.len(), COUNT);
        assert_eq!(formations.len(), COUNT);
        assert!(!formations.is_empty());
    }

    #[test]
    fn test_nebula_stays_inside_radius() {
        let formations = generate();
        for point in &formations.nebula {
            assert!(point.length() <= NEBULA_RADIUS + 1e-4);
        }
    }

    #[test]
    fn test_nebula_fills_volume_not_shell() {
        // Uniform volume density puts (1/2)^3 = 12.5% of points inside half
        // the radius. Surface-biased sampling would put far fewer there and
        // linear-radius sampling far more.
        let formations = generate();
        let inner = formations
            .nebula
            .iter()
            .filter(|p| p.length() < NEBULA_RADIUS / 2.0)
            .count();
        let fraction = inner as f32 / COUNT as f32;
        assert!(
            (0.09..0.16).contains(&fraction),
            "inner-half fraction {fraction}"
        );
    }

    #[test]
    fn test_nebula_is_not_axis_biased() {
        let formations = generate();
        let mean = formations.nebula.iter().copied().sum::<Vec3>() / COUNT as f32;
        assert!(mean.length() < NEBULA_RADIUS * 0.05, "mean drift {mean}");
    }

    #[test]
    fn test_tree_height_is_recentered() {
        let formations = generate();
        for point in &formations.tree {
            assert!(point.y >= -TREE_HEIGHT / 2.0 - 1e-4);
            assert!(point.y <= TREE_HEIGHT / 2.0 + 1e-4);
        }
    }

    #[test]
    fn test_tree_radius_tapers_with_height() {
        let formations = generate();
        for point in &formations.tree {
            let horizontal = (point.x * point.x + point.z * point.z).sqrt();
            let taper = 1.0 - (point.y + TREE_HEIGHT / 2.0) / TREE_HEIGHT;
            assert!(
                horizontal <= TREE_RADIUS * taper + 1e-3,
                "point {point} outside cone"
            );
        }
    }

    #[test]
    fn test_tree_surface_is_jittered() {
        // With radii jittered over 20..100% of the local taper, a fair
        // share of points must land well inside the cone surface.
        let formations = generate();
        let interior = formations
            .tree
            .iter()
            .filter(|p| {
                let horizontal = (p.x * p.x + p.z * p.z).sqrt();
                let taper = 1.0 - (p.y + TREE_HEIGHT / 2.0) / TREE_HEIGHT;
                horizontal < TREE_RADIUS * taper * 0.6
            })
            .count();
        assert!(interior > COUNT / 4, "interior points {interior}");
    }
}
