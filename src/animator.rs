//! Particle animation
//!
//! Owns the per-particle smoothed positions and advances them toward the
//! formation selected by the current gesture, once per render tick. Rotation,
//! scale pulse, and vertical bob are pure functions of elapsed time and
//! particle index; only positions persist between ticks, so the whole state
//! of the morph is the position array plus the gesture label.

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::formation::Formations;
use crate::gesture::GestureLabel;

/// Per-tick convergence factor while idle (slow drift back to the nebula).
pub const IDLE_SMOOTHING: f32 = 0.02;
/// Per-tick convergence factor while a gesture is held.
pub const ACTIVE_SMOOTHING: f32 = 0.08;

/// Star scale convergence factor, shared across all three axes.
pub const STAR_SMOOTHING: f32 = 0.1;
/// Star scale target while the tree is formed.
pub const STAR_SCALE_TREE: f32 = 1.8;

const BOB_AMPLITUDE: f32 = 0.1;
const BASE_SCALE: f32 = 0.12;
const SCALE_PULSE: f32 = 0.04;

/// Gold, red, emerald. Particle `i` keeps palette entry `i % 3` for life.
pub const PALETTE: [[f32; 3]; 3] = [
    [1.0, 0.843, 0.0],
    [1.0, 0.0, 0.0],
    [0.314, 0.784, 0.471],
];

/// One GPU instance record. `color.w` is an emissive multiplier read by the
/// shader; the particles are lit only while the star glows on its own.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Instance {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
}

fn instance(position: Vec3, rotation: Quat, scale: f32, index: usize) -> Instance {
    let color = PALETTE[index % PALETTE.len()];
    Instance {
        model: Mat4::from_scale_rotation_translation(Vec3::splat(scale), rotation, position)
            .to_cols_array_2d(),
        color: [color[0], color[1], color[2], 0.0],
    }
}

/// All animated particles, split into a cuboid batch (first half) and a
/// sphere batch (remainder). The split is purely cosmetic; every particle
/// follows the same targeting and smoothing law.
pub struct ParticleField {
    formations: Formations,
    positions: Vec<Vec3>,
    half: usize,
}

impl ParticleField {
    /// Particles start at rest on their nebula slots.
    pub fn new(formations: Formations) -> Self {
        let positions = formations.nebula.clone();
        let half = positions.len() / 2;
        Self {
            formations,
            positions,
            half,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn cuboid_count(&self) -> usize {
        self.half
    }

    pub fn sphere_count(&self) -> usize {
        self.positions.len() - self.half
    }

    /// Smoothed positions, without the cosmetic bob.
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn formations(&self) -> &Formations {
        &self.formations
    }

    /// Advance one tick and write both instance batches.
    ///
    /// The label selects the target formation for this tick only: tree for
    /// TREE, nebula otherwise. `time` is seconds since the scene mounted.
    /// The slices are caller-owned scratch sized to `cuboid_count()` and
    /// `sphere_count()`, reused across ticks so the hot loop never
    /// allocates.
    pub fn step(
        &mut self,
        label: GestureLabel,
        time: f32,
        cuboids: &mut [Instance],
        spheres: &mut [Instance],
    ) {
        assert_eq!(cuboids.len(), self.half);
        assert_eq!(spheres.len(), self.positions.len() - self.half);

        let targets = if label == GestureLabel::Tree {
            &self.formations.tree
        } else {
            &self.formations.nebula
        };
        let factor = if label == GestureLabel::Idle {
            IDLE_SMOOTHING
        } else {
            ACTIVE_SMOOTHING
        };

        for i in 0..self.half {
            let position = &mut self.positions[i];
            *position += (targets[i] - *position) * factor;

            let fi = i as f32;
            let bobbed = Vec3::new(
                position.x,
                position.y + (time + fi).sin() * BOB_AMPLITUDE,
                position.z,
            );
            let rotation = Quat::from_euler(
                EulerRot::XYZ,
                time * 0.5 + fi,
                time * 0.2 + fi,
                time * 0.3,
            );
            let scale = BASE_SCALE + (time * 2.0 + fi).sin() * SCALE_PULSE;
            cuboids[i] = instance(bobbed, rotation, scale, i);
        }

        for (slot, i) in (self.half..self.positions.len()).enumerate() {
            let position = &mut self.positions[i];
            *position += (targets[i] - *position) * factor;

            let fi = i as f32;
            let bobbed = Vec3::new(
                position.x,
                position.y + (time + fi).cos() * BOB_AMPLITUDE,
                position.z,
            );
            let rotation = Quat::from_euler(
                EulerRot::XYZ,
                time * 0.3 + fi,
                time * 0.1,
                time * 0.5 + fi,
            );
            let scale = BASE_SCALE + (time * 1.5 + fi).cos() * SCALE_PULSE;
            spheres[slot] = instance(bobbed, rotation, scale, i);
        }
    }
}

/// Accent star hovering above the tree apex. Its scale converges toward 1.8
/// while the tree is formed and collapses to zero otherwise, with the same
/// exponential law as the particles at factor 0.1. Spin and bob keep running
/// regardless so the star never pops when it reappears.
pub struct StarPulse {
    scale: f32,
    tree_height: f32,
}

impl StarPulse {
    pub fn new(tree_height: f32) -> Self {
        Self {
            scale: 0.0,
            tree_height,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn step(&mut self, label: GestureLabel, time: f32) -> Instance {
        let target = if label == GestureLabel::Tree {
            STAR_SCALE_TREE
        } else {
            0.0
        };
        self.scale += (target - self.scale) * STAR_SMOOTHING;

        let position = Vec3::new(
            0.0,
            self.tree_height / 2.0 + 1.2 + (time * 2.5).sin() * 0.15,
            0.0,
        );
        let rotation = Quat::from_rotation_y(time * 1.5);
        Instance {
            model: Mat4::from_scale_rotation_translation(
                Vec3::splat(self.scale),
                rotation,
                position,
            )
            .to_cols_array_2d(),
            color: [1.0, 0.843, 0.0, 10.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::{classify, classify_openness, GestureCell};

    /// Formations with hand-picked targets so convergence is easy to reason
    /// about. Particles start on the nebula slots.
    fn fixed_field(count: usize) -> ParticleField {
        let nebula = (0..count)
            .map(|i| Vec3::new(i as f32, 0.0, 0.0))
            .collect::<Vec<_>>();
        let tree = (0..count)
            .map(|i| Vec3::new(i as f32, 10.0, 5.0))
            .collect::<Vec<_>>();
        ParticleField::new(Formations { nebula, tree })
    }

    fn scratch(field: &ParticleField) -> (Vec<Instance>, Vec<Instance>) {
        (
            vec![Instance::zeroed(); field.cuboid_count()],
            vec![Instance::zeroed(); field.sphere_count()],
        )
    }

    fn max_distance(field: &ParticleField, targets: &[Vec3]) -> f32 {
        field
            .positions()
            .iter()
            .zip(targets)
            .map(|(p, t)| (*t - *p).length())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_convergence_matches_closed_form() {
        // One axis: after k ticks at factor f the remaining gap is
        // (1 - f)^k of the initial gap.
        let mut field = fixed_field(4);
        let (mut cuboids, mut spheres) = scratch(&field);
        let start_gap = 10.0f32.hypot(5.0);

        for _ in 0..20 {
            field.step(GestureLabel::Tree, 0.0, &mut cuboids, &mut spheres);
        }

        let expected = start_gap * (1.0 - ACTIVE_SMOOTHING).powi(20);
        for (position, target) in field.positions().iter().zip(&field.formations().tree) {
            let gap = (*target - *position).length();
            assert!(
                (gap - expected).abs() < 1e-3,
                "gap {gap}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_label_switch_changes_target_next_tick() {
        let mut field = fixed_field(4);
        let (mut cuboids, mut spheres) = scratch(&field);

        field.step(GestureLabel::Idle, 0.0, &mut cuboids, &mut spheres);
        let before = field.positions().to_vec();

        field.step(GestureLabel::Tree, 0.0, &mut cuboids, &mut spheres);
        for ((after, before), target) in field
            .positions()
            .iter()
            .zip(&before)
            .zip(&field.formations().tree)
        {
            let expected = *before + (*target - *before) * ACTIVE_SMOOTHING;
            assert!((expected - *after).length() < 1e-5);
        }
    }

    #[test]
    fn test_explode_and_idle_share_the_nebula_target() {
        let mut idle_field = fixed_field(4);
        let mut explode_field = fixed_field(4);
        let (mut cuboids, mut spheres) = scratch(&idle_field);

        // Pull both away from the nebula first.
        for field in [&mut idle_field, &mut explode_field] {
            for _ in 0..10 {
                field.step(GestureLabel::Tree, 0.0, &mut cuboids, &mut spheres);
            }
        }

        idle_field.step(GestureLabel::Idle, 0.0, &mut cuboids, &mut spheres);
        explode_field.step(GestureLabel::Explode, 0.0, &mut cuboids, &mut spheres);

        // Same target, different rates.
        let nebula = idle_field.formations().nebula.clone();
        let idle_gap = max_distance(&idle_field, &nebula);
        let explode_gap = max_distance(&explode_field, &nebula);
        assert!(explode_gap < idle_gap);
    }

    #[test]
    fn test_idle_hold_settles_onto_nebula() {
        let mut field = fixed_field(8);
        let (mut cuboids, mut spheres) = scratch(&field);

        // Displace toward the tree, then release.
        for _ in 0..100 {
            field.step(GestureLabel::Tree, 0.0, &mut cuboids, &mut spheres);
        }
        let nebula = field.formations().nebula.clone();
        let displaced_gap = max_distance(&field, &nebula);
        assert!(displaced_gap > 1.0);

        for _ in 0..500 {
            field.step(GestureLabel::Idle, 0.0, &mut cuboids, &mut spheres);
        }
        assert!(max_distance(&field, &nebula) < displaced_gap * 0.01);
    }

    #[test]
    fn test_fist_stream_drives_tree_convergence() {
        // Full pipeline: openness -> label -> cell -> animator.
        let cell = GestureCell::default();
        let mut field = fixed_field(8);
        let (mut cuboids, mut spheres) = scratch(&field);
        let tree = field.formations().tree.clone();

        let mut previous_gap = max_distance(&field, &tree);
        for tick in 0..200 {
            cell.set(classify_openness(0.05));
            field.step(cell.get(), tick as f32 / 60.0, &mut cuboids, &mut spheres);
            let gap = max_distance(&field, &tree);
            assert!(gap < previous_gap + 1e-6, "tick {tick} gap grew");
            previous_gap = gap;
        }
        assert!(previous_gap < 0.01);
    }

    #[test]
    fn test_alternating_observations_never_jump() {
        // A flickering detection (no hand / open palm) alternates the label
        // between idle and explode. Both map to the nebula target, so the
        // morph must stay continuous: each tick moves a particle by at most
        // ACTIVE_SMOOTHING of its remaining gap.
        let cell = GestureCell::default();
        let mut field = fixed_field(8);
        let (mut cuboids, mut spheres) = scratch(&field);

        for _ in 0..50 {
            field.step(GestureLabel::Tree, 0.0, &mut cuboids, &mut spheres);
        }
        let nebula = field.formations().nebula.clone();

        let mut previous = field.positions().to_vec();
        let mut previous_gap = max_distance(&field, &nebula);
        for tick in 0..100 {
            let label = if tick % 2 == 0 {
                classify(None)
            } else {
                classify_openness(0.4)
            };
            cell.set(label);
            field.step(cell.get(), 0.0, &mut cuboids, &mut spheres);

            let gap = max_distance(&field, &nebula);
            assert!(gap <= previous_gap + 1e-6);
            for (now, was) in field.positions().iter().zip(&previous) {
                assert!((*now - *was).length() <= previous_gap * ACTIVE_SMOOTHING + 1e-5);
            }
            previous = field.positions().to_vec();
            previous_gap = gap;
        }
    }

    #[test]
    fn test_oscillators_are_deterministic_in_time() {
        // With positions at rest, the emitted transforms depend only on
        // elapsed time, never on how many ticks ran before.
        let mut a = fixed_field(6);
        let mut b = fixed_field(6);
        let (mut cuboids_a, mut spheres_a) = scratch(&a);
        let (mut cuboids_b, mut spheres_b) = scratch(&b);

        a.step(GestureLabel::Idle, 3.5, &mut cuboids_a, &mut spheres_a);
        for _ in 0..7 {
            b.step(GestureLabel::Idle, 3.5, &mut cuboids_b, &mut spheres_b);
        }

        assert_eq!(cuboids_a, cuboids_b);
        assert_eq!(spheres_a, spheres_b);
    }

    #[test]
    fn test_palette_cycles_across_both_batches() {
        let mut field = fixed_field(6);
        let (mut cuboids, mut spheres) = scratch(&field);
        field.step(GestureLabel::Idle, 0.0, &mut cuboids, &mut spheres);

        // Global indices 0..3 are cuboids, 3..6 are spheres; the palette
        // cycle must not restart at the batch boundary.
        for (i, inst) in cuboids.iter().chain(spheres.iter()).enumerate() {
            let expected = PALETTE[i % 3];
            assert_eq!(&inst.color[..3], &expected[..]);
            assert_eq!(inst.color[3], 0.0);
        }
    }

    #[test]
    fn test_star_rises_only_for_tree() {
        let mut star = StarPulse::new(12.0);
        assert_eq!(star.scale(), 0.0);

        for _ in 0..80 {
            star.step(GestureLabel::Tree, 0.0);
        }
        assert!((star.scale() - STAR_SCALE_TREE).abs() < 0.01);

        for _ in 0..80 {
            star.step(GestureLabel::Explode, 0.0);
        }
        assert!(star.scale() < 0.01);
    }

    #[test]
    fn test_star_scale_follows_exponential_law() {
        let mut star = StarPulse::new(12.0);
        star.step(GestureLabel::Tree, 0.0);
        let expected = STAR_SCALE_TREE * STAR_SMOOTHING;
        assert!((star.scale() - expected).abs() < 1e-6);
        star.step(GestureLabel::Tree, 0.0);
        let expected = expected + (STAR_SCALE_TREE - expected) * STAR_SMOOTHING;
        assert!((star.scale() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_star_is_emissive_gold() {
        let mut star = StarPulse::new(12.0);
        let inst = star.step(GestureLabel::Tree, 1.0);
        assert_eq!(inst.color, [1.0, 0.843, 0.0, 10.0]);
    }
}
