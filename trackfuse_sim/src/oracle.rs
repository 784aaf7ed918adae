//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated world:
//! - True positions of all targets, in the reference ENU frame
//! - Constant-velocity kinematics
//! - Platform names for truth lookups

use nalgebra::Vector3;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A ground truth target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthTarget {
    pub id: u64,

    /// Platform name, carried in sensor reports as truth
    pub name: String,

    /// Position [e, n, u] (m)
    pub position: Vector3<f64>,

    /// Velocity [ve, vn, vu] (m/s)
    pub velocity: Vector3<f64>,

    pub active: bool,
}

pub struct Oracle {
    physics_rng: ChaCha8Rng,

    /// Ordered so sensor sweeps are deterministic
    targets: BTreeMap<u64, GroundTruthTarget>,

    next_id: u64,
    current_time: f64,
}

impl Oracle {
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            targets: BTreeMap::new(),
            next_id: 0,
            current_time: 0.0,
        }
    }

    /// Spawns a target and returns its id.
    pub fn spawn_target(&mut self, position: Vector3<f64>, velocity: Vector3<f64>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.targets.insert(
            id,
            GroundTruthTarget {
                id,
                name: format!("target-{}", id),
                position,
                velocity,
                active: true,
            },
        );
        id
    }

    /// Spawns a target with a seeded perturbation of its start position.
    pub fn spawn_jittered(&mut self, position: Vector3<f64>, velocity: Vector3<f64>, jitter_m: f64) -> u64 {
        let offset = Vector3::new(
            self.physics_rng.gen_range(-jitter_m..=jitter_m),
            self.physics_rng.gen_range(-jitter_m..=jitter_m),
            0.0,
        );
        self.spawn_target(position + offset, velocity)
    }

    pub fn remove_target(&mut self, id: u64) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.active = false;
        }
    }

    /// Advances physics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        for target in self.targets.values_mut().filter(|t| t.active) {
            target.position += target.velocity * dt;
        }
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn active_targets(&self) -> impl Iterator<Item = &GroundTruthTarget> {
        self.targets.values().filter(|t| t.active)
    }

    pub fn active_count(&self) -> usize {
        self.active_targets().count()
    }

    pub fn target(&self, id: u64) -> Option<&GroundTruthTarget> {
        self.targets.get(&id)
    }

    /// Active target looked up by platform name.
    pub fn target_by_name(&self, name: &str) -> Option<&GroundTruthTarget> {
        self.active_targets().find(|t| t.name == name)
    }

    /// Platform index -> name table for the track manager.
    pub fn platform_registry(&self) -> HashMap<usize, String> {
        self.targets
            .values()
            .filter_map(|t| usize::try_from(t.id).ok().map(|index| (index, t.name.clone())))
            .collect()
    }

    pub fn ground_truth_positions(&self) -> Vec<(u64, Vector3<f64>)> {
        self.active_targets().map(|t| (t.id, t.position)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_velocity() {
        let mut oracle = Oracle::new(7);
        let id = oracle.spawn_target(Vector3::new(0.0, 0.0, 100.0), Vector3::new(10.0, -5.0, 0.0));
        for _ in 0..10 {
            oracle.step(0.5);
        }

        let target = oracle.target(id).unwrap();
        assert!((target.position - Vector3::new(50.0, -25.0, 100.0)).norm() < 1e-9);
        assert!((oracle.time() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_removed_target_stops() {
        let mut oracle = Oracle::new(7);
        let a = oracle.spawn_target(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0));
        oracle.spawn_target(Vector3::zeros(), Vector3::new(0.0, 1.0, 0.0));
        oracle.remove_target(a);
        oracle.step(1.0);

        assert_eq!(oracle.active_count(), 1);
        assert_eq!(oracle.target(a).unwrap().position, Vector3::zeros());
        assert!(oracle.target_by_name("target-0").is_none());
        assert!(oracle.target_by_name("target-1").is_some());
    }

    #[test]
    fn test_jitter_is_seeded() {
        let spawn = |seed| {
            let mut oracle = Oracle::new(seed);
            let id = oracle.spawn_jittered(Vector3::zeros(), Vector3::zeros(), 100.0);
            oracle.target(id).unwrap().position
        };
        assert_eq!(spawn(42), spawn(42));
        assert_ne!(spawn(42), spawn(43));
    }

    #[test]
    fn test_platform_registry() {
        let mut oracle = Oracle::new(1);
        oracle.spawn_target(Vector3::zeros(), Vector3::zeros());
        oracle.spawn_target(Vector3::zeros(), Vector3::zeros());

        let registry = oracle.platform_registry();
        assert_eq!(registry.get(&1).map(String::as_str), Some("target-1"));
    }
}
