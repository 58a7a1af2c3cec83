//! Checkpoint and restore.
//!
//! A checkpoint is an explicit serialization of the data model (time base,
//! frame tree, bodies, loop clocks, integrator internals, pending actions)
//! plus the originating configuration, from which the non-serializable
//! runtime (force contributors, integrator instances) is rebuilt. Restoring
//! and continuing reproduces the uninterrupted run: floats are encoded in
//! shortest-roundtrip decimal form, which decodes to the identical bits.

use serde::{Deserialize, Serialize};

use crate::action::QueuedAction;
use crate::body::BodyRegistry;
use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::frames::FrameTree;
use crate::integ::{IntegratorMethod, IntegratorSnapshot, LoopPhase};
use crate::sim::Simulation;
use crate::time::TimeManager;

const FORMAT_VERSION: u32 = 1;

/// Per-loop saved state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoopCheckpoint {
    name: String,
    method: Option<IntegratorMethod>,
    phase: LoopPhase,
    current_sim: f64,
    current_dyn: f64,
    members: Vec<String>,
    integrator: IntegratorSnapshot,
}

/// The full serialized snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
    format_version: u32,
    config: SimConfig,
    sim_time: f64,
    time: TimeManager,
    frames: FrameTree,
    bodies: BodyRegistry,
    home_loops: Vec<(String, String)>,
    loops: Vec<LoopCheckpoint>,
    pending_actions: Vec<QueuedAction>,
    next_action_seq: u64,
}

impl Simulation {
    /// Serialize the complete simulation state. Only valid at a safe point
    /// (between `run_to` calls); the run loop never holds one mid-step.
    pub fn serialize_state(&self) -> SimResult<String> {
        let checkpoint = Checkpoint {
            format_version: FORMAT_VERSION,
            config: self.config.clone(),
            sim_time: self.sim_time,
            time: self.time.clone(),
            frames: self.frames.clone(),
            bodies: self.bodies.clone(),
            home_loops: self
                .home_loops
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            loops: self
                .loops
                .iter()
                .map(|lp| LoopCheckpoint {
                    name: lp.name().to_string(),
                    method: lp.method(),
                    phase: lp.phase(),
                    current_sim: lp.current_sim(),
                    current_dyn: lp.current_dyn(),
                    members: lp.members().to_vec(),
                    integrator: lp.integrator_snapshot(),
                })
                .collect(),
            pending_actions: self.actions.pending().to_vec(),
            next_action_seq: self.actions.next_seq(),
        };
        serde_json::to_string(&checkpoint)
            .map_err(|e| SimError::Checkpoint(format!("encode failed: {e}")))
    }

    /// Rebuild a simulation from a checkpoint blob and continue from the
    /// saved instant.
    pub fn restore_state(blob: &str) -> SimResult<Simulation> {
        let checkpoint: Checkpoint = serde_json::from_str(blob)
            .map_err(|e| SimError::Checkpoint(format!("decode failed: {e}")))?;
        if checkpoint.format_version != FORMAT_VERSION {
            return Err(SimError::Checkpoint(format!(
                "unsupported checkpoint format {} (expected {FORMAT_VERSION})",
                checkpoint.format_version
            )));
        }

        // Rebuild the runtime from configuration, then overlay saved state.
        let mut sim = Simulation::build(checkpoint.config)?;
        sim.sim_time = checkpoint.sim_time;
        sim.time = checkpoint.time;
        sim.frames = checkpoint.frames;
        sim.bodies = checkpoint.bodies;
        sim.home_loops = checkpoint.home_loops.into_iter().collect();
        sim.actions = crate::action::ActionQueue::restore(
            checkpoint.pending_actions,
            checkpoint.next_action_seq,
        );

        for saved in checkpoint.loops {
            let idx = sim
                .loops
                .iter()
                .position(|l| l.name() == saved.name)
                .ok_or_else(|| {
                    SimError::Checkpoint(format!(
                        "checkpoint references unknown loop '{}'",
                        saved.name
                    ))
                })?;
            let lp = &mut sim.loops[idx];
            if let Some(method) = saved.method {
                if Some(method) != lp.method() {
                    lp.switch_method(method)?;
                }
            }
            // Replace build-time membership with the saved set.
            for member in lp.members().to_vec() {
                lp.remove_member(&member)?;
            }
            for member in &saved.members {
                lp.add_member(member)?;
            }
            lp.set_phase(saved.phase);
            lp.set_clocks(saved.current_sim, saved.current_dyn);
            lp.restore_integrator(&saved.integrator);
        }

        log::info!(
            "restored checkpoint at t = {} (dyn {})",
            sim.sim_time,
            sim.time.dyn_seconds()
        );
        Ok(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::SimAction;
    use crate::config::{
        BodyConfig, InitialStateConfig, LoopConfig, MassConfig, PlanetConfig, RotInit,
        TransInit,
    };
    use crate::forces::{GravityControl, PlanetRotation};
    use crate::time::TimeConfig;
    use std::collections::BTreeMap;

    const MU_EARTH: f64 = 3.986_004_418e14;

    fn config(method: IntegratorMethod) -> SimConfig {
        let r = 6.9e6;
        let v = (MU_EARTH / r).sqrt();
        SimConfig {
            time: TimeConfig::default(),
            planets: vec![PlanetConfig {
                name: "Earth".into(),
                mu: MU_EARTH,
                radius: 6.378_137e6,
                rotation: PlanetRotation::None,
                zonals: vec![1.082_626_68e-3],
                field: None,
                center: [0.0; 3],
            }],
            loops: vec![LoopConfig {
                name: "main".into(),
                step_size: 30.0,
                method,
            }],
            bodies: vec![BodyConfig {
                name: "sat".into(),
                mass: MassConfig {
                    mass: 250.0,
                    com: [0.0; 3],
                    inertia: [[80.0, 0.0, 0.0], [0.0, 90.0, 0.0], [0.0, 0.0, 70.0]],
                },
                attach_points: BTreeMap::new(),
                initial_state: InitialStateConfig {
                    frame: "Earth.inertial".into(),
                    translation: TransInit::Cartesian {
                        position: [r, 0.0, 0.0],
                        velocity: [0.0, v * 0.9, v * 0.3],
                    },
                    rotation: RotInit::default(),
                },
                integ_frame: None,
                gravity: vec![GravityControl::harmonic("Earth", 2, 0)],
                drag: None,
                radiation: None,
                integrate_translation: true,
                integrate_rotation: false,
                integ_loop: "main".into(),
            }],
        }
    }

    fn final_position(sim: &Simulation) -> nalgebra::Vector3<f64> {
        sim.state_of("sat").unwrap().trans.position
    }

    #[test]
    fn restore_continues_bit_identically_rk4() {
        // Reference: uninterrupted run.
        let mut reference = Simulation::build(config(IntegratorMethod::Rk4)).unwrap();
        reference.run_to(3_000.0).unwrap();

        // Checkpointed: stop halfway, serialize, restore, continue.
        let mut first_half = Simulation::build(config(IntegratorMethod::Rk4)).unwrap();
        first_half.run_to(1_500.0).unwrap();
        let blob = first_half.serialize_state().unwrap();
        let mut second_half = Simulation::restore_state(&blob).unwrap();
        second_half.run_to(3_000.0).unwrap();

        let a = final_position(&reference);
        let b = final_position(&second_half);
        assert_eq!(a, b, "restored run diverged: {:?} vs {:?}", a, b);
    }

    #[test]
    fn restore_preserves_multistep_history() {
        // Gauss-Jackson carries derivative history across the checkpoint;
        // a restore must not re-enter bootstrap.
        let method = IntegratorMethod::GaussJackson { order: 8 };
        let mut reference = Simulation::build(config(method)).unwrap();
        reference.run_to(2_400.0).unwrap();

        let mut first = Simulation::build(config(method)).unwrap();
        first.run_to(1_200.0).unwrap();
        let blob = first.serialize_state().unwrap();
        let mut resumed = Simulation::restore_state(&blob).unwrap();
        resumed.run_to(2_400.0).unwrap();

        assert_eq!(final_position(&reference), final_position(&resumed));
    }

    #[test]
    fn pending_actions_survive_checkpoint() {
        let mut sim = Simulation::build(config(IntegratorMethod::Rk4)).unwrap();
        sim.schedule(2_000.0, SimAction::SetScaleFactor { factor: -1.0 });
        sim.run_to(1_000.0).unwrap();

        let blob = sim.serialize_state().unwrap();
        let mut restored = Simulation::restore_state(&blob).unwrap();
        restored.run_to(2_500.0).unwrap();
        // The flip applied after restore: the root clock turned around at
        // t = 2000 and walked back 500 s.
        approx::assert_relative_eq!(
            restored.time().dyn_seconds(),
            1_500.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn garbage_blob_rejected() {
        assert!(Simulation::restore_state("not json").is_err());
        assert!(matches!(
            Simulation::restore_state("{\"format_version\": 99}").unwrap_err(),
            SimError::Checkpoint(_)
        ));
    }
}
