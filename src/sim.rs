//! The simulation context and run loop.
//!
//! A [`Simulation`] is an explicit context object owning the time base,
//! frame tree, bodies, force aggregator, integration loops, and action
//! queue. Nothing is process-global; several simulations coexist in one
//! process.
//!
//! The run loop is event driven: driver time jumps between loop boundaries
//! and action due times. At each event, due loops integrate their members
//! up to the event time (in root-clock seconds, so scale-factor changes and
//! time reversal fall out naturally), and then due actions apply. Actions
//! therefore always see member states at the safe point, never mid-step.

use nalgebra::{DVector, Matrix3, UnitQuaternion, Vector3};
use std::collections::BTreeMap;

use crate::action::{ActionQueue, SimAction};
use crate::body::{AttachPoint, BodyRegistry};
use crate::config::{
    BodyConfig, InitialStateConfig, PlanetConfig, SimConfig, TransInit,
};
use crate::error::{SimError, SimResult};
use crate::forces::{
    AtmosphericDrag, BodyForces, ExponentialAtmosphere, ForceAggregator, ForceContext,
    ForceModel, GravitySource, HarmonicField, PlanetRotation, RadiationPressure,
};
use crate::frames::derived::{lvlh_transform, ned_transform};
use crate::frames::{FrameId, FrameKind, FrameTree, Transform};
use crate::integ::{IntegrationLoop, LoopPhase};
use crate::state::{attitude_rate, BodyState, ClassicalElements, RotState, TransState, SLOTS_PER_BODY};
use crate::time::{TimeManager, TimeScaleId};

/// Comparison slack for event times.
fn time_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// One recorded sample of a body's state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StepRecord {
    /// Driver time of the sample.
    pub sim_time: f64,
    /// Root-clock time of the sample.
    pub dyn_time: f64,
    /// Body name.
    pub body: String,
    /// State in the body's integration frame.
    pub state: BodyState,
}

#[derive(Debug, Clone)]
struct Recorder {
    interval: f64,
    last: f64,
    records: Vec<StepRecord>,
}

/// Cached planet-fixed frame bookkeeping.
#[derive(Debug, Clone)]
struct PlanetFrames {
    pfix: FrameId,
    rotation: PlanetRotation,
}

/// A complete, self-contained dynamics simulation.
pub struct Simulation {
    pub(crate) config: SimConfig,
    pub(crate) time: TimeManager,
    pub(crate) frames: FrameTree,
    pub(crate) bodies: BodyRegistry,
    pub(crate) forces: ForceAggregator,
    pub(crate) loops: Vec<IntegrationLoop>,
    pub(crate) actions: ActionQueue,
    /// Driver clock; monotonic regardless of the root clock's direction.
    pub(crate) sim_time: f64,
    /// Body name -> home loop name (restored on detach).
    pub(crate) home_loops: BTreeMap<String, String>,
    planet_frames: Vec<PlanetFrames>,
    recorder: Option<Recorder>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("sim_time", &self.sim_time)
            .field("loops", &self.loops.len())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Build and validate a simulation. Configuration-time failures happen
    /// here, before any stepping.
    pub fn build(config: SimConfig) -> SimResult<Self> {
        config.validate()?;

        let time = TimeManager::from_config(&config.time)?;
        let mut frames = FrameTree::new();
        let mut forces = ForceAggregator::new();
        let mut planet_frames = Vec::new();

        // Planets: the first is the tree root; the rest hang off it at
        // their configured centers.
        let root = frames.add_root(&format!("{}.inertial", config.planets[0].name))?;
        for (i, planet) in config.planets.iter().enumerate() {
            let inertial = if i == 0 {
                root
            } else {
                frames.add_child(
                    root,
                    &format!("{}.inertial", planet.name),
                    FrameKind::Inertial,
                    Transform::rigid(
                        Vector3::from_row_slice(&planet.center),
                        UnitQuaternion::identity(),
                    ),
                )?
            };
            let pfix = frames.add_child(
                inertial,
                &format!("{}.pfix", planet.name),
                FrameKind::PlanetFixed,
                Transform::identity(),
            )?;
            planet_frames.push(PlanetFrames {
                pfix,
                rotation: planet.rotation,
            });
            forces.add_source(build_source(planet)?)?;
        }

        let mut loops = Vec::new();
        for loop_config in &config.loops {
            let mut lp = IntegrationLoop::new(&loop_config.name, loop_config.step_size)?;
            lp.configure(loop_config.method)?;
            loops.push(lp);
        }

        let mut sim = Self {
            time,
            frames,
            bodies: BodyRegistry::new(),
            forces,
            loops,
            actions: ActionQueue::new(),
            sim_time: 0.0,
            home_loops: BTreeMap::new(),
            planet_frames,
            recorder: None,
            config,
        };
        sim.refresh_planet_frames()?;

        for body_config in sim.config.bodies.clone() {
            sim.add_body_from_config(&body_config)?;
        }

        log::info!(
            "simulation built: {} planets, {} bodies, {} loops",
            sim.config.planets.len(),
            sim.bodies.len(),
            sim.loops.len()
        );
        Ok(sim)
    }

    fn add_body_from_config(&mut self, config: &BodyConfig) -> SimResult<()> {
        let integ_frame_name = config
            .integ_frame
            .clone()
            .unwrap_or_else(|| config.initial_state.frame.clone());
        let integ_frame = self.frames.id(&integ_frame_name)?;
        match self.frames.kind(integ_frame) {
            FrameKind::Root | FrameKind::Inertial => {}
            kind => {
                return Err(SimError::Configuration(format!(
                    "body '{}' integration frame '{integ_frame_name}' must be inertial, got {kind:?}",
                    config.name
                )))
            }
        }

        let props = config.mass.to_properties();
        if config.integrate_rotation && props.inertia.try_inverse().is_none() {
            return Err(SimError::Configuration(format!(
                "body '{}' integrates rotation but its inertia tensor is singular",
                config.name
            )));
        }

        let mut attach_points = BTreeMap::new();
        for (name, point) in &config.attach_points {
            attach_points.insert(
                name.clone(),
                AttachPoint {
                    position: Vector3::from_row_slice(&point.position),
                    orientation: point.orientation.to_quaternion()?,
                },
            );
        }

        let id = self
            .bodies
            .add_body(&mut self.frames, &config.name, props, attach_points, integ_frame)?;
        {
            let body = self.bodies.get_mut(id);
            body.integrate_translation = config.integrate_translation;
            body.integrate_rotation = config.integrate_rotation;
        }

        self.apply_state_init(&config.name, &config.initial_state)?;

        let loop_index = self.loop_index(&config.integ_loop)?;
        self.loops[loop_index].add_member(&config.name)?;
        self.home_loops
            .insert(config.name.clone(), config.integ_loop.clone());

        let mut contributors: Vec<Box<dyn ForceModel>> = Vec::new();
        if let Some(drag) = &config.drag {
            let planet = self.planet_config(&drag.source)?;
            let atmosphere = drag.atmosphere.clone().unwrap_or(ExponentialAtmosphere {
                rho0: 1.225,
                surface_radius: planet.radius,
                scale_height: 8_500.0,
                max_altitude: 1.0e6,
            });
            contributors.push(Box::new(AtmosphericDrag::new(
                drag.cd_area,
                atmosphere,
                drag.source.clone(),
                planet.rotation.rate(),
            )));
        }
        if let Some(radiation) = &config.radiation {
            let planet = self.planet_config(&radiation.occulting_source)?;
            contributors.push(Box::new(RadiationPressure::new(
                radiation.cr_area,
                Vector3::from_row_slice(&radiation.sun_position),
                radiation.shadow,
                planet.radius,
            )));
        }
        self.forces.set_body_forces(
            &config.name,
            BodyForces {
                gravity: config.gravity.clone(),
                contributors,
            },
        )?;
        Ok(())
    }

    fn planet_config(&self, name: &str) -> SimResult<&PlanetConfig> {
        self.config
            .planets
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SimError::Configuration(format!("unknown planet '{name}'")))
    }

    fn loop_index(&self, name: &str) -> SimResult<usize> {
        self.loops
            .iter()
            .position(|l| l.name() == name)
            .ok_or_else(|| SimError::UnknownLoop(name.to_string()))
    }

    /// Index of the loop currently carrying `body`, if any.
    fn loop_of(&self, body: &str) -> Option<usize> {
        self.loops
            .iter()
            .position(|l| l.members().iter().any(|m| m == body))
    }

    // -----------------------------------------------------------------
    // Clocks and bookkeeping
    // -----------------------------------------------------------------

    /// Driver time (monotonic).
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    /// The time base.
    pub fn time(&self) -> &TimeManager {
        &self.time
    }

    /// Change the root clock rate immediately (between steps). Scheduled
    /// changes go through [`SimAction::SetScaleFactor`].
    pub fn set_scale_factor(&mut self, factor: f64) {
        self.time.set_scale_factor(factor);
    }

    /// The frame tree.
    pub fn frames(&self) -> &FrameTree {
        &self.frames
    }

    /// The body registry.
    pub fn bodies(&self) -> &BodyRegistry {
        &self.bodies
    }

    /// Schedule an action at a driver time.
    pub fn schedule(&mut self, at_sim_time: f64, action: SimAction) -> u64 {
        self.actions.schedule(at_sim_time, action)
    }

    /// Start recording member states at most every `interval` driver
    /// seconds (0 records every step).
    pub fn enable_recording(&mut self, interval: f64) {
        self.recorder = Some(Recorder {
            interval,
            last: f64::NEG_INFINITY,
            records: Vec::new(),
        });
    }

    /// Recorded samples so far.
    pub fn records(&self) -> &[StepRecord] {
        self.recorder.as_ref().map(|r| r.records.as_slice()).unwrap_or(&[])
    }

    /// Whether a loop's most recent step met its corrector tolerance.
    pub fn loop_converged(&self, name: &str) -> SimResult<bool> {
        Ok(self.loops[self.loop_index(name)?].last_step_converged())
    }

    /// Pause a loop at its current boundary.
    pub fn pause_loop(&mut self, name: &str) -> SimResult<()> {
        let idx = self.loop_index(name)?;
        self.loops[idx].pause()
    }

    /// Resume a paused loop at the present time.
    pub fn resume_loop(&mut self, name: &str) -> SimResult<()> {
        let idx = self.loop_index(name)?;
        let (sim, dyn_time) = (self.sim_time, self.time.dyn_seconds());
        self.loops[idx].start(sim, dyn_time)
    }

    /// Terminally complete a loop.
    pub fn complete_loop(&mut self, name: &str) -> SimResult<()> {
        let idx = self.loop_index(name)?;
        self.loops[idx].complete();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------

    /// Advance driver time to `target`, stepping every running loop at its
    /// own rate and applying due actions at safe points.
    pub fn run_to(&mut self, target: f64) -> SimResult<()> {
        if target < self.sim_time && !time_close(target, self.sim_time) {
            return Err(SimError::InvalidState(format!(
                "driver time is monotonic: target {target} is before {}",
                self.sim_time
            )));
        }

        self.start_loops()?;
        self.process_due_actions()?;

        while self.sim_time < target && !time_close(self.sim_time, target) {
            let mut t_next = target;
            for lp in &self.loops {
                if lp.phase() == LoopPhase::Running {
                    t_next = t_next.min(lp.next_due());
                }
            }
            if let Some(action_time) = self.actions.next_time() {
                if action_time > self.sim_time && !time_close(action_time, self.sim_time) {
                    t_next = t_next.min(action_time);
                }
            }
            t_next = t_next.min(target);

            self.time.advance(t_next - self.sim_time);
            self.sim_time = t_next;
            self.refresh_planet_frames()?;

            for idx in 0..self.loops.len() {
                let due = self.loops[idx].phase() == LoopPhase::Running
                    && (self.loops[idx].next_due() <= self.sim_time
                        || time_close(self.loops[idx].next_due(), self.sim_time));
                if due {
                    self.step_loop(idx)?;
                }
            }

            self.process_due_actions()?;
        }
        Ok(())
    }

    /// Advance driver time by `duration`.
    pub fn run_for(&mut self, duration: f64) -> SimResult<()> {
        let target = self.sim_time + duration;
        self.run_to(target)
    }

    fn start_loops(&mut self) -> SimResult<()> {
        let (sim, dyn_time) = (self.sim_time, self.time.dyn_seconds());
        for lp in &mut self.loops {
            if lp.phase() == LoopPhase::Configured {
                lp.start(sim, dyn_time)?;
            }
        }
        Ok(())
    }

    fn refresh_planet_frames(&mut self) -> SimResult<()> {
        let dyn_now = self.time.dyn_seconds();
        for planet in &self.planet_frames {
            let theta = planet.rotation.angle_at(&self.time, dyn_now)?;
            let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta);
            let spin = Vector3::new(0.0, 0.0, planet.rotation.rate());
            self.frames.set_rotation(planet.pfix, rotation, spin);
        }
        Ok(())
    }

    /// Integrate one loop's members from their current time to now.
    fn step_loop(&mut self, idx: usize) -> SimResult<()> {
        let dyn_now = self.time.dyn_seconds();
        let sim_now = self.sim_time;
        let t0 = self.loops[idx].current_dyn();
        let dt = dyn_now - t0;

        let members = self.loops[idx].members().to_vec();
        if members.is_empty() || dt == 0.0 {
            self.loops[idx].mark_stepped(sim_now, dyn_now);
            return Ok(());
        }

        let n = members.len();
        let mut y = DVector::zeros(n * SLOTS_PER_BODY);
        let mut masses = Vec::with_capacity(n);
        let mut inv_inertias: Vec<Option<Matrix3<f64>>> = Vec::with_capacity(n);
        let mut flags = Vec::with_capacity(n);
        let mut frames_of = Vec::with_capacity(n);

        for (i, name) in members.iter().enumerate() {
            let id = self.bodies.id(name)?;
            let body = self.bodies.get(id);
            let local = self.frames.local(body.composite_frame());
            let state = BodyState {
                trans: TransState {
                    position: local.translation,
                    velocity: local.velocity,
                },
                rot: RotState {
                    attitude: local.rotation,
                    body_rate: local.angular_velocity,
                },
            };
            state.write_slots(
                &mut y.as_mut_slice()[i * SLOTS_PER_BODY..(i + 1) * SLOTS_PER_BODY],
            );
            let props = body.composite_properties().clone();
            inv_inertias.push(props.inertia.try_inverse());
            flags.push((body.integrate_translation, body.integrate_rotation));
            frames_of.push(body.composite_frame());
            masses.push(props);
        }

        let forces = &self.forces;
        let time = &self.time;
        let deriv = |t: f64, yv: &DVector<f64>| -> SimResult<DVector<f64>> {
            let mut dy = DVector::zeros(yv.len());
            for i in 0..n {
                let window = &yv.as_slice()[i * SLOTS_PER_BODY..(i + 1) * SLOTS_PER_BODY];
                let state = BodyState::read_slots(window);
                let ctx = ForceContext {
                    time,
                    dyn_time: t,
                    mass: &masses[i],
                };
                let derivs = forces.compute_derivatives(&members[i], &state, &ctx)?;

                let out = &mut dy.as_mut_slice()
                    [i * SLOTS_PER_BODY..(i + 1) * SLOTS_PER_BODY];
                if flags[i].0 {
                    out[0] = window[3];
                    out[1] = window[4];
                    out[2] = window[5];
                    out[3] = derivs.acceleration.x;
                    out[4] = derivs.acceleration.y;
                    out[5] = derivs.acceleration.z;
                }
                if flags[i].1 {
                    let q_dot = attitude_rate(&state.rot.attitude, &state.rot.body_rate);
                    out[6] = q_dot.w;
                    out[7] = q_dot.i;
                    out[8] = q_dot.j;
                    out[9] = q_dot.k;

                    let inv = inv_inertias[i].ok_or_else(|| {
                        SimError::InvalidState(format!(
                            "body '{}' has a singular composite inertia tensor",
                            members[i]
                        ))
                    })?;
                    let w = state.rot.body_rate;
                    let w_dot = inv * (derivs.torque - w.cross(&(masses[i].inertia * w)));
                    out[10] = w_dot.x;
                    out[11] = w_dot.y;
                    out[12] = w_dot.z;
                }
            }
            Ok(dy)
        };

        let outcome = self.loops[idx]
            .integrator_for_step()?
            .step(t0, dt, &y, &deriv)?;

        for (i, frame) in frames_of.iter().enumerate() {
            let state = BodyState::read_slots(
                &outcome.y.as_slice()[i * SLOTS_PER_BODY..(i + 1) * SLOTS_PER_BODY],
            );
            self.frames.set_local(
                *frame,
                Transform {
                    translation: state.trans.position,
                    rotation: state.rot.attitude,
                    velocity: state.trans.velocity,
                    angular_velocity: state.rot.body_rate,
                },
            );
        }

        self.loops[idx].mark_stepped(sim_now, dyn_now);

        if let Some(recorder) = self.recorder.as_mut() {
            if sim_now - recorder.last >= recorder.interval
                || time_close(sim_now - recorder.last, recorder.interval)
            {
                for (i, name) in members.iter().enumerate() {
                    let state = BodyState::read_slots(
                        &outcome.y.as_slice()
                            [i * SLOTS_PER_BODY..(i + 1) * SLOTS_PER_BODY],
                    );
                    recorder.records.push(StepRecord {
                        sim_time: sim_now,
                        dyn_time: dyn_now,
                        body: name.clone(),
                        state,
                    });
                }
                recorder.last = sim_now;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------

    fn process_due_actions(&mut self) -> SimResult<()> {
        for queued in self.actions.drain_due(self.sim_time + 1e-9) {
            if let Some(defer_to) = self.safe_point_for(&queued.action) {
                log::warn!(
                    "action #{} deferred to t = {defer_to}: affected loop not at a boundary",
                    queued.seq
                );
                self.actions.schedule(defer_to, queued.action);
                continue;
            }
            log::info!(
                "applying action #{} (due t = {}): {:?}",
                queued.seq,
                queued.time,
                queued.action
            );
            self.apply_action(&queued.action)?;
        }
        Ok(())
    }

    /// Body-topology actions only apply when every affected loop sits at a
    /// boundary (its members integrated exactly to now). Returns the next
    /// boundary to defer to, or `None` if applying now is safe.
    fn safe_point_for(&self, action: &SimAction) -> Option<f64> {
        let affected: Vec<usize> = match action {
            SimAction::Attach { subject, parent } => [subject, parent]
                .iter()
                .filter_map(|b| self.loop_of(b.as_str()))
                .collect(),
            SimAction::Detach { subject } => {
                let mut loops = Vec::new();
                if let Ok(id) = self.bodies.id(subject) {
                    let root = self.bodies.attach_root(id);
                    let root_name = self.bodies.get(root).name().to_string();
                    if let Some(idx) = self.loop_of(&root_name) {
                        loops.push(idx);
                    }
                }
                if let Some(home) = self.home_loops.get(subject) {
                    if let Ok(idx) = self.loop_index(home) {
                        loops.push(idx);
                    }
                }
                loops
            }
            SimAction::StateInit { subject, .. } | SimAction::LoopTransfer { subject, .. } => {
                let mut loops: Vec<usize> = self.loop_of(subject).into_iter().collect();
                if let SimAction::LoopTransfer { to_loop, .. } = action {
                    if let Ok(idx) = self.loop_index(to_loop) {
                        loops.push(idx);
                    }
                }
                loops
            }
            // Integrator swaps and clock-rate changes compose with any
            // loop phase.
            SimAction::SwitchIntegrator { .. } | SimAction::SetScaleFactor { .. } => Vec::new(),
        };

        affected
            .into_iter()
            .filter(|&idx| {
                self.loops[idx].phase() == LoopPhase::Running
                    && !time_close(self.loops[idx].current_sim(), self.sim_time)
            })
            .map(|idx| self.loops[idx].next_due())
            .min_by(f64::total_cmp)
    }

    /// Apply a mutation immediately. Callers outside the run loop must be
    /// at a safe point (no loop mid-step); the run loop guarantees it.
    pub fn apply_action(&mut self, action: &SimAction) -> SimResult<()> {
        match action {
            SimAction::Attach { subject, parent } => {
                let child_id = self.bodies.id(subject)?;
                let parent_id = self.bodies.id(parent)?;
                if let Some(idx) = self.loop_of(subject) {
                    self.loops[idx].remove_member(subject)?;
                }
                self.bodies.attach(
                    &mut self.frames,
                    child_id,
                    parent_id,
                    self.time.dyn_seconds(),
                )?;
                // The carrier's composite mass changed discontinuously.
                if let Some(idx) = self.loop_of(parent) {
                    self.loops[idx].reset_integrator();
                }
            }
            SimAction::Detach { subject } => {
                let child_id = self.bodies.id(subject)?;
                let former_root = self.bodies.attach_root(child_id);
                self.bodies
                    .detach(&mut self.frames, child_id, self.time.dyn_seconds())?;
                let home = self.home_loops.get(subject).cloned().ok_or_else(|| {
                    SimError::Configuration(format!(
                        "body '{subject}' has no home loop to return to"
                    ))
                })?;
                let idx = self.loop_index(&home)?;
                self.loops[idx].add_member(subject)?;
                let former_name = self.bodies.get(former_root).name().to_string();
                if let Some(idx) = self.loop_of(&former_name) {
                    self.loops[idx].reset_integrator();
                }
            }
            SimAction::StateInit { subject, state } => {
                let id = self.bodies.id(subject)?;
                if !self.bodies.get(id).is_root() {
                    return Err(SimError::InvalidState(format!(
                        "cannot re-initialize attached body '{subject}'"
                    )));
                }
                self.apply_state_init(subject, state)?;
                if let Some(idx) = self.loop_of(subject) {
                    self.loops[idx].reset_integrator();
                }
            }
            SimAction::SwitchIntegrator { integ_loop, method } => {
                let idx = self.loop_index(integ_loop)?;
                self.loops[idx].switch_method(*method)?;
            }
            SimAction::LoopTransfer { subject, to_loop } => {
                let from = self.loop_of(subject).ok_or_else(|| {
                    SimError::Configuration(format!(
                        "body '{subject}' is not in any loop"
                    ))
                })?;
                let to = self.loop_index(to_loop)?;
                if from == to {
                    return Ok(());
                }
                self.loops[from].remove_member(subject)?;
                self.loops[to].add_member(subject)?;
                self.home_loops
                    .insert(subject.to_string(), to_loop.to_string());
            }
            SimAction::SetScaleFactor { factor } => {
                self.time.set_scale_factor(*factor);
            }
        }
        Ok(())
    }

    /// Install a body state given in any connected frame, converting into
    /// the body's integration frame.
    pub(crate) fn apply_state_init(
        &mut self,
        body: &str,
        init: &InitialStateConfig,
    ) -> SimResult<()> {
        let id = self.bodies.id(body)?;
        let state_frame = self.frames.id(&init.frame)?;
        let integ_frame = self.bodies.get(id).integ_frame();

        let (position, velocity) = match &init.translation {
            TransInit::Cartesian { position, velocity } => (
                Vector3::from_row_slice(position),
                Vector3::from_row_slice(velocity),
            ),
            TransInit::Elements { source, elements } => {
                let mu = self.forces.source(source)?.mu;
                elements.to_cartesian(mu)?
            }
        };
        let attitude = init.rotation.orientation.to_quaternion()?;
        let body_rate = Vector3::from_row_slice(&init.rotation.body_rate);

        let rel = self.frames.resolve_transform(state_frame, integ_frame)?;
        let local = Transform {
            translation: rel.map_position(&position),
            velocity: rel.map_velocity(&position, &velocity),
            rotation: rel.map_attitude(&attitude),
            angular_velocity: rel.map_body_rate(&attitude, &body_rate),
        };

        let frame = self.bodies.get(id).composite_frame();
        self.frames.set_local(frame, local);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries (per-step outputs for logging consumers)
    // -----------------------------------------------------------------

    /// A body's current state in its integration frame.
    pub fn state_of(&self, body: &str) -> SimResult<BodyState> {
        let id = self.bodies.id(body)?;
        let b = self.bodies.get(id);
        let local = self
            .frames
            .resolve_transform(b.composite_frame(), b.integ_frame())?;
        Ok(BodyState {
            trans: TransState {
                position: local.translation,
                velocity: local.velocity,
            },
            rot: RotState {
                attitude: local.rotation,
                body_rate: local.angular_velocity,
            },
        })
    }

    /// A body's state projected onto classical orbital elements around a
    /// gravity source.
    pub fn elements_of(&self, body: &str, source: &str) -> SimResult<ClassicalElements> {
        let state = self.state_of(body)?;
        let src = self.forces.source(source)?;
        let rel = state.trans.position - src.center;
        ClassicalElements::from_cartesian(&rel, &state.trans.velocity, src.mu)
    }

    /// A subject body's state relative to a reference body's LVLH frame.
    pub fn lvlh_state_of(&self, subject: &str, reference: &str) -> SimResult<Transform> {
        let ref_id = self.bodies.id(reference)?;
        let ref_body = self.bodies.get(ref_id);
        let ref_state = self.state_of(reference)?;
        let lvlh = lvlh_transform(&ref_state.trans.position, &ref_state.trans.velocity)?;

        let subj_id = self.bodies.id(subject)?;
        let subj_in_frame = self.frames.resolve_transform(
            self.bodies.get(subj_id).composite_frame(),
            ref_body.integ_frame(),
        )?;
        Ok(lvlh.inverse().compose(&subj_in_frame))
    }

    /// A body's state relative to the local North-East-Down frame at its
    /// ground point on a planet.
    pub fn ned_state_of(&self, body: &str, planet: &str) -> SimResult<Transform> {
        let pfix = self.frames.id(&format!("{planet}.pfix"))?;
        let id = self.bodies.id(body)?;
        let in_pfix = self
            .frames
            .resolve_transform(self.bodies.get(id).composite_frame(), pfix)?;
        let ned = ned_transform(&in_pfix.translation)?;
        Ok(ned.inverse().compose(&in_pfix))
    }

    /// Planet rotation angle query, mostly for diagnostics.
    pub fn planet_rotation_angle(&self, planet: &str) -> SimResult<f64> {
        let p = self.planet_config(planet)?;
        p.rotation.angle_at(&self.time, self.time.dyn_seconds())
    }

    /// Seconds on a given time scale right now.
    pub fn scale_seconds(&self, scale: TimeScaleId) -> SimResult<f64> {
        self.time.seconds(scale)
    }
}

/// Build a gravity source from a planet configuration.
fn build_source(planet: &PlanetConfig) -> SimResult<GravitySource> {
    let mut source = GravitySource {
        name: planet.name.clone(),
        mu: planet.mu,
        radius: planet.radius,
        rotation: planet.rotation,
        center: Vector3::from_row_slice(&planet.center),
        field: None,
    };
    if let Some(field) = &planet.field {
        source = source.with_field(field.clone())?;
    } else if !planet.zonals.is_empty() {
        source = source.with_field(HarmonicField::from_zonals(&planet.zonals))?;
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoopConfig, MassConfig, RotInit};
    use crate::forces::GravityControl;
    use crate::integ::IntegratorMethod;
    use crate::time::TimeConfig;
    use approx::assert_relative_eq;

    const MU_EARTH: f64 = 3.986_004_418e14;

    fn leo_config(method: IntegratorMethod, step: f64) -> SimConfig {
        // Exactly circular: v = sqrt(mu / r).
        let r = 6.778e6;
        let v = (MU_EARTH / r).sqrt();
        SimConfig {
            time: TimeConfig::default(),
            planets: vec![PlanetConfig {
                name: "Earth".into(),
                mu: MU_EARTH,
                radius: 6.378_137e6,
                rotation: PlanetRotation::None,
                zonals: vec![],
                field: None,
                center: [0.0; 3],
            }],
            loops: vec![LoopConfig {
                name: "main".into(),
                step_size: step,
                method,
            }],
            bodies: vec![BodyConfig {
                name: "sat".into(),
                mass: MassConfig {
                    mass: 450.0,
                    com: [0.0; 3],
                    inertia: [[200.0, 0.0, 0.0], [0.0, 150.0, 0.0], [0.0, 0.0, 120.0]],
                },
                attach_points: BTreeMap::new(),
                initial_state: InitialStateConfig {
                    frame: "Earth.inertial".into(),
                    translation: TransInit::Cartesian {
                        position: [r, 0.0, 0.0],
                        velocity: [0.0, v, 0.0],
                    },
                    rotation: RotInit::default(),
                },
                integ_frame: None,
                gravity: vec![GravityControl::spherical("Earth")],
                drag: None,
                radiation: None,
                integrate_translation: true,
                integrate_rotation: false,
                integ_loop: "main".into(),
            }],
        }
    }

    #[test]
    fn circular_orbit_radius_is_stable() {
        let mut sim = Simulation::build(leo_config(IntegratorMethod::Rk4, 10.0)).unwrap();
        let r0 = sim.state_of("sat").unwrap().trans.position.norm();
        sim.run_for(3_000.0).unwrap();
        let r1 = sim.state_of("sat").unwrap().trans.position.norm();
        assert_relative_eq!(r1, r0, max_relative = 1e-6);
    }

    #[test]
    fn scheduled_scale_factor_flip_reverses_trajectory() {
        let mut sim = Simulation::build(leo_config(IntegratorMethod::Rk4, 5.0)).unwrap();
        let initial = sim.state_of("sat").unwrap();

        sim.schedule(600.0, SimAction::SetScaleFactor { factor: -1.0 });
        sim.run_to(1_200.0).unwrap();

        // Root clock went forward 600 s then back 600 s.
        assert_relative_eq!(sim.time().dyn_seconds(), 0.0, epsilon = 1e-9);
        let back = sim.state_of("sat").unwrap();
        let pos_err = (back.trans.position - initial.trans.position).norm();
        assert!(pos_err < 1.0e-3, "reversal position error {pos_err} m");
    }

    #[test]
    fn integrator_switch_mid_run() {
        let mut sim = Simulation::build(leo_config(
            IntegratorMethod::GaussJackson { order: 8 },
            10.0,
        ))
        .unwrap();
        sim.schedule(
            300.0,
            SimAction::SwitchIntegrator {
                integ_loop: "main".into(),
                method: IntegratorMethod::Rk4,
            },
        );
        sim.run_to(600.0).unwrap();
        // Still on a sane orbit after the switch.
        let r = sim.state_of("sat").unwrap().trans.position.norm();
        assert!((6.0e6..7.5e6).contains(&r));
    }

    #[test]
    fn multi_rate_loops_coexist() {
        let mut config = leo_config(IntegratorMethod::Rk4, 10.0);
        config.loops.push(LoopConfig {
            name: "slow".into(),
            step_size: 50.0,
            method: IntegratorMethod::Rk4,
        });
        let mut second = config.bodies[0].clone();
        second.name = "sat2".into();
        second.integ_loop = "slow".into();
        config.bodies.push(second);

        let mut sim = Simulation::build(config).unwrap();
        sim.run_to(500.0).unwrap();

        let r1 = sim.state_of("sat").unwrap().trans.position.norm();
        let r2 = sim.state_of("sat2").unwrap().trans.position.norm();
        // Same orbit integrated at different rates: both stay circular.
        assert_relative_eq!(r1, 6.778e6, max_relative = 1e-5);
        assert_relative_eq!(r2, 6.778e6, max_relative = 1e-4);
    }

    #[test]
    fn loop_transfer_moves_body() {
        let mut config = leo_config(IntegratorMethod::Rk4, 10.0);
        config.loops.push(LoopConfig {
            name: "slow".into(),
            step_size: 50.0,
            method: IntegratorMethod::Rk4,
        });
        let mut sim = Simulation::build(config).unwrap();
        sim.schedule(
            100.0,
            SimAction::LoopTransfer {
                subject: "sat".into(),
                to_loop: "slow".into(),
            },
        );
        sim.run_to(400.0).unwrap();
        let idx = sim.loop_index("slow").unwrap();
        assert!(sim.loops[idx].members().contains(&"sat".to_string()));
        let r = sim.state_of("sat").unwrap().trans.position.norm();
        assert_relative_eq!(r, 6.778e6, max_relative = 1e-4);
    }

    #[test]
    fn lvlh_of_coorbiting_pair_is_small() {
        let mut config = leo_config(IntegratorMethod::Rk4, 10.0);
        let mut second = config.bodies[0].clone();
        second.name = "chaser".into();
        if let TransInit::Cartesian { position, .. } = &mut second.initial_state.translation {
            position[1] += 100.0; // 100 m along-track
        }
        config.bodies.push(second);

        let sim = Simulation::build(config).unwrap();
        let rel = sim.lvlh_state_of("chaser", "sat").unwrap();
        // Along-track separation appears on the LVLH x axis.
        assert_relative_eq!(rel.translation.x, 100.0, epsilon = 1e-6);
        assert!(rel.translation.y.abs() < 1e-6);
        assert!(rel.translation.z.abs() < 1e-3);
    }

    #[test]
    fn ned_points_down_toward_planet() {
        let config = leo_config(IntegratorMethod::Rk4, 10.0);
        let sim = Simulation::build(config).unwrap();
        let ned = sim.ned_state_of("sat", "Earth").unwrap();
        // The body sits at the NED origin; its position in NED is zero.
        assert!(ned.translation.norm() < 1e-6);
    }

    #[test]
    fn applied_force_accelerates_body() {
        use crate::forces::{AppliedForce, AppliedFrame};
        use std::sync::Arc;

        let mut sim = Simulation::build(leo_config(IntegratorMethod::Rk4, 10.0)).unwrap();
        let thruster = Arc::new(AppliedForce::new(AppliedFrame::Integration));
        thruster.set_force(Vector3::new(0.0, 0.0, 45.0)); // 0.1 m/s² out of plane
        sim.forces
            .body_forces_mut("sat")
            .unwrap()
            .contributors
            .push(Box::new(thruster.clone()));

        sim.run_for(100.0).unwrap();
        let vz = sim.state_of("sat").unwrap().trans.velocity.z;
        // Gravity bends the answer slightly once z builds up.
        assert_relative_eq!(vz, 10.0, max_relative = 1e-2);
    }

    #[test]
    fn gmst_rotation_spins_pfix_frame() {
        let mut config = leo_config(IntegratorMethod::Rk4, 10.0);
        config.planets[0].rotation = PlanetRotation::Gmst;
        config.time = TimeConfig {
            initializer: TimeScaleId::Utc,
            epoch: crate::time::EpochInit::Calendar {
                year: 2017,
                month: 3,
                day: 20,
                hour: 12,
                minute: 0,
                second: 0.0,
            },
            ..TimeConfig::default()
        };
        let mut sim = Simulation::build(config).unwrap();
        let theta0 = sim.planet_rotation_angle("Earth").unwrap();
        sim.run_for(3_600.0).unwrap();
        let theta1 = sim.planet_rotation_angle("Earth").unwrap();
        let delta = (theta1 - theta0).rem_euclid(std::f64::consts::TAU);
        // One hour of Earth rotation, ~15 degrees.
        assert_relative_eq!(delta, 7.292_115e-5 * 3_600.0, max_relative = 1e-4);
    }
}
