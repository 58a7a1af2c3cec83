//! Dynamic bodies: mass properties, frames, and runtime attach/detach.
//!
//! Each body owns two frames in the tree: a structural frame (the physical
//! reference the mass properties are expressed in) and a composite frame
//! (origin at the composite center of mass, axes parallel to structure).
//! A free body's composite frame hangs off its integration frame and is
//! what the integrator advances; its structure frame hangs off the
//! composite frame.
//!
//! Attaching body B to body A re-parents B's structure frame under A's and
//! flips B's composite frame underneath its own structure frame. Every
//! re-parent preserves the frame's root-relative state, so an attach
//! changes representations, never physics. A's composite mass properties
//! are then recombined over its whole attached subtree, and A's composite
//! frame is shifted to the new center of mass without disturbing the
//! absolute state of the structure it is derived from.

pub mod mass;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use nalgebra::{UnitQuaternion, Vector3};

use crate::error::{SimError, SimResult};
use crate::frames::{FrameId, FrameKind, FrameTree, Transform};
pub use mass::MassProperties;

/// Stable handle to a body in a [`BodyRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyId(usize);

/// A named hard point on a body's structure, available to attachment
/// bookkeeping and payload placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachPoint {
    /// Location in structure coordinates (m).
    pub position: Vector3<f64>,
    /// Orientation of the point frame relative to structure.
    pub orientation: UnitQuaternion<f64>,
}

/// One attach or detach occurrence, kept for traversal and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachEvent {
    /// Root-clock time of the mutation.
    pub dyn_time: f64,
    /// The body that moved.
    pub subject: String,
    /// The body it was attached to; `None` records a detach.
    pub parent: Option<String>,
}

/// A dynamic body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    name: String,
    /// This body's own mass properties.
    core: MassProperties,
    /// Mass properties of this body plus every attached descendant,
    /// expressed in this body's structure frame.
    composite: MassProperties,
    attach_points: BTreeMap<String, AttachPoint>,
    parent: Option<BodyId>,
    children: Vec<BodyId>,
    struct_frame: FrameId,
    composite_frame: FrameId,
    /// Frame the composite state is integrated in while the body is free.
    integ_frame: FrameId,
    /// Whether the integrator advances the translational state.
    pub integrate_translation: bool,
    /// Whether the integrator advances the rotational state.
    pub integrate_rotation: bool,
}

impl Body {
    /// Body name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This body's own (unattached) mass properties.
    pub fn core_properties(&self) -> &MassProperties {
        &self.core
    }

    /// Mass properties of the attached subtree rooted here.
    pub fn composite_properties(&self) -> &MassProperties {
        &self.composite
    }

    /// The structural frame handle.
    pub fn struct_frame(&self) -> FrameId {
        self.struct_frame
    }

    /// The composite (center-of-mass) frame handle.
    pub fn composite_frame(&self) -> FrameId {
        self.composite_frame
    }

    /// The integration frame handle.
    pub fn integ_frame(&self) -> FrameId {
        self.integ_frame
    }

    /// The body this one is attached to, if any.
    pub fn attached_to(&self) -> Option<BodyId> {
        self.parent
    }

    /// Whether this body is free (integrated directly).
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Named attach points.
    pub fn attach_points(&self) -> &BTreeMap<String, AttachPoint> {
        &self.attach_points
    }
}

/// All bodies in a simulation, with the attach graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodyRegistry {
    bodies: Vec<Body>,
    index: BTreeMap<String, usize>,
    history: Vec<AttachEvent>,
}

impl BodyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a body and its two frames under the given integration frame.
    pub fn add_body(
        &mut self,
        tree: &mut FrameTree,
        name: &str,
        core: MassProperties,
        attach_points: BTreeMap<String, AttachPoint>,
        integ_frame: FrameId,
    ) -> SimResult<BodyId> {
        if self.index.contains_key(name) {
            return Err(SimError::Configuration(format!(
                "body name '{name}' is already registered"
            )));
        }
        core.validate(name)?;

        let composite_frame = tree.add_child(
            integ_frame,
            &format!("{name}.composite_body"),
            FrameKind::BodyComposite,
            Transform::identity(),
        )?;
        let struct_frame = tree.add_child(
            composite_frame,
            &format!("{name}.structure"),
            FrameKind::BodyStructure,
            Transform::rigid(-core.com, UnitQuaternion::identity()),
        )?;

        let id = self.bodies.len();
        self.bodies.push(Body {
            name: name.to_string(),
            composite: core.clone(),
            core,
            attach_points,
            parent: None,
            children: Vec::new(),
            struct_frame,
            composite_frame,
            integ_frame,
            integrate_translation: true,
            integrate_rotation: true,
        });
        self.index.insert(name.to_string(), id);
        Ok(BodyId(id))
    }

    /// Look a body up by name.
    pub fn id(&self, name: &str) -> SimResult<BodyId> {
        self.index
            .get(name)
            .map(|&i| BodyId(i))
            .ok_or_else(|| SimError::UnknownBody(name.to_string()))
    }

    /// Borrow a body.
    pub fn get(&self, id: BodyId) -> &Body {
        &self.bodies[id.0]
    }

    /// Mutably borrow a body.
    pub fn get_mut(&mut self, id: BodyId) -> &mut Body {
        &mut self.bodies[id.0]
    }

    /// Number of bodies.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Iterate over handles and names.
    pub fn iter(&self) -> impl Iterator<Item = (BodyId, &str)> {
        self.bodies
            .iter()
            .enumerate()
            .map(|(i, b)| (BodyId(i), b.name.as_str()))
    }

    /// The attach/detach history, oldest first.
    pub fn history(&self) -> &[AttachEvent] {
        &self.history
    }

    /// The root of the attach graph containing `id`.
    pub fn attach_root(&self, id: BodyId) -> BodyId {
        let mut current = id;
        while let Some(p) = self.bodies[current.0].parent {
            current = p;
        }
        current
    }

    /// Attach `child` to `parent` at the current state.
    ///
    /// Both bodies keep their root-relative states; only tree topology and
    /// composite mass properties change. Fails on attach cycles or if
    /// `child` is already attached.
    pub fn attach(
        &mut self,
        tree: &mut FrameTree,
        child: BodyId,
        parent: BodyId,
        dyn_time: f64,
    ) -> SimResult<()> {
        if child == parent {
            return Err(SimError::Configuration(format!(
                "cannot attach body '{}' to itself",
                self.bodies[child.0].name
            )));
        }
        if self.bodies[child.0].parent.is_some() {
            return Err(SimError::Configuration(format!(
                "body '{}' is already attached",
                self.bodies[child.0].name
            )));
        }
        // A cycle would mean the parent already hangs below the child.
        if self.attach_root(parent) == child {
            return Err(SimError::Configuration(format!(
                "attaching '{}' to '{}' would create a body cycle",
                self.bodies[child.0].name, self.bodies[parent.0].name
            )));
        }

        let child_struct = self.bodies[child.0].struct_frame;
        let child_composite = self.bodies[child.0].composite_frame;
        let parent_struct = self.bodies[parent.0].struct_frame;

        // State-preserving re-parents: structure joins the parent's
        // structure; the composite frame flips underneath the structure.
        tree.reparent(child_struct, parent_struct)?;
        tree.reparent(child_composite, child_struct)?;

        self.bodies[child.0].parent = Some(parent);
        self.bodies[parent.0].children.push(child);

        let root = self.attach_root(parent);
        self.refresh_composite(tree, root)?;

        log::info!(
            "attached body '{}' to '{}'",
            self.bodies[child.0].name,
            self.bodies[parent.0].name
        );
        self.history.push(AttachEvent {
            dyn_time,
            subject: self.bodies[child.0].name.clone(),
            parent: Some(self.bodies[parent.0].name.clone()),
        });
        Ok(())
    }

    /// Detach `child` from its parent, re-rooting it on its integration
    /// frame at its current state.
    pub fn detach(&mut self, tree: &mut FrameTree, child: BodyId, dyn_time: f64) -> SimResult<()> {
        let parent = self.bodies[child.0].parent.ok_or_else(|| {
            SimError::Configuration(format!(
                "body '{}' is not attached to anything",
                self.bodies[child.0].name
            ))
        })?;

        let child_struct = self.bodies[child.0].struct_frame;
        let child_composite = self.bodies[child.0].composite_frame;
        let integ = self.bodies[child.0].integ_frame;

        tree.reparent(child_composite, integ)?;
        tree.reparent(child_struct, child_composite)?;

        self.bodies[child.0].parent = None;
        self.bodies[parent.0].children.retain(|&c| c != child);

        // Both halves need fresh composite properties and frame offsets.
        let old_root = self.attach_root(parent);
        self.refresh_composite(tree, old_root)?;
        self.refresh_composite(tree, child)?;

        log::info!("detached body '{}'", self.bodies[child.0].name);
        self.history.push(AttachEvent {
            dyn_time,
            subject: self.bodies[child.0].name.clone(),
            parent: None,
        });
        Ok(())
    }

    /// Recombine composite mass properties over the subtree rooted at
    /// `root`, then move the composite frame to the new center of mass
    /// without disturbing the structure frame's absolute state.
    fn refresh_composite(&mut self, tree: &mut FrameTree, root: BodyId) -> SimResult<()> {
        let root_struct = self.bodies[root.0].struct_frame;

        let mut combined = self.bodies[root.0].core.clone();
        let mut stack: Vec<BodyId> = self.bodies[root.0].children.clone();
        while let Some(id) = stack.pop() {
            let node = &self.bodies[id.0];
            let placement = tree.resolve_transform(node.struct_frame, root_struct)?;
            combined = combined.combine(&node.core, &placement);
            stack.extend(node.children.iter().copied());
        }

        let composite_frame = self.bodies[root.0].composite_frame;
        let struct_frame = self.bodies[root.0].struct_frame;

        // Only the root of an attach graph keeps composite/struct in the
        // composite-on-top arrangement.
        if self.bodies[root.0].parent.is_none() {
            let integ = tree
                .parent(composite_frame)
                .expect("composite frame always has a parent");
            let struct_in_integ = tree.resolve_transform(struct_frame, integ)?;
            let struct_local = Transform::rigid(-combined.com, UnitQuaternion::identity());
            // composite-in-integ = struct-in-integ o (struct-in-composite)^-1
            let composite_local = struct_in_integ.compose(&struct_local.inverse());
            tree.set_local(composite_frame, composite_local);
            tree.set_local(struct_frame, struct_local);
        }

        self.bodies[root.0].composite = combined;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn setup() -> (FrameTree, BodyRegistry, FrameId) {
        let mut tree = FrameTree::new();
        let root = tree.add_root("Earth.inertial").unwrap();
        (tree, BodyRegistry::new(), root)
    }

    fn props(mass: f64) -> MassProperties {
        MassProperties {
            mass,
            com: Vector3::zeros(),
            inertia: Matrix3::from_diagonal(&Vector3::new(10.0, 10.0, 10.0)),
        }
    }

    #[test]
    fn attach_preserves_absolute_state() {
        let (mut tree, mut bodies, root) = setup();
        let a = bodies
            .add_body(&mut tree, "carrier", props(1000.0), BTreeMap::new(), root)
            .unwrap();
        let b = bodies
            .add_body(&mut tree, "payload", props(100.0), BTreeMap::new(), root)
            .unwrap();

        // Put the two bodies in different states.
        tree.set_local(
            bodies.get(a).composite_frame(),
            Transform {
                translation: Vector3::new(7.0e6, 0.0, 0.0),
                rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, 0.4),
                velocity: Vector3::new(0.0, 7.5e3, 0.0),
                angular_velocity: Vector3::new(0.0, 0.0, 1e-3),
            },
        );
        tree.set_local(
            bodies.get(b).composite_frame(),
            Transform {
                translation: Vector3::new(7.0e6, 10.0, 0.0),
                rotation: UnitQuaternion::identity(),
                velocity: Vector3::new(0.0, 7.5e3, 0.1),
                angular_velocity: Vector3::zeros(),
            },
        );

        let before = tree
            .resolve_transform(bodies.get(b).struct_frame(), root)
            .unwrap();
        bodies.attach(&mut tree, b, a, 0.0).unwrap();
        let after = tree
            .resolve_transform(bodies.get(b).struct_frame(), root)
            .unwrap();

        assert_relative_eq!(
            (before.translation - after.translation).norm(),
            0.0,
            epsilon = 1e-6
        );
        assert_relative_eq!((before.velocity - after.velocity).norm(), 0.0, epsilon = 1e-6);
        assert!(before.rotation.angle_to(&after.rotation) < 1e-12);

        // Topology and mass rollup.
        assert_eq!(bodies.get(b).attached_to(), Some(a));
        assert_relative_eq!(bodies.get(a).composite_properties().mass, 1100.0);
        assert_relative_eq!(bodies.get(a).core_properties().mass, 1000.0);
    }

    #[test]
    fn detach_restores_independence() {
        let (mut tree, mut bodies, root) = setup();
        let a = bodies
            .add_body(&mut tree, "carrier", props(1000.0), BTreeMap::new(), root)
            .unwrap();
        let b = bodies
            .add_body(&mut tree, "payload", props(100.0), BTreeMap::new(), root)
            .unwrap();

        bodies.attach(&mut tree, b, a, 10.0).unwrap();
        let abs_before = tree
            .resolve_transform(bodies.get(b).composite_frame(), root)
            .unwrap();
        bodies.detach(&mut tree, b, 20.0).unwrap();
        let abs_after = tree
            .resolve_transform(bodies.get(b).composite_frame(), root)
            .unwrap();

        assert_relative_eq!(
            (abs_before.translation - abs_after.translation).norm(),
            0.0,
            epsilon = 1e-6
        );
        assert!(bodies.get(b).is_root());
        assert_relative_eq!(bodies.get(a).composite_properties().mass, 1000.0);

        // History is traversable: attach then detach.
        let history = bodies.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].parent.as_deref(), Some("carrier"));
        assert!(history[1].parent.is_none());
        assert_relative_eq!(history[1].dyn_time, 20.0);
    }

    #[test]
    fn attach_cycle_rejected() {
        let (mut tree, mut bodies, root) = setup();
        let a = bodies
            .add_body(&mut tree, "a", props(10.0), BTreeMap::new(), root)
            .unwrap();
        let b = bodies
            .add_body(&mut tree, "b", props(10.0), BTreeMap::new(), root)
            .unwrap();
        bodies.attach(&mut tree, b, a, 0.0).unwrap();
        let err = bodies.attach(&mut tree, a, b, 0.0).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn composite_com_shift_keeps_structure_fixed() {
        let (mut tree, mut bodies, root) = setup();
        let a = bodies
            .add_body(&mut tree, "carrier", props(100.0), BTreeMap::new(), root)
            .unwrap();
        let b = bodies
            .add_body(&mut tree, "payload", props(100.0), BTreeMap::new(), root)
            .unwrap();

        // Payload 2 m along +x from the carrier.
        tree.set_local(
            bodies.get(b).composite_frame(),
            Transform::rigid(Vector3::new(2.0, 0.0, 0.0), UnitQuaternion::identity()),
        );

        let struct_before = tree
            .resolve_transform(bodies.get(a).struct_frame(), root)
            .unwrap();
        bodies.attach(&mut tree, b, a, 0.0).unwrap();
        let struct_after = tree
            .resolve_transform(bodies.get(a).struct_frame(), root)
            .unwrap();

        // Equal masses: composite com moves to x = 1 m...
        assert_relative_eq!(
            bodies.get(a).composite_properties().com.x,
            1.0,
            epsilon = 1e-6
        );
        // ...but the carrier structure itself has not moved.
        assert_relative_eq!(
            (struct_before.translation - struct_after.translation).norm(),
            0.0,
            epsilon = 1e-6
        );
        // The composite frame origin now sits at the combined com.
        let comp_abs = tree
            .resolve_transform(bodies.get(a).composite_frame(), root)
            .unwrap();
        assert_relative_eq!(comp_abs.translation.x, 1.0, epsilon = 1e-9);
    }
}
