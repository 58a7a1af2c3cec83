//! The reference frame tree.
//!
//! Frames are named hierarchically (`Earth.inertial`, `Earth.pfix`,
//! `vehicle.composite_body`) and each non-root frame stores its state
//! relative to exactly one parent. Transforms between any two connected
//! frames are resolved by walking up to the lowest common ancestor and back
//! down; frames in different trees have no transform and asking for one is
//! an error, not a panic.
//!
//! Reparenting is atomic and state-preserving: the frame's root-relative
//! state is identical before and after, only the parent-relative
//! representation changes. This is what distinguishes a physical attach
//! from a re-label.

pub mod derived;
mod transform;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{SimError, SimResult};
pub use transform::Transform;

/// Stable handle to a frame in a [`FrameTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(usize);

/// What a frame represents; used for validation and queries, not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// A tree root (no parent).
    Root,
    /// A non-rotating frame offset from its parent.
    Inertial,
    /// A planet-fixed rotating frame; its orientation is refreshed from the
    /// time base by the owning simulation.
    PlanetFixed,
    /// A body's structural reference frame.
    BodyStructure,
    /// A body's center-of-mass frame, axes parallel to structure.
    BodyComposite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameNode {
    name: String,
    kind: FrameKind,
    parent: Option<usize>,
    /// State of this frame relative to its parent. Meaningless for roots.
    local: Transform,
}

/// A forest of named reference frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameTree {
    nodes: Vec<FrameNode>,
    index: BTreeMap<String, usize>,
}

impl FrameTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new root frame.
    pub fn add_root(&mut self, name: &str) -> SimResult<FrameId> {
        self.insert(name, FrameKind::Root, None, Transform::identity())
    }

    /// Register a frame under `parent` with the given local state.
    pub fn add_child(
        &mut self,
        parent: FrameId,
        name: &str,
        kind: FrameKind,
        local: Transform,
    ) -> SimResult<FrameId> {
        self.check(parent)?;
        self.insert(name, kind, Some(parent.0), local)
    }

    fn insert(
        &mut self,
        name: &str,
        kind: FrameKind,
        parent: Option<usize>,
        local: Transform,
    ) -> SimResult<FrameId> {
        if self.index.contains_key(name) {
            return Err(SimError::Configuration(format!(
                "frame name '{name}' is already registered"
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(FrameNode {
            name: name.to_string(),
            kind,
            parent,
            local,
        });
        self.index.insert(name.to_string(), id);
        log::debug!("registered frame '{name}' ({kind:?})");
        Ok(FrameId(id))
    }

    /// Look a frame up by name.
    pub fn id(&self, name: &str) -> SimResult<FrameId> {
        self.index
            .get(name)
            .map(|&i| FrameId(i))
            .ok_or_else(|| SimError::UnknownFrame(name.to_string()))
    }

    /// Frame name for a handle.
    pub fn name(&self, frame: FrameId) -> &str {
        &self.nodes[frame.0].name
    }

    /// Frame kind for a handle.
    pub fn kind(&self, frame: FrameId) -> FrameKind {
        self.nodes[frame.0].kind
    }

    /// Parent handle, if any.
    pub fn parent(&self, frame: FrameId) -> Option<FrameId> {
        self.nodes[frame.0].parent.map(FrameId)
    }

    /// The frame's state relative to its parent.
    pub fn local(&self, frame: FrameId) -> &Transform {
        &self.nodes[frame.0].local
    }

    /// Replace the frame's parent-relative state.
    pub fn set_local(&mut self, frame: FrameId, local: Transform) {
        self.nodes[frame.0].local = local;
    }

    /// Update only the rotation/rate of a frame (planet-fixed refresh).
    pub fn set_rotation(
        &mut self,
        frame: FrameId,
        rotation: UnitQuaternion<f64>,
        angular_velocity: Vector3<f64>,
    ) {
        let local = &mut self.nodes[frame.0].local;
        local.rotation = rotation;
        local.angular_velocity = angular_velocity;
    }

    /// Number of registered frames.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all frame handles and names.
    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &str)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (FrameId(i), n.name.as_str()))
    }

    fn check(&self, frame: FrameId) -> SimResult<()> {
        if frame.0 >= self.nodes.len() {
            return Err(SimError::UnknownFrame(format!("#{}", frame.0)));
        }
        Ok(())
    }

    /// Chain of node indices from `frame` up to and including its root.
    fn ancestry(&self, frame: FrameId) -> Vec<usize> {
        let mut chain = vec![frame.0];
        let mut current = frame.0;
        while let Some(p) = self.nodes[current].parent {
            chain.push(p);
            current = p;
        }
        chain
    }

    /// State of `frame` relative to an ancestor node (exclusive walk).
    fn state_in_ancestor(&self, frame: FrameId, ancestor: usize) -> Transform {
        let mut chain = Vec::new();
        let mut current = frame.0;
        while current != ancestor {
            chain.push(current);
            current = self.nodes[current].parent.expect("ancestor not on path");
        }
        let mut acc = Transform::identity();
        for &node in chain.iter().rev() {
            acc = acc.compose(&self.nodes[node].local);
        }
        acc
    }

    /// State of `from` relative to `to`, via the lowest common ancestor.
    ///
    /// The result maps child-frame (`from`) quantities into `to`:
    /// `result.map_position(p_in_from)` is the same point in `to`
    /// coordinates.
    pub fn resolve_transform(&self, from: FrameId, to: FrameId) -> SimResult<Transform> {
        self.check(from)?;
        self.check(to)?;
        if from == to {
            return Ok(Transform::identity());
        }

        let from_chain = self.ancestry(from);
        let to_chain = self.ancestry(to);
        let lca = from_chain
            .iter()
            .find(|i| to_chain.contains(i))
            .copied()
            .ok_or_else(|| SimError::DisconnectedFrames {
                from: self.name(from).to_string(),
                to: self.name(to).to_string(),
            })?;

        let from_in_lca = self.state_in_ancestor(from, lca);
        let to_in_lca = self.state_in_ancestor(to, lca);
        Ok(to_in_lca.inverse().compose(&from_in_lca))
    }

    /// Resolve a transform by frame names.
    pub fn resolve_by_name(&self, from: &str, to: &str) -> SimResult<Transform> {
        self.resolve_transform(self.id(from)?, self.id(to)?)
    }

    /// Whether `node` is `ancestor` or sits below it.
    pub fn is_descendant(&self, node: FrameId, ancestor: FrameId) -> bool {
        self.ancestry(node).contains(&ancestor.0)
    }

    /// Atomically re-parent `frame` under `new_parent`, preserving its
    /// root-relative state. Fails if the frames are disconnected or the
    /// move would create a cycle.
    pub fn reparent(&mut self, frame: FrameId, new_parent: FrameId) -> SimResult<()> {
        self.check(frame)?;
        self.check(new_parent)?;
        if self.is_descendant(new_parent, frame) {
            return Err(SimError::Configuration(format!(
                "reparenting '{}' under '{}' would create a cycle",
                self.name(frame),
                self.name(new_parent)
            )));
        }

        // The frame's state expressed in the new parent is exactly its new
        // local state; computing it before touching the link keeps the
        // operation atomic.
        let new_local = self.resolve_transform(frame, new_parent)?;
        let node = &mut self.nodes[frame.0];
        node.parent = Some(new_parent.0);
        node.local = new_local;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_3;

    fn build_tree() -> (FrameTree, FrameId, FrameId, FrameId, FrameId) {
        let mut tree = FrameTree::new();
        let root = tree.add_root("Earth.inertial").unwrap();
        let pfix = tree
            .add_child(
                root,
                "Earth.pfix",
                FrameKind::PlanetFixed,
                Transform::rotation_only(UnitQuaternion::from_axis_angle(
                    &Vector3::z_axis(),
                    FRAC_PI_3,
                )),
            )
            .unwrap();
        let veh = tree
            .add_child(
                root,
                "vehicle.composite_body",
                FrameKind::BodyComposite,
                Transform {
                    translation: Vector3::new(7.0e6, 0.0, 0.0),
                    rotation: UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
                    velocity: Vector3::new(0.0, 7.5e3, 0.0),
                    angular_velocity: Vector3::new(0.0, 0.0, 1e-3),
                },
            )
            .unwrap();
        let station = tree
            .add_child(
                pfix,
                "station.structure",
                FrameKind::BodyStructure,
                Transform::rigid(
                    Vector3::new(6.4e6, 0.0, 0.0),
                    UnitQuaternion::identity(),
                ),
            )
            .unwrap();
        (tree, root, pfix, veh, station)
    }

    #[test]
    fn self_transform_is_identity() {
        let (tree, _, pfix, ..) = build_tree();
        let t = tree.resolve_transform(pfix, pfix).unwrap();
        assert_relative_eq!(t.translation.norm(), 0.0);
        assert_relative_eq!(t.rotation.angle(), 0.0);
    }

    #[test]
    fn transform_composition_property() {
        // A->C must equal (B->C) o (A->B) for connected frames.
        let (tree, _root, pfix, veh, station) = build_tree();
        let a_c = tree.resolve_transform(veh, station).unwrap();
        let a_b = tree.resolve_transform(veh, pfix).unwrap();
        let b_c = tree.resolve_transform(pfix, station).unwrap();
        let composed = b_c.compose(&a_b);
        assert_relative_eq!(
            (a_c.translation - composed.translation).norm(),
            0.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            a_c.rotation.angle_to(&composed.rotation),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn disconnected_frames_error() {
        let (mut tree, _, _, veh, ..) = build_tree();
        let other_root = tree.add_root("Moon.inertial").unwrap();
        let err = tree.resolve_transform(veh, other_root).unwrap_err();
        assert!(matches!(err, SimError::DisconnectedFrames { .. }));
    }

    #[test]
    fn reparent_preserves_absolute_state() {
        let (mut tree, root, pfix, veh, _) = build_tree();
        let before = tree.resolve_transform(veh, root).unwrap();
        tree.reparent(veh, pfix).unwrap();
        let after = tree.resolve_transform(veh, root).unwrap();
        assert_relative_eq!(
            (before.translation - after.translation).norm(),
            0.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            (before.velocity - after.velocity).norm(),
            0.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(before.rotation.angle_to(&after.rotation), 0.0, epsilon = 1e-12);
        assert_relative_eq!(
            (before.angular_velocity - after.angular_velocity).norm(),
            0.0,
            epsilon = 1e-12
        );
        // But the local representation did change parents.
        assert_eq!(tree.parent(veh), Some(pfix));
    }

    #[test]
    fn reparent_cycle_rejected() {
        let (mut tree, _root, pfix, _veh, station) = build_tree();
        let err = tree.reparent(pfix, station).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut tree = FrameTree::new();
        tree.add_root("Earth.inertial").unwrap();
        assert!(tree.add_root("Earth.inertial").is_err());
    }
}
