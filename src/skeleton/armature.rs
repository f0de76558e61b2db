//! 骨架门面
//!
//! `Armature` 持有变换树、骨骼、钉点、链树以及求解用的全部缓冲区。
//! 所有结构性修改都经过这里，以便同步维护：
//! - 每根骨骼的 `effected_children` / `free_children` 划分
//! - 钉点层级（`parent_pin` / `child_pins`）
//! - 链树是否需要重建

use glam::{EulerRot, Quat, Vec3};
use std::collections::HashMap;

use super::bone::{Bone, BoneDesc, BoneFlags, BoneId};
use super::pin::IkPin;
use super::BonePose;
use crate::arena::Arena;
use crate::config::{get_config, SolverConfig};
use crate::constraint::Kusudama;
use crate::qcp::Qcp;
use crate::solver::{active_bones, BoneChain, HeadingBuffers, IkSolver, SolveParams};
use crate::transform::{Basis, NodeId, ParentChangeObserver, TransformTree};
use crate::{ArmatureError, Result};

/// 单次 solve 的参数覆盖，`None` 使用骨架默认值
#[derive(Clone, Copy, Debug, Default)]
pub struct SolveOverrides {
    pub dampening: Option<f32>,
    pub iterations: Option<usize>,
    pub stabilization_passes: Option<usize>,
}

/// solve 结果
#[derive(Clone, Debug, Default)]
pub struct SolveReport {
    /// 本次被改动的骨骼
    pub updated: Vec<BoneId>,
    pub iterations: usize,
    /// 参与求解的钉点中，末端到目标的最大距离
    pub max_position_error: f32,
}

/// 换父时记录变换树发出的通知，事后统一刷新钉点与分段状态
#[derive(Default)]
struct ReparentRecorder {
    completed: Vec<NodeId>,
}

impl ParentChangeObserver for ReparentRecorder {
    fn parent_change_warning(&mut self, node: NodeId, old: Option<NodeId>, new: Option<NodeId>) {
        log::trace!("[Armature] node {:?} reparenting {:?} -> {:?}", node, old, new);
    }

    fn parent_change_completion_notice(&mut self, node: NodeId) {
        self.completed.push(node);
    }
}

pub struct Armature {
    name: String,
    transforms: TransformTree,
    bones: Arena<Bone>,
    /// 环境坐标系：根骨骼与所有钉点目标的父节点
    root_frame: NodeId,
    root_bone: Option<BoneId>,
    tag_index: HashMap<String, BoneId>,

    config: SolverConfig,

    chains: Option<BoneChain>,
    chains_dirty: bool,
    qcp: Qcp,
    buffers: HeadingBuffers,
}

impl Armature {
    /// 创建空骨架，参数取自当前全局配置
    pub fn new(name: impl Into<String>) -> Self {
        let config = get_config();
        let mut transforms = TransformTree::new();
        let root_frame = transforms.create_node(Basis::IDENTITY, None);
        let qcp = Qcp::new(config.qcp_eval_precision, config.qcp_max_iterations);
        Self {
            name: name.into(),
            transforms,
            bones: Arena::new(),
            root_frame,
            root_bone: None,
            tag_index: HashMap::new(),
            config,
            chains: None,
            chains_dirty: true,
            qcp,
            buffers: HeadingBuffers::default(),
        }
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn root_frame(&self) -> NodeId {
        self.root_frame
    }

    #[inline]
    pub fn root_bone(&self) -> Option<BoneId> {
        self.root_bone
    }

    #[inline]
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    #[inline]
    pub fn transforms(&self) -> &TransformTree {
        &self.transforms
    }

    /// 直接修改变换树（例如移动环境坐标系）；请勿删除骨骼拥有的节点
    #[inline]
    pub fn transforms_mut(&mut self) -> &mut TransformTree {
        &mut self.transforms
    }

    pub fn bones(&self) -> impl Iterator<Item = (BoneId, &Bone)> {
        self.bones.iter()
    }

    pub fn bone(&self, id: BoneId) -> Result<&Bone> {
        self.bones.get(id).ok_or(ArmatureError::UnknownBone(id))
    }

    fn bone_mut(&mut self, id: BoneId) -> Result<&mut Bone> {
        self.bones.get_mut(id).ok_or(ArmatureError::UnknownBone(id))
    }

    pub fn bone_by_tag(&self, tag: &str) -> Option<BoneId> {
        self.tag_index.get(tag).copied()
    }

    /// 当前链树（必要时先重建）
    pub fn bone_chains(&mut self) -> Option<&BoneChain> {
        if self.chains_dirty {
            self.regenerate_bone_chains();
        }
        self.chains.as_ref()
    }

    // ========================================
    // 骨骼增删
    // ========================================

    /// 注册骨骼；`parent` 为 `None` 时作为根骨骼
    pub fn add_bone(&mut self, desc: BoneDesc, parent: Option<BoneId>) -> Result<BoneId> {
        if self.tag_index.contains_key(&desc.tag) {
            return Err(ArmatureError::DuplicateTag(desc.tag));
        }
        if !(desc.height.is_finite() && desc.height > 0.0) {
            return Err(ArmatureError::InvalidParameter {
                name: "bone_height",
                value: desc.height,
                range: "(0, ∞)",
            });
        }

        let (parent_node, default_offset, ancestor_count) = match parent {
            Some(parent_id) => {
                let p = self.bone(parent_id)?;
                (p.local_axes, p.tip_local(), p.ancestor_count + 1)
            }
            None => {
                if let Some(root) = self.root_bone {
                    return Err(ArmatureError::RootAlreadyExists(root));
                }
                (self.root_frame, Vec3::ZERO, 0)
            }
        };

        let local = Basis::new(desc.offset.unwrap_or(default_offset), desc.rotation);
        let local_axes = self.transforms.create_node(local, Some(parent_node));
        let major_rotation_axes = self.transforms.create_node(local, Some(parent_node));

        let mut bone = Bone::new(&desc, parent, local_axes, major_rotation_axes);
        bone.ancestor_count = ancestor_count;
        let id = self.bones.insert(bone);

        match parent {
            Some(parent_id) => {
                if let Some(p) = self.bones.get_mut(parent_id) {
                    p.children.push(id);
                    p.free_children.push(id);
                }
            }
            None => self.root_bone = Some(id),
        }
        self.tag_index.insert(desc.tag, id);
        self.chains_dirty = true;

        if self.config.debug_log {
            log::debug!("[Armature] '{}' 添加骨骼 {:?}", self.name, id);
        }
        Ok(id)
    }

    /// 删除骨骼及其整个子树，返回删除的骨骼数
    pub fn remove_bone(&mut self, id: BoneId) -> Result<usize> {
        let parent = self.bone(id)?.parent;

        let mut subtree = Vec::new();
        self.collect_post_order(id, &mut subtree);

        for &victim in &subtree {
            let Some(bone) = self.bones.remove(victim) else {
                continue;
            };
            if let Some(pin) = &bone.pin {
                self.transforms.remove_node(pin.target);
            }
            self.transforms.remove_node(bone.local_axes);
            self.transforms.remove_node(bone.major_rotation_axes);
            self.tag_index.remove(&bone.tag);
        }

        match parent {
            Some(parent_id) => {
                if let Some(p) = self.bones.get_mut(parent_id) {
                    p.children.retain(|c| *c != id);
                    p.free_children.retain(|c| *c != id);
                    p.effected_children.retain(|c| *c != id);
                }
                self.remove_from_effectored(parent_id);
            }
            None => self.root_bone = None,
        }

        self.rebuild_pin_hierarchy();
        self.chains_dirty = true;
        Ok(subtree.len())
    }

    /// 换父并保持世界位姿不变
    pub fn reparent_bone(&mut self, id: BoneId, new_parent: BoneId) -> Result<()> {
        let bone = self.bone(id)?;
        let old_parent = bone.parent;
        let (local_axes, major_axes) = (bone.local_axes, bone.major_rotation_axes);
        let parent_node = self.bone(new_parent)?.local_axes;

        if old_parent == Some(new_parent) {
            return Ok(());
        }

        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(ArmatureError::HierarchyCycle {
                    child: self.bone(id)?.tag.clone(),
                    parent: self.bone(new_parent)?.tag.clone(),
                });
            }
            cursor = self.bones.get(current).and_then(|b| b.parent);
        }

        let mut recorder = ReparentRecorder::default();
        self.transforms
            .set_parent_observed(local_axes, Some(parent_node), &mut recorder)?;
        self.transforms
            .set_parent_observed(major_axes, Some(parent_node), &mut recorder)?;

        if let Some(old) = old_parent.and_then(|p| self.bones.get_mut(p)) {
            old.children.retain(|c| *c != id);
            old.free_children.retain(|c| *c != id);
            old.effected_children.retain(|c| *c != id);
        }
        if let Some(p) = self.bones.get_mut(new_parent) {
            p.children.push(id);
        }
        if let Some(bone) = self.bones.get_mut(id) {
            bone.parent = Some(new_parent);
        }

        if !recorder.completed.is_empty() {
            self.update_ancestor_counts(id);
            self.rebuild_effector_sets();
            self.rebuild_pin_hierarchy();
            self.chains_dirty = true;
        }
        Ok(())
    }

    fn collect_post_order(&self, id: BoneId, out: &mut Vec<BoneId>) {
        if let Some(bone) = self.bones.get(id) {
            for &child in &bone.children {
                self.collect_post_order(child, out);
            }
            out.push(id);
        }
    }

    fn update_ancestor_counts(&mut self, id: BoneId) {
        let count = self
            .bones
            .get(id)
            .and_then(|b| b.parent)
            .and_then(|p| self.bones.get(p))
            .map_or(0, |p| p.ancestor_count + 1);
        let children = match self.bones.get_mut(id) {
            Some(bone) => {
                bone.ancestor_count = count;
                bone.children.clone()
            }
            None => return,
        };
        for child in children {
            self.update_ancestor_counts(child);
        }
    }

    // ========================================
    // 骨骼属性
    // ========================================

    pub fn set_stiffness(&mut self, id: BoneId, stiffness: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&stiffness) {
            return Err(ArmatureError::InvalidParameter {
                name: "stiffness",
                value: stiffness,
                range: "[0, 1]",
            });
        }
        self.bone_mut(id)?.stiffness = stiffness;
        Ok(())
    }

    pub fn set_orientation_lock(&mut self, id: BoneId, locked: bool) -> Result<()> {
        self.bone_mut(id)?.flags.set(BoneFlags::ORIENTATION_LOCK, locked);
        Ok(())
    }

    pub fn set_bone_height(&mut self, id: BoneId, height: f32) -> Result<()> {
        if !(height.is_finite() && height > 0.0) {
            return Err(ArmatureError::InvalidParameter {
                name: "bone_height",
                value: height,
                range: "(0, ∞)",
            });
        }
        self.bone_mut(id)?.bone_height = height;
        Ok(())
    }

    /// 设置骨骼相对父骨骼的旋转
    pub fn set_bone_rotation(&mut self, id: BoneId, rotation: Quat) -> Result<()> {
        let local_axes = self.bone(id)?.local_axes;
        self.transforms.set_local_rotation(local_axes, rotation);
        Ok(())
    }

    // ========================================
    // 约束
    // ========================================

    /// 给骨骼挂上空约束（已有则保留），返回可编辑引用
    pub fn add_constraint(&mut self, id: BoneId) -> Result<&mut Kusudama> {
        let bone = self.bone_mut(id)?;
        Ok(bone.constraint.get_or_insert_with(Kusudama::new))
    }

    pub fn constraint(&self, id: BoneId) -> Result<&Kusudama> {
        self.bone(id)?.constraint.as_ref().ok_or(ArmatureError::NoConstraint(id))
    }

    pub fn constraint_mut(&mut self, id: BoneId) -> Result<&mut Kusudama> {
        self.bone_mut(id)?
            .constraint
            .as_mut()
            .ok_or(ArmatureError::NoConstraint(id))
    }

    pub fn remove_constraint(&mut self, id: BoneId) -> Result<Kusudama> {
        self.bone_mut(id)?.constraint.take().ok_or(ArmatureError::NoConstraint(id))
    }

    /// 重新选择约束参考系，使禁止区域尽量远离所有允许方向
    pub fn optimize_constraint_axes(&mut self, id: BoneId) -> Result<()> {
        let bone = self.bones.get_mut(id).ok_or(ArmatureError::UnknownBone(id))?;
        let constraint = bone.constraint.as_mut().ok_or(ArmatureError::NoConstraint(id))?;
        let rotation = constraint.optimize_limiting_axes();
        self.transforms.rotate_local(bone.major_rotation_axes, rotation);
        self.chains_dirty = true;
        Ok(())
    }

    /// 在求解之外把骨骼直接约束到允许范围内，返回是否改动
    pub fn snap_to_constraints(&mut self, id: BoneId) -> Result<bool> {
        let bone = self.bones.get(id).ok_or(ArmatureError::UnknownBone(id))?;
        let constraint = bone.constraint.as_ref().ok_or(ArmatureError::NoConstraint(id))?;
        Ok(constraint.set_axes_to_snapped(&mut self.transforms, bone.local_axes, bone.major_rotation_axes))
    }

    // ========================================
    // 钉点
    // ========================================

    pub fn pin(&self, id: BoneId) -> Result<&IkPin> {
        self.bone(id)?.pin.as_ref().ok_or(ArmatureError::NoPin(id))
    }

    fn pin_mut(&mut self, id: BoneId) -> Result<&mut IkPin> {
        self.bone_mut(id)?.pin.as_mut().ok_or(ArmatureError::NoPin(id))
    }

    /// 启用钉点；首次启用时在骨骼末端的当前位姿处创建目标
    pub fn enable_pin(&mut self, id: BoneId) -> Result<()> {
        let bone = self.bone(id)?;
        let has_pin = bone.pin.is_some();
        let (local_axes, tip_local) = (bone.local_axes, bone.tip_local());

        if has_pin {
            self.pin_mut(id)?.enabled = true;
        } else {
            let global = self.transforms.global(local_axes);
            let tip_pose = Basis::new(global.global_of_point(tip_local), global.rotation());
            let frame = self.transforms.global(self.root_frame);
            let target = self
                .transforms
                .create_node(frame.inverse().compose(&tip_pose), Some(self.root_frame));
            self.bone_mut(id)?.pin = Some(IkPin::new(id, target));
            self.rebuild_pin_hierarchy();
        }

        self.add_to_effectored(id);
        self.chains_dirty = true;
        Ok(())
    }

    pub fn disable_pin(&mut self, id: BoneId) -> Result<()> {
        self.pin_mut(id)?.enabled = false;
        self.remove_from_effectored(id);
        self.chains_dirty = true;
        Ok(())
    }

    /// 切换钉点启用状态，返回切换后的状态
    pub fn toggle_pin(&mut self, id: BoneId) -> Result<bool> {
        if self.pin(id)?.enabled {
            self.disable_pin(id)?;
            Ok(false)
        } else {
            self.enable_pin(id)?;
            Ok(true)
        }
    }

    /// 删除钉点；其子钉点改挂到它的父钉点上
    pub fn remove_pin(&mut self, id: BoneId) -> Result<()> {
        let pin = self.bone_mut(id)?.pin.take().ok_or(ArmatureError::NoPin(id))?;

        if let Some(parent_pin) = pin.parent_pin.and_then(|p| self.bones.get_mut(p)).and_then(|b| b.pin.as_mut()) {
            parent_pin.child_pins.retain(|c| *c != id);
            parent_pin.child_pins.extend_from_slice(&pin.child_pins);
        }
        for &child in &pin.child_pins {
            if let Some(child_pin) = self.bones.get_mut(child).and_then(|b| b.pin.as_mut()) {
                child_pin.parent_pin = pin.parent_pin;
            }
        }

        self.transforms.remove_node(pin.target);
        self.remove_from_effectored(id);
        self.chains_dirty = true;
        Ok(())
    }

    /// 移动钉点目标到世界坐标
    pub fn set_pin_position(&mut self, id: BoneId, position: Vec3) -> Result<()> {
        let target = self.pin(id)?.target;
        self.transforms.translate_to(target, position);
        Ok(())
    }

    /// 设置钉点目标的世界朝向
    pub fn set_pin_orientation(&mut self, id: BoneId, rotation: Quat) -> Result<()> {
        let target = self.pin(id)?.target;
        let translation = self.transforms.global(target).translation;
        self.transforms.set_global(target, Basis::new(translation, rotation));
        Ok(())
    }

    pub fn pin_target(&mut self, id: BoneId) -> Result<BonePose> {
        let target = self.pin(id)?.target;
        Ok(BonePose::from(self.transforms.global(target)))
    }

    pub fn set_pin_priorities(&mut self, id: BoneId, priorities: Vec3) -> Result<()> {
        for value in priorities.to_array() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ArmatureError::InvalidParameter {
                    name: "pin_priority",
                    value,
                    range: "[0, ∞)",
                });
            }
        }
        self.pin_mut(id)?.priorities = priorities;
        Ok(())
    }

    pub fn set_pin_depth_falloff(&mut self, id: BoneId, falloff: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&falloff) {
            return Err(ArmatureError::InvalidParameter {
                name: "depth_falloff",
                value: falloff,
                range: "[0, 1]",
            });
        }
        self.pin_mut(id)?.depth_falloff = falloff;
        self.chains_dirty = true;
        Ok(())
    }

    pub fn set_pin_weight(&mut self, id: BoneId, weight: f32) -> Result<()> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(ArmatureError::InvalidParameter {
                name: "pin_weight",
                value: weight,
                range: "[0, ∞)",
            });
        }
        self.pin_mut(id)?.pin_weight = weight;
        Ok(())
    }

    // ========================================
    // 受影响子骨骼 / 钉点层级维护
    // ========================================

    /// 按子树是否含启用钉点重新划分 `id` 的子骨骼
    fn reclassify_children(&mut self, id: BoneId) {
        let Some(bone) = self.bones.get(id) else {
            return;
        };
        let mut effected = Vec::new();
        let mut free = Vec::new();
        for &child in &bone.children {
            if self.bones.get(child).is_some_and(|c| c.leads_to_pin()) {
                effected.push(child);
            } else {
                free.push(child);
            }
        }
        if let Some(bone) = self.bones.get_mut(id) {
            bone.effected_children = effected;
            bone.free_children = free;
        }
    }

    /// 钉点启用后，自底向上通知所有祖先
    fn add_to_effectored(&mut self, id: BoneId) {
        self.reclassify_children(id);
        self.reclassify_ancestors(id);
    }

    /// 钉点停用或删除后，自底向上通知所有祖先
    fn remove_from_effectored(&mut self, id: BoneId) {
        self.reclassify_children(id);
        self.reclassify_ancestors(id);
    }

    fn reclassify_ancestors(&mut self, id: BoneId) {
        let mut cursor = self.bones.get(id).and_then(|b| b.parent);
        while let Some(current) = cursor {
            self.reclassify_children(current);
            cursor = self.bones.get(current).and_then(|b| b.parent);
        }
    }

    fn rebuild_effector_sets(&mut self) {
        if let Some(root) = self.root_bone {
            let mut order = Vec::new();
            self.collect_post_order(root, &mut order);
            for id in order {
                self.reclassify_children(id);
            }
        }
    }

    /// 按骨骼祖先关系重建钉点父子链接
    fn rebuild_pin_hierarchy(&mut self) {
        let pinned: Vec<BoneId> = self
            .bones
            .iter()
            .filter(|(_, b)| b.pin.is_some())
            .map(|(id, _)| id)
            .collect();

        for &id in &pinned {
            if let Some(pin) = self.bones.get_mut(id).and_then(|b| b.pin.as_mut()) {
                pin.child_pins.clear();
            }
        }

        for &id in &pinned {
            let mut cursor = self.bones.get(id).and_then(|b| b.parent);
            let mut parent_pin = None;
            while let Some(current) = cursor {
                let Some(bone) = self.bones.get(current) else {
                    break;
                };
                if bone.pin.is_some() {
                    parent_pin = Some(current);
                    break;
                }
                cursor = bone.parent;
            }

            if let Some(pin) = self.bones.get_mut(id).and_then(|b| b.pin.as_mut()) {
                pin.parent_pin = parent_pin;
            }
            if let Some(parent) = parent_pin.and_then(|p| self.bones.get_mut(p)).and_then(|b| b.pin.as_mut()) {
                parent.child_pins.push(id);
            }
        }
    }

    // ========================================
    // 求解设置
    // ========================================

    pub fn set_default_iterations(&mut self, iterations: usize) {
        self.config.default_iterations = iterations;
    }

    pub fn set_default_dampening(&mut self, dampening: f32) -> Result<()> {
        if !(dampening.is_finite() && dampening > 0.0) {
            return Err(ArmatureError::InvalidParameter {
                name: "dampening",
                value: dampening,
                range: "(0, ∞)",
            });
        }
        self.config.default_dampening = dampening;
        Ok(())
    }

    pub fn set_default_stabilization_passes(&mut self, passes: usize) {
        self.config.default_stabilization_passes = passes;
    }

    pub fn set_translate_unpinned_root(&mut self, enabled: bool) {
        self.config.translate_unpinned_root = enabled;
    }

    pub fn set_debug_log(&mut self, enabled: bool) {
        self.config.debug_log = enabled;
    }

    /// 按当前钉点与骨骼拓扑重建链树
    pub fn regenerate_bone_chains(&mut self) {
        if let Some(old) = self.chains.take() {
            old.release(&mut self.transforms);
        }
        self.chains = self
            .root_bone
            .and_then(|root| BoneChain::generate(&mut self.transforms, &self.bones, root, self.root_frame));
        self.chains_dirty = false;

        if self.config.debug_log {
            let count = self.chains.as_ref().map_or(0, BoneChain::chain_count);
            log::debug!("[Armature] '{}' 重建链树: {} 条链", self.name, count);
        }
    }

    // ========================================
    // 求解
    // ========================================

    /// 以默认参数从 `from` 开始求解
    pub fn solve(&mut self, from: BoneId) -> Result<SolveReport> {
        self.solve_with(from, SolveOverrides::default())
    }

    /// 从 `from` 开始求解 `from` 及其下方所有受钉点影响的骨骼
    pub fn solve_with(&mut self, from: BoneId, overrides: SolveOverrides) -> Result<SolveReport> {
        self.bone(from)?;
        if let Some(dampening) = overrides.dampening {
            if !(dampening.is_finite() && dampening > 0.0) {
                return Err(ArmatureError::InvalidParameter {
                    name: "dampening",
                    value: dampening,
                    range: "(0, ∞)",
                });
            }
        }
        if self.chains_dirty {
            self.regenerate_bone_chains();
        }

        let ids: Vec<BoneId> = self.bones.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(bone) = self.bones.get_mut(id) {
                bone.flags.remove(BoneFlags::IK_UPDATED);
            }
        }

        let iterations = overrides.iterations.unwrap_or(self.config.default_iterations);
        let mut report = SolveReport {
            iterations,
            ..SolveReport::default()
        };

        let Some((chain, start)) = self.chains.as_ref().and_then(|c| c.find(from)) else {
            if self.config.debug_log {
                log::debug!("[IK] 骨骼 {:?} 下方没有启用的钉点，跳过", from);
            }
            return Ok(report);
        };

        let params = SolveParams {
            iterations,
            dampening: overrides.dampening.unwrap_or(self.config.default_dampening),
            stabilization_passes: overrides
                .stabilization_passes
                .unwrap_or(self.config.default_stabilization_passes),
            translate_root: self.config.translate_unpinned_root && start == 0 && Some(from) == self.root_bone,
        };

        if let Some(all) = self.chains.as_ref() {
            all.sync_from_bones(&mut self.transforms, &self.bones);
        }
        IkSolver::new(&mut self.transforms, &self.bones, &mut self.qcp, &mut self.buffers, params)
            .solve(chain, start);

        let mut commits = Vec::new();
        chain.for_each_shadow_from(start, &mut |sb| commits.push((sb.bone, sb.sim_axes)));
        let active = active_bones(chain, start);

        // ========== 提交 ==========
        for (id, sim) in commits {
            let sim_local = self.transforms.local(sim);
            let Some(bone) = self.bones.get_mut(id) else {
                continue;
            };
            if bone.is_frozen() {
                continue;
            }
            if params.translate_root && Some(id) == self.root_bone {
                self.transforms.set_local(bone.local_axes, sim_local);
            } else {
                self.transforms.set_local_rotation(bone.local_axes, sim_local.rotation());
            }
            bone.flags.insert(BoneFlags::IK_UPDATED);
            bone.solve_revision += 1;
            report.updated.push(id);
        }

        for id in active {
            let Some(bone) = self.bones.get(id) else {
                continue;
            };
            let Some(pin) = bone.pin.as_ref().filter(|p| p.is_enabled()) else {
                continue;
            };
            let (local_axes, tip_local, target) = (bone.local_axes, bone.tip_local(), pin.target);
            let tip = self.transforms.global_of(local_axes, tip_local);
            let goal = self.transforms.global(target).translation;
            report.max_position_error = report.max_position_error.max(tip.distance(goal));
        }

        if self.config.debug_log {
            log::info!(
                "[IK] '{}' 求解完成: 骨骼数={}, 迭代={}, 最大误差={:.5}",
                self.name,
                report.updated.len(),
                report.iterations,
                report.max_position_error
            );
        }
        Ok(report)
    }

    // ========================================
    // 查询
    // ========================================

    /// 骨骼的世界位姿
    pub fn world_transform(&mut self, id: BoneId) -> Result<BonePose> {
        let local_axes = self.bone(id)?.local_axes;
        Ok(BonePose::from(self.transforms.global(local_axes)))
    }

    /// 骨骼相对父骨骼的位姿
    pub fn local_transform(&self, id: BoneId) -> Result<BonePose> {
        let local_axes = self.bone(id)?.local_axes;
        Ok(BonePose::from(self.transforms.local(local_axes)))
    }

    /// 骨骼末端的世界位置
    pub fn bone_tip_position(&mut self, id: BoneId) -> Result<Vec3> {
        let bone = self.bone(id)?;
        let (local_axes, tip_local) = (bone.local_axes, bone.tip_local());
        Ok(self.transforms.global_of(local_axes, tip_local))
    }

    /// 诊断用：相对约束参考系（无约束时相对父骨骼）的 XYZ 欧拉角
    pub fn xyz_angles(&mut self, id: BoneId) -> Result<Vec3> {
        let bone = self.bone(id)?;
        let (local_axes, major_axes, constrained) =
            (bone.local_axes, bone.major_rotation_axes, bone.constraint.is_some());
        let relative = if constrained {
            self.transforms.global_rotation(major_axes).inverse() * self.transforms.global_rotation(local_axes)
        } else {
            self.transforms.local(local_axes).rotation()
        };
        let (x, y, z) = relative.to_euler(EulerRot::XYZ);
        Ok(Vec3::new(x, y, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::PinState;

    fn branching() -> (Armature, BoneId, BoneId, BoneId, BoneId) {
        // root ─ spine ┬ left
        //              └ right
        let mut armature = Armature::new("test");
        let root = armature.add_bone(BoneDesc::new("root", 1.0), None).expect("root");
        let spine = armature.add_bone(BoneDesc::new("spine", 1.0), Some(root)).expect("spine");
        let left = armature
            .add_bone(
                BoneDesc::new("left", 1.0).with_rotation(Quat::from_rotation_z(0.8)),
                Some(spine),
            )
            .expect("left");
        let right = armature
            .add_bone(
                BoneDesc::new("right", 1.0).with_rotation(Quat::from_rotation_z(-0.8)),
                Some(spine),
            )
            .expect("right");
        (armature, root, spine, left, right)
    }

    #[test]
    fn test_add_bone_errors() {
        let (mut armature, root, ..) = branching();
        assert!(matches!(
            armature.add_bone(BoneDesc::new("root", 1.0), Some(root)),
            Err(ArmatureError::DuplicateTag(_))
        ));
        assert!(matches!(
            armature.add_bone(BoneDesc::new("other_root", 1.0), None),
            Err(ArmatureError::RootAlreadyExists(_))
        ));
        assert!(armature.add_bone(BoneDesc::new("flat", 0.0), Some(root)).is_err());
        assert_eq!(armature.bone_by_tag("spine").map(|id| armature.bone(id).is_ok()), Some(true));
    }

    #[test]
    fn test_child_attaches_at_parent_tip() {
        let (mut armature, _, spine, ..) = branching();
        let pose = armature.world_transform(spine).expect("spine");
        assert!((pose.translation - Vec3::Y).length() < 1e-6);
        assert_eq!(armature.bone(spine).map(|b| b.ancestor_count()).ok(), Some(1));
    }

    #[test]
    fn test_pin_partitions_children() {
        let (mut armature, root, spine, left, right) = branching();
        armature.enable_pin(left).expect("pin");

        let spine_bone = armature.bone(spine).expect("spine");
        assert_eq!(spine_bone.effected_children(), &[left]);
        assert_eq!(spine_bone.free_children(), &[right]);
        assert_eq!(armature.bone(root).expect("root").effected_children(), &[spine]);
        assert_eq!(armature.bone(left).expect("left").pin_state(), PinState::Enabled);

        armature.disable_pin(left).expect("disable");
        let spine_bone = armature.bone(spine).expect("spine");
        assert!(spine_bone.effected_children().is_empty());
        assert_eq!(spine_bone.free_children().len(), 2);
        assert!(armature.bone(root).expect("root").effected_children().is_empty());
        assert_eq!(armature.bone(left).expect("left").pin_state(), PinState::Disabled);

        assert!(armature.toggle_pin(left).expect("toggle"));
        assert_eq!(armature.bone(spine).expect("spine").effected_children(), &[left]);
    }

    #[test]
    fn test_remove_pin_relinks_children() {
        let (mut armature, root, spine, left, right) = branching();
        armature.enable_pin(root).expect("root pin");
        armature.enable_pin(spine).expect("spine pin");
        armature.enable_pin(left).expect("left pin");
        armature.enable_pin(right).expect("right pin");

        assert_eq!(armature.pin(left).expect("left").parent_pin(), Some(spine));
        assert_eq!(armature.pin(spine).expect("spine").child_pins().len(), 2);

        armature.remove_pin(spine).expect("remove");
        assert!(matches!(armature.pin(spine), Err(ArmatureError::NoPin(_))));
        assert_eq!(armature.pin(left).expect("left").parent_pin(), Some(root));
        assert_eq!(armature.pin(right).expect("right").parent_pin(), Some(root));
        let mut children = armature.pin(root).expect("root").child_pins().to_vec();
        children.sort_by_key(|id| id.index());
        assert_eq!(children, vec![left, right]);
        // spine 仍在通往钉点的路径上
        assert_eq!(armature.bone(root).expect("root").effected_children(), &[spine]);
    }

    #[test]
    fn test_pin_target_starts_at_tip() {
        let (mut armature, _, _, left, _) = branching();
        armature.enable_pin(left).expect("pin");
        let tip = armature.bone_tip_position(left).expect("tip");
        let target = armature.pin_target(left).expect("target");
        assert!((tip - target.translation).length() < 1e-5);
    }

    #[test]
    fn test_segmentation_per_branch() {
        let (mut armature, root, spine, left, right) = branching();
        armature.enable_pin(left).expect("left");
        armature.enable_pin(right).expect("right");

        let chains = armature.bone_chains().expect("chains");
        assert_eq!(chains.root(), root);
        assert_eq!(chains.tip(), spine);
        assert_eq!(chains.children().len(), 2);
        assert_eq!(chains.chain_count(), 3);
        let tips: Vec<BoneId> = chains.children().iter().map(|c| c.tip()).collect();
        assert!(tips.contains(&left) && tips.contains(&right));
        // 根骨骼受两个钉点影响
        assert_eq!(chains.bones()[0].effectors().len(), 2);
    }

    #[test]
    fn test_remove_bone_drops_subtree() {
        let (mut armature, root, spine, left, _) = branching();
        armature.enable_pin(left).expect("pin");
        assert_eq!(armature.remove_bone(spine).expect("remove"), 3);
        assert_eq!(armature.bone_count(), 1);
        assert!(matches!(armature.bone(left), Err(ArmatureError::UnknownBone(_))));
        assert!(armature.bone_by_tag("left").is_none());
        let root_bone = armature.bone(root).expect("root");
        assert!(root_bone.children().is_empty());
        assert!(root_bone.effected_children().is_empty());
        assert!(armature.bone_chains().is_none());
    }

    #[test]
    fn test_reparent_keeps_world_pose() {
        let (mut armature, root, _, left, right) = branching();
        armature.enable_pin(right).expect("pin");
        let before = armature.world_transform(right).expect("before");

        armature.reparent_bone(right, left).expect("reparent");
        let after = armature.world_transform(right).expect("after");
        assert!((before.translation - after.translation).length() < 1e-5);
        assert!(before.rotation.dot(after.rotation).abs() > 1.0 - 1e-6);
        assert_eq!(armature.bone(right).expect("right").ancestor_count(), 3);
        assert_eq!(armature.bone(left).expect("left").effected_children(), &[right]);

        assert!(matches!(
            armature.reparent_bone(root, right),
            Err(ArmatureError::HierarchyCycle { .. })
        ));
    }

    #[test]
    fn test_parameter_validation() {
        let (mut armature, root, ..) = branching();
        assert!(armature.set_stiffness(root, 1.5).is_err());
        assert!(armature.set_stiffness(root, 0.5).is_ok());
        assert!(armature.set_pin_weight(root, 1.0).is_err());
        armature.enable_pin(root).expect("pin");
        assert!(armature.set_pin_depth_falloff(root, -0.1).is_err());
        assert!(armature.set_pin_priorities(root, Vec3::new(1.0, -1.0, 0.0)).is_err());
        assert!(armature.constraint(root).is_err());
        armature.add_constraint(root).expect("constraint");
        assert!(armature.constraint(root).is_ok());
    }
}
