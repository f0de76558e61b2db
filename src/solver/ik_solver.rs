//! 迭代求解
//!
//! 每次外层迭代：
//! 1. （可选）未钉住的根骨骼先做一次带平移的整体拟合
//! 2. 子链先于父链；每条链内从链尖到链根逐根骨骼求解
//! 3. 单根骨骼：收集朝向点对 → QCP 求旋转 → 按阻尼截断（根骨骼同样） → 施加约束
//!
//! 求解只改动模拟节点，提交由 `Armature` 完成。

use glam::{Quat, Vec3};

use super::chain::{BoneChain, ShadowBone};
use crate::arena::Arena;
use crate::math::{shortest_arc, QuatExt};
use crate::qcp::Qcp;
use crate::skeleton::{Bone, BoneId};
use crate::transform::TransformTree;

const AXES: [Vec3; 3] = [Vec3::X, Vec3::Y, Vec3::Z];

/// 朝向点对缓冲区，由骨架持有并跨 solve 复用
#[derive(Debug, Default)]
pub(crate) struct HeadingBuffers {
    tips: Vec<Vec3>,
    targets: Vec<Vec3>,
    weights: Vec<f32>,
}

impl HeadingBuffers {
    fn clear(&mut self) {
        self.tips.clear();
        self.targets.clear();
        self.weights.clear();
    }

    fn push(&mut self, tip: Vec3, target: Vec3, weight: f32) {
        self.tips.push(tip);
        self.targets.push(target);
        self.weights.push(weight);
    }

    #[inline]
    fn len(&self) -> usize {
        self.tips.len()
    }

    /// 加权均方偏差
    fn mean_square_deviation(&self) -> f32 {
        let mut sum = 0.0;
        let mut total = 0.0;
        for ((tip, target), w) in self.tips.iter().zip(&self.targets).zip(&self.weights) {
            sum += w * tip.distance_squared(*target);
            total += w;
        }
        if total > 0.0 {
            sum / total
        } else {
            0.0
        }
    }
}

/// 一次 solve 的参数（已合并覆盖值）
#[derive(Clone, Copy, Debug)]
pub(crate) struct SolveParams {
    pub iterations: usize,
    pub dampening: f32,
    pub stabilization_passes: usize,
    pub translate_root: bool,
}

/// 借用骨架各部分的求解器，生命周期只覆盖一次 solve
pub(crate) struct IkSolver<'a> {
    tree: &'a mut TransformTree,
    bones: &'a Arena<Bone>,
    qcp: &'a mut Qcp,
    buffers: &'a mut HeadingBuffers,
    params: SolveParams,
}

impl<'a> IkSolver<'a> {
    pub(crate) fn new(
        tree: &'a mut TransformTree,
        bones: &'a Arena<Bone>,
        qcp: &'a mut Qcp,
        buffers: &'a mut HeadingBuffers,
        params: SolveParams,
    ) -> Self {
        Self {
            tree,
            bones,
            qcp,
            buffers,
            params,
        }
    }

    /// 从 `chain.bones[start]` 开始求解本链及其全部子链
    ///
    /// `translate_root` 只在 `start` 是整棵骨架的根骨骼时生效。
    pub(crate) fn solve(&mut self, chain: &BoneChain, start: usize) {
        for iteration in 0..self.params.iterations {
            if self.params.translate_root && start == 0 {
                if let Some(root) = chain.bones.first() {
                    self.fit_root_translation(root);
                }
            }
            self.solve_chain(chain, start, iteration);
        }
    }

    fn solve_chain(&mut self, chain: &BoneChain, start: usize, iteration: usize) {
        for child in &chain.children {
            self.solve_chain(child, 0, iteration);
        }
        for sb in chain.bones.iter().skip(start).rev() {
            self.solve_bone(sb, iteration);
        }
    }

    fn solve_bone(&mut self, sb: &ShadowBone, iteration: usize) {
        let bones = self.bones;
        let Some(bone) = bones.get(sb.bone) else {
            return;
        };
        if bone.is_frozen() {
            return;
        }

        let budget = self.params.dampening * (1.0 - bone.stiffness);
        if budget <= 0.0 {
            return;
        }

        self.update_bone(sb, bone, budget, iteration);

        if self.params.stabilization_passes == 0 {
            return;
        }
        let mut best_local = self.tree.local(sb.sim_axes);
        let mut best_msd = self.current_deviation(sb);
        for _ in 0..self.params.stabilization_passes {
            self.update_bone(sb, bone, budget, iteration);
            let msd = self.current_deviation(sb);
            if msd <= best_msd {
                best_msd = msd;
                best_local = self.tree.local(sb.sim_axes);
            } else {
                self.tree.set_local(sb.sim_axes, best_local);
                break;
            }
        }
    }

    /// 单根骨骼的一次更新：拟合旋转、截断、约束
    fn update_bone(&mut self, sb: &ShadowBone, bone: &Bone, budget: f32, iteration: usize) {
        let origin = self.tree.origin(sb.sim_axes);
        self.collect_headings(sb, origin);

        let rotation = match self.buffers.len() {
            0 => return,
            1 => shortest_arc(self.buffers.tips[0], self.buffers.targets[0]),
            _ => self.qcp.weighted_superpose(
                &self.buffers.tips,
                &self.buffers.targets,
                &self.buffers.weights,
                false,
            ),
        };
        let rotation = rotation.clamp_to_angle(budget);
        if rotation != Quat::IDENTITY {
            self.tree.rotate_by(sb.sim_axes, rotation);
        }

        if let Some(constraint) = bone.constraint.as_ref() {
            let angle = constraint.returnful_angle(iteration, self.params.iterations, self.params.dampening);
            if angle > 0.0 {
                constraint.set_axes_to_returnfulled(self.tree, sb.sim_axes, sb.sim_constraint_axes, angle);
            }
            constraint.set_axes_to_snapped(self.tree, sb.sim_axes, sb.sim_constraint_axes);
        }
    }

    /// 根骨骼带平移的整体拟合（唯一不受阻尼限制的一步）
    fn fit_root_translation(&mut self, sb: &ShadowBone) {
        let bones = self.bones;
        let Some(bone) = bones.get(sb.bone) else {
            return;
        };
        if bone.is_pinned() || bone.is_frozen() {
            return;
        }

        let origin = self.tree.origin(sb.sim_axes);
        self.collect_headings(sb, origin);
        match self.buffers.len() {
            0 => {}
            1 => {
                let offset = self.buffers.targets[0] - self.buffers.tips[0];
                self.tree.translate_by(sb.sim_axes, offset);
            }
            _ => {
                let rotation = self.qcp.weighted_superpose(
                    &self.buffers.tips,
                    &self.buffers.targets,
                    &self.buffers.weights,
                    true,
                );
                let translation = self.qcp.translation();
                self.tree.rotate_by(sb.sim_axes, rotation);
                self.tree.translate_by(sb.sim_axes, translation);
            }
        }
    }

    fn current_deviation(&mut self, sb: &ShadowBone) -> f32 {
        let origin = self.tree.origin(sb.sim_axes);
        self.collect_headings(sb, origin);
        self.buffers.mean_square_deviation()
    }

    /// 收集相对 `origin` 的朝向点对
    ///
    /// 每个钉点贡献末端位置一对；每个优先级大于 0 的轴再贡献
    /// `末端 ± 轴 · 优先级` 两对。
    fn collect_headings(&mut self, sb: &ShadowBone, origin: Vec3) {
        self.buffers.clear();
        for effector in &sb.effectors {
            let Some(pinned) = self.bones.get(effector.bone) else {
                continue;
            };
            let Some(pin) = pinned.pin.as_ref().filter(|p| p.is_enabled()) else {
                continue;
            };
            let weight = pin.pin_weight * effector.falloff;
            if weight <= 0.0 {
                continue;
            }

            let tip_basis = self.tree.global(effector.sim_axes);
            let target_basis = self.tree.global(pin.target);
            let tip = tip_basis.global_of_point(pinned.tip_local());
            let target = target_basis.translation;

            self.buffers.push(tip - origin, target - origin, weight);

            for (axis, priority) in AXES.iter().zip(pin.priorities.to_array()) {
                if priority <= 0.0 {
                    continue;
                }
                let tip_axis = tip_basis.global_of_direction(*axis) * priority;
                let target_axis = target_basis.global_of_direction(*axis) * priority;
                self.buffers.push(tip + tip_axis - origin, target + target_axis - origin, weight);
                self.buffers.push(tip - tip_axis - origin, target - target_axis - origin, weight);
            }
        }
    }
}

/// 链树中从 `from` 开始被求解的骨骼
pub(crate) fn active_bones(chain: &BoneChain, start: usize) -> Vec<BoneId> {
    let mut out = Vec::new();
    chain.for_each_shadow_from(start, &mut |sb| out.push(sb.bone));
    out
}
