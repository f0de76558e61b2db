//! Kusudama 朝向约束
//!
//! 约束分两部分：
//! - 摆动：骨骼 +Y 方向必须落在限制锥（及锥间切线桥）的并集内
//! - 扭转：绕 +Y 的扭转角必须落在 [min_axial_angle, min_axial_angle + range]
//!
//! 纯函数部分只处理"相对约束参考系的旋转"，节点级函数负责从变换树取出
//! 参考系并把结果写回。

use glam::{Quat, Vec3};
use std::f32::consts::{PI, TAU};

use super::limit_cone::{BridgeHit, LimitCone};
use crate::math::{shortest_arc, wrap_pi, wrap_tau, QuatExt, DEGENERATE_EPSILON};
use crate::transform::{Basis, NodeId, TransformTree};
use crate::{ArmatureError, Result};

/// 扭转判定容差（弧度）
const TWIST_EPSILON: f32 = 1.0e-5;
/// 写回节点时 1 − |dot| 不超过此值的修正视为无变化
const SNAP_DOT_EPSILON: f32 = 1.0e-7;

#[derive(Clone, Debug)]
pub struct Kusudama {
    limit_cones: Vec<LimitCone>,
    min_axial_angle: f32,
    range: f32,
    orientation_limited: bool,
    axially_limited: bool,
    painfullness: f32,
}

impl Default for Kusudama {
    fn default() -> Self {
        Self::new()
    }
}

impl Kusudama {
    /// 无锥、扭转不受限的约束
    pub fn new() -> Self {
        Self {
            limit_cones: Vec::new(),
            min_axial_angle: 0.0,
            range: TAU,
            orientation_limited: true,
            axially_limited: false,
            painfullness: 0.0,
        }
    }

    // ========================================
    // 限制锥编辑
    // ========================================

    #[inline]
    pub fn limit_cones(&self) -> &[LimitCone] {
        &self.limit_cones
    }

    /// 在 `index` 处插入限制锥（`index == len` 追加）
    pub fn add_limit_cone(&mut self, index: usize, direction: Vec3, radius: f32) -> Result<()> {
        if index > self.limit_cones.len() {
            return Err(ArmatureError::ConeIndexOutOfRange {
                index,
                len: self.limit_cones.len(),
            });
        }
        let cone = LimitCone::new(direction, radius)?;
        self.limit_cones.insert(index, cone);
        self.update_tangent_radii();
        Ok(())
    }

    /// 追加限制锥
    pub fn push_limit_cone(&mut self, direction: Vec3, radius: f32) -> Result<()> {
        self.add_limit_cone(self.limit_cones.len(), direction, radius)
    }

    pub fn remove_limit_cone(&mut self, index: usize) -> Result<LimitCone> {
        self.check_index(index)?;
        let cone = self.limit_cones.remove(index);
        self.update_tangent_radii();
        Ok(cone)
    }

    pub fn set_cone_radius(&mut self, index: usize, radius: f32) -> Result<()> {
        self.check_index(index)?;
        self.limit_cones[index].set_radius(radius)?;
        self.update_tangent_radii();
        Ok(())
    }

    pub fn set_cone_direction(&mut self, index: usize, direction: Vec3) -> Result<()> {
        self.check_index(index)?;
        self.limit_cones[index].set_control_point(direction)?;
        self.update_tangent_radii();
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.limit_cones.len() {
            return Err(ArmatureError::ConeIndexOutOfRange {
                index,
                len: self.limit_cones.len(),
            });
        }
        Ok(())
    }

    /// 重新计算所有相邻锥之间的切线圆
    pub fn update_tangent_radii(&mut self) {
        for i in 0..self.limit_cones.len() {
            let (current, rest) = self.limit_cones.split_at_mut(i + 1);
            let cone = &mut current[i];
            match rest.first() {
                Some(next) => cone.update_tangent_handles(next),
                None => cone.clear_tangent_handles(),
            }
        }
    }

    // ========================================
    // 扭转范围与开关
    // ========================================

    #[inline]
    pub fn min_axial_angle(&self) -> f32 {
        self.min_axial_angle
    }

    #[inline]
    pub fn axial_range(&self) -> f32 {
        self.range
    }

    /// 设置扭转范围并启用扭转限制；`min` 折返到 [0, 2π)，`range` 须在 [0, 2π]
    pub fn set_axial_limits(&mut self, min_angle: f32, range: f32) -> Result<()> {
        if !min_angle.is_finite() {
            return Err(ArmatureError::InvalidParameter {
                name: "min_axial_angle",
                value: min_angle,
                range: "finite",
            });
        }
        if !(0.0..=TAU).contains(&range) {
            return Err(ArmatureError::InvalidParameter {
                name: "axial_range",
                value: range,
                range: "[0, 2π]",
            });
        }
        self.min_axial_angle = wrap_tau(min_angle);
        self.range = range;
        self.axially_limited = true;
        Ok(())
    }

    #[inline]
    pub fn is_orientationally_limited(&self) -> bool {
        self.orientation_limited
    }

    #[inline]
    pub fn is_axially_limited(&self) -> bool {
        self.axially_limited
    }

    pub fn enable_orientational_limits(&mut self) {
        self.orientation_limited = true;
    }

    pub fn disable_orientational_limits(&mut self) {
        self.orientation_limited = false;
    }

    pub fn enable_axial_limits(&mut self) {
        self.axially_limited = true;
    }

    pub fn disable_axial_limits(&mut self) {
        self.axially_limited = false;
    }

    #[inline]
    pub fn painfullness(&self) -> f32 {
        self.painfullness
    }

    /// 软约束强度，截断到 [0, 1]
    pub fn set_painfullness(&mut self, painfullness: f32) {
        self.painfullness = if painfullness.is_finite() {
            painfullness.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    // ========================================
    // 摆动
    // ========================================

    /// 把方向投影到允许区域，返回 `(rectified, signal)`
    ///
    /// signal 为 1 表示在界内；否则为 cos(到最近边界点的角度) − 1，越负越远。
    /// 等距时按锥的顺序取第一个候选。
    pub fn point_in_limits(&self, direction: Vec3) -> (Vec3, f32) {
        let x = direction.normalize_or_zero();
        if x == Vec3::ZERO || !self.orientation_limited || self.limit_cones.is_empty() {
            return (direction, 1.0);
        }

        let mut closest = x;
        let mut closest_cos = -2.0f32;

        for cone in &self.limit_cones {
            match cone.closest_to_cone(x) {
                None => return (x, 1.0),
                Some(point) => {
                    let cos = point.dot(x);
                    if cos > closest_cos {
                        closest = point;
                        closest_cos = cos;
                    }
                }
            }
        }

        for pair in self.limit_cones.windows(2) {
            match pair[0].on_great_tangent_triangle(&pair[1], x) {
                Some(BridgeHit::Inside) => return (x, 1.0),
                Some(BridgeHit::Boundary(point)) => {
                    let cos = point.dot(x);
                    if cos > closest_cos {
                        closest = point;
                        closest_cos = cos;
                    }
                }
                None => {}
            }
        }

        (closest, closest_cos.min(1.0) - 1.0)
    }

    /// 沿锥控制点序列的大圆路径上离 `direction` 最近的点（软约束的拉回目标）
    pub fn point_on_path_sequence(&self, direction: Vec3) -> Vec3 {
        let x = direction.normalize_or_zero();
        match self.limit_cones.as_slice() {
            [] => x,
            [only] => only.control_point(),
            cones => {
                let mut best = cones[0].control_point();
                let mut best_cos = -2.0f32;
                for pair in cones.windows(2) {
                    let point = pair[0].closest_point_on_arc(&pair[1], x);
                    let cos = point.dot(x);
                    if cos > best_cos {
                        best = point;
                        best_cos = cos;
                    }
                }
                best
            }
        }
    }

    /// 相对约束参考系的旋转是否满足全部限制
    pub fn is_in_orientation_limits(&self, relative: Quat) -> bool {
        let (_, signal) = self.point_in_limits(relative * Vec3::Y);
        signal >= 1.0 && (!self.axially_limited || self.twist_correction(relative) == 0.0)
    }

    // ========================================
    // 扭转
    // ========================================

    /// 落到最近扭转边界所需的绕 +Y 修正角；在范围内返回 0
    ///
    /// 到两侧边界距离相等时修正到上界。
    pub fn twist_correction(&self, relative: Quat) -> f32 {
        if !self.axially_limited || self.range >= TAU {
            return 0.0;
        }
        let twist = relative.twist_angle(Vec3::Y);
        let mut offset = wrap_tau(twist - self.min_axial_angle);
        if offset > TAU - TWIST_EPSILON {
            offset = 0.0;
        }
        if offset <= self.range + TWIST_EPSILON {
            return 0.0;
        }
        let to_min = TAU - offset;
        let to_max = offset - self.range;
        if to_min < to_max {
            to_min
        } else {
            -to_max
        }
    }

    /// 扭转角到扭转范围中心的有符号角差
    pub fn angle_to_twist_center(&self, relative: Quat) -> f32 {
        if !self.axially_limited {
            return 0.0;
        }
        let twist = relative.twist_angle(Vec3::Y);
        wrap_pi(self.min_axial_angle + 0.5 * self.range - twist)
    }

    // ========================================
    // 相对旋转上的约束
    // ========================================

    /// 硬约束：先把 +Y 投影进允许区域，再修正扭转
    pub fn constrain_rotation(&self, relative: Quat) -> Quat {
        let mut result = relative;
        if self.orientation_limited {
            let heading = result * Vec3::Y;
            let (rectified, signal) = self.point_in_limits(heading);
            if signal < 1.0 {
                result = (shortest_arc(heading, rectified) * result).normalize();
            }
        }
        let correction = self.twist_correction(result);
        if correction != 0.0 {
            result = (result * Quat::from_rotation_y(correction)).normalize();
        }
        result
    }

    /// 软约束：把 +Y 与扭转各自朝允许区域中心拉回，最多 `angle` 弧度
    pub fn returnful_rotation(&self, relative: Quat, angle: f32) -> Quat {
        if self.painfullness <= 0.0 || angle <= 0.0 {
            return relative;
        }
        let mut result = relative;
        if self.orientation_limited && !self.limit_cones.is_empty() {
            let heading = result * Vec3::Y;
            let goal = self.point_on_path_sequence(heading);
            let pull = shortest_arc(heading, goal).clamp_to_angle(angle);
            result = (pull * result).normalize();
        }
        if self.axially_limited {
            let to_center = self.angle_to_twist_center(result).clamp(-angle, angle);
            if to_center != 0.0 {
                result = (result * Quat::from_rotation_y(to_center)).normalize();
            }
        }
        result
    }

    /// 第 `iteration` 次迭代（共 `iterations` 次）的软约束转角
    ///
    /// `scalar(i) = (Nᵏ − iᵏ) / Nᵏ`，`k = 0.2 · N · painfullness`，前几次拉得最重。
    pub fn returnful_angle(&self, iteration: usize, iterations: usize, dampening: f32) -> f32 {
        if self.painfullness <= 0.0 || iterations == 0 || iteration >= iterations {
            return 0.0;
        }
        let n = iterations as f32;
        let k = 0.2 * n * self.painfullness;
        // 等价于 (Nᵏ − iᵏ) / Nᵏ，避免 Nᵏ 溢出
        let scalar = 1.0 - (iteration as f32 / n).powf(k);
        scalar * self.painfullness * dampening
    }

    /// 整个求解过程的软约束转角表
    pub fn returnful_schedule(&self, iterations: usize, dampening: f32) -> Vec<f32> {
        (0..iterations)
            .map(|i| self.returnful_angle(i, iterations, dampening))
            .collect()
    }

    // ========================================
    // 变换树上的约束
    // ========================================

    /// 对 `to_set` 施加硬约束，`limiting` 为约束参考系；返回是否改动
    pub fn set_axes_to_snapped(&self, tree: &mut TransformTree, to_set: NodeId, limiting: NodeId) -> bool {
        let (basis, limiting_rotation, relative) = relative_rotation(tree, to_set, limiting);
        let constrained = self.constrain_rotation(relative);
        write_back(tree, to_set, basis, limiting_rotation, relative, constrained)
    }

    /// 对 `to_set` 施加软约束，最多转 `angle` 弧度
    pub fn set_axes_to_returnfulled(
        &self,
        tree: &mut TransformTree,
        to_set: NodeId,
        limiting: NodeId,
        angle: f32,
    ) -> bool {
        let (basis, limiting_rotation, relative) = relative_rotation(tree, to_set, limiting);
        let pulled = self.returnful_rotation(relative, angle);
        write_back(tree, to_set, basis, limiting_rotation, relative, pulled)
    }

    /// 只修正扭转，返回实际施加的修正角
    pub fn snap_to_twist_limits(&self, tree: &mut TransformTree, to_set: NodeId, limiting: NodeId) -> f32 {
        let (basis, limiting_rotation, relative) = relative_rotation(tree, to_set, limiting);
        let correction = self.twist_correction(relative);
        if correction != 0.0 {
            let corrected = (relative * Quat::from_rotation_y(correction)).normalize();
            write_back(tree, to_set, basis, limiting_rotation, relative, corrected);
        }
        correction
    }

    // ========================================
    // 参考系优化
    // ========================================

    /// 重新选择参考系 +Y 为锥方向的平均，返回旧参考系下的旋转 R（新参考系 = 旧 · R）
    ///
    /// 调用方需要把 R 施加到参考系节点；锥控制点在此处改写到新参考系。
    pub fn optimize_limiting_axes(&mut self) -> Quat {
        let average = match self.limit_cones.as_slice() {
            [] => return Quat::IDENTITY,
            [only] => only.control_point(),
            cones => {
                let mut sum = Vec3::ZERO;
                for pair in cones.windows(2) {
                    let a = pair[0].control_point();
                    let b = pair[1].control_point();
                    let arc = a.dot(b).clamp(-1.0, 1.0).acos();
                    sum += (a + b).normalize_or_zero() * arc;
                }
                if sum.length_squared() <= DEGENERATE_EPSILON {
                    sum = cones.iter().map(|c| c.control_point()).sum();
                }
                sum
            }
        };

        if average.length_squared() <= DEGENERATE_EPSILON {
            return Quat::IDENTITY;
        }
        let rotation = shortest_arc(Vec3::Y, average);
        let inverse = rotation.inverse();
        for cone in &mut self.limit_cones {
            let moved = inverse * cone.control_point();
            // 旋转后的单位向量必然合法
            let _ = cone.set_control_point(moved);
        }
        self.update_tangent_radii();
        rotation
    }

    /// 诊断用：剩余自由度占比（球面面积比 × 扭转范围比），1 表示不受限
    pub fn rotational_freedom(&self) -> f32 {
        let orientation = if self.orientation_limited && !self.limit_cones.is_empty() {
            let caps: f32 = self
                .limit_cones
                .iter()
                .map(|c| 0.5 * (1.0 - c.radius_cos()))
                .sum();
            let bridges: f32 = self
                .limit_cones
                .windows(2)
                .map(|pair| {
                    let arc = pair[0].control_point().dot(pair[1].control_point()).clamp(-1.0, 1.0).acos();
                    // 近似为沿弧的带状区域
                    arc * 0.5 * (pair[0].radius() + pair[1].radius()) / (2.0 * PI)
                })
                .sum();
            (caps + bridges).min(1.0)
        } else {
            1.0
        };
        let axial = if self.axially_limited { self.range / TAU } else { 1.0 };
        orientation * axial
    }
}

fn relative_rotation(tree: &mut TransformTree, to_set: NodeId, limiting: NodeId) -> (Basis, Quat, Quat) {
    let basis = tree.global(to_set);
    let limiting_rotation = tree.global_rotation(limiting);
    let relative = limiting_rotation.inverse() * basis.rotation();
    (basis, limiting_rotation, relative)
}

fn write_back(
    tree: &mut TransformTree,
    to_set: NodeId,
    basis: Basis,
    limiting_rotation: Quat,
    before: Quat,
    after: Quat,
) -> bool {
    if 1.0 - before.dot(after).abs() <= SNAP_DOT_EPSILON {
        return false;
    }
    tree.set_global(to_set, Basis::new(basis.translation, limiting_rotation * after));
    true
}
