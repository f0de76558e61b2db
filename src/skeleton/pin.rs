//! IK 钉点
//!
//! 钉点挂在骨骼上（1:1），目标是变换树中挂在骨架环境坐标系下的一个节点。
//! 目标节点的原点是骨骼末端要到达的位置，目标节点的坐标轴是骨骼坐标轴
//! 要对齐的朝向（按各轴优先级加权，优先级 0 表示该轴不参与）。

use glam::Vec3;

use super::bone::BoneId;
use crate::transform::NodeId;

#[derive(Clone, Debug)]
pub struct IkPin {
    pub(crate) for_bone: BoneId,
    pub(crate) target: NodeId,
    pub(crate) enabled: bool,

    /// X / Y / Z 轴朝向优先级
    pub(crate) priorities: Vec3,
    /// 经过此钉点继续向上传递时，下方钉点权重乘以此值；0 表示截断
    pub(crate) depth_falloff: f32,
    pub(crate) pin_weight: f32,

    /// 最近的带钉点祖先骨骼
    pub(crate) parent_pin: Option<BoneId>,
    /// 以此钉点为 `parent_pin` 的骨骼
    pub(crate) child_pins: Vec<BoneId>,
}

impl IkPin {
    pub(crate) fn new(for_bone: BoneId, target: NodeId) -> Self {
        Self {
            for_bone,
            target,
            enabled: true,
            priorities: Vec3::ZERO,
            depth_falloff: 0.0,
            pin_weight: 1.0,
            parent_pin: None,
            child_pins: Vec::new(),
        }
    }

    #[inline]
    pub fn for_bone(&self) -> BoneId {
        self.for_bone
    }

    #[inline]
    pub fn target(&self) -> NodeId {
        self.target
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn priorities(&self) -> Vec3 {
        self.priorities
    }

    /// 是否要求朝向对齐
    #[inline]
    pub fn has_orientation_priority(&self) -> bool {
        self.priorities.max_element() > 0.0
    }

    #[inline]
    pub fn depth_falloff(&self) -> f32 {
        self.depth_falloff
    }

    #[inline]
    pub fn pin_weight(&self) -> f32 {
        self.pin_weight
    }

    #[inline]
    pub fn parent_pin(&self) -> Option<BoneId> {
        self.parent_pin
    }

    #[inline]
    pub fn child_pins(&self) -> &[BoneId] {
        &self.child_pins
    }

    /// 该钉点贡献的朝向点对数（每个正优先级轴一对）
    pub fn heading_count(&self) -> usize {
        1 + 2 * self.priorities.to_array().iter().filter(|p| **p > 0.0).count()
    }
}
