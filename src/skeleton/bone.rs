//! 骨骼节点
//!
//! 骨骼本身不保存变换，只保存变换树中的两个节点句柄：
//! - `local_axes`: 骨骼坐标系，+Y 为骨骼朝向，长度 `bone_height`
//! - `major_rotation_axes`: 约束参考系，与 `local_axes` 同父
//!
//! 构造分两步：先填 `BoneDesc`，再由 `Armature::add_bone` 注册。

use bitflags::bitflags;
use glam::{Quat, Vec3};

use super::pin::IkPin;
use crate::arena::Handle;
use crate::constraint::Kusudama;
use crate::transform::NodeId;

/// 骨骼句柄
pub type BoneId = Handle<Bone>;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 求解时不旋转此骨骼（仍参与子孙的朝向计算）
        const ORIENTATION_LOCK = 1 << 0;
        /// 最近一次 solve 改动过此骨骼
        const IK_UPDATED = 1 << 1;
    }
}

/// 钉点状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinState {
    Unpinned,
    Enabled,
    Disabled,
}

// ============================================================================
// 构造描述
// ============================================================================

/// 骨骼构造参数
#[derive(Clone, Debug)]
pub struct BoneDesc {
    pub tag: String,
    pub height: f32,
    /// 相对父骨骼的平移；`None` 时接在父骨骼末端（根骨骼为原点）
    pub offset: Option<Vec3>,
    /// 相对父骨骼的旋转
    pub rotation: Quat,
}

impl BoneDesc {
    pub fn new(tag: impl Into<String>, height: f32) -> Self {
        Self {
            tag: tag.into(),
            height,
            offset: None,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }
}

// ============================================================================
// 骨骼
// ============================================================================

#[derive(Clone, Debug)]
pub struct Bone {
    pub(crate) tag: String,
    pub(crate) parent: Option<BoneId>,

    pub(crate) local_axes: NodeId,
    pub(crate) major_rotation_axes: NodeId,

    pub(crate) constraint: Option<Kusudama>,
    pub(crate) pin: Option<IkPin>,

    pub(crate) bone_height: f32,
    pub(crate) ancestor_count: usize,
    pub(crate) stiffness: f32,
    pub(crate) flags: BoneFlags,

    pub(crate) children: Vec<BoneId>,
    /// 子树中没有启用钉点的子骨骼
    pub(crate) free_children: Vec<BoneId>,
    /// 自身被钉住或子树中有启用钉点的子骨骼
    pub(crate) effected_children: Vec<BoneId>,

    /// 每次 solve 改动此骨骼时递增
    pub(crate) solve_revision: u64,
}

impl Bone {
    pub(crate) fn new(desc: &BoneDesc, parent: Option<BoneId>, local_axes: NodeId, major_rotation_axes: NodeId) -> Self {
        Self {
            tag: desc.tag.clone(),
            parent,
            local_axes,
            major_rotation_axes,
            constraint: None,
            pin: None,
            bone_height: desc.height,
            ancestor_count: 0,
            stiffness: 0.0,
            flags: BoneFlags::empty(),
            children: Vec::new(),
            free_children: Vec::new(),
            effected_children: Vec::new(),
            solve_revision: 0,
        }
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    pub fn parent(&self) -> Option<BoneId> {
        self.parent
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub fn local_axes(&self) -> NodeId {
        self.local_axes
    }

    #[inline]
    pub fn major_rotation_axes(&self) -> NodeId {
        self.major_rotation_axes
    }

    #[inline]
    pub fn constraint(&self) -> Option<&Kusudama> {
        self.constraint.as_ref()
    }

    #[inline]
    pub fn pin(&self) -> Option<&IkPin> {
        self.pin.as_ref()
    }

    pub fn pin_state(&self) -> PinState {
        match &self.pin {
            None => PinState::Unpinned,
            Some(pin) if pin.is_enabled() => PinState::Enabled,
            Some(_) => PinState::Disabled,
        }
    }

    /// 是否有启用的钉点
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin.as_ref().is_some_and(|p| p.is_enabled())
    }

    #[inline]
    pub fn bone_height(&self) -> f32 {
        self.bone_height
    }

    #[inline]
    pub fn ancestor_count(&self) -> usize {
        self.ancestor_count
    }

    #[inline]
    pub fn stiffness(&self) -> f32 {
        self.stiffness
    }

    #[inline]
    pub fn flags(&self) -> BoneFlags {
        self.flags
    }

    #[inline]
    pub fn is_orientation_locked(&self) -> bool {
        self.flags.contains(BoneFlags::ORIENTATION_LOCK)
    }

    /// 求解时是否完全跳过旋转
    #[inline]
    pub(crate) fn is_frozen(&self) -> bool {
        self.is_orientation_locked() || self.stiffness >= 1.0
    }

    #[inline]
    pub fn children(&self) -> &[BoneId] {
        &self.children
    }

    #[inline]
    pub fn free_children(&self) -> &[BoneId] {
        &self.free_children
    }

    #[inline]
    pub fn effected_children(&self) -> &[BoneId] {
        &self.effected_children
    }

    /// 自身被钉住或子树中存在启用钉点
    #[inline]
    pub fn leads_to_pin(&self) -> bool {
        self.is_pinned() || !self.effected_children.is_empty()
    }

    #[inline]
    pub fn solve_revision(&self) -> u64 {
        self.solve_revision
    }

    /// 骨骼末端在骨骼坐标系中的位置
    #[inline]
    pub fn tip_local(&self) -> Vec3 {
        Vec3::Y * self.bone_height
    }
}
