//! 骨骼系统
//!
//! - `Bone`: 单根骨骼，持有变换树中的骨骼坐标系与约束参考系
//! - `IkPin`: 钉点，把骨骼末端拉向目标节点
//! - `Armature`: 骨架门面，负责结构维护与求解调度

mod armature;
mod bone;
mod pin;

pub use armature::{Armature, SolveOverrides, SolveReport};
pub use bone::{Bone, BoneDesc, BoneFlags, BoneId, PinState};
pub use pin::IkPin;

use glam::{Mat4, Quat, Vec3};

use crate::transform::Basis;

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼位姿（刚体，无缩放）
#[derive(Clone, Copy, Debug)]
pub struct BonePose {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for BonePose {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl BonePose {
    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// 从矩阵分解（忽略缩放）
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (_, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation }
    }

    #[inline]
    pub fn to_basis(&self) -> Basis {
        Basis::new(self.translation, self.rotation)
    }
}

impl From<Basis> for BonePose {
    fn from(basis: Basis) -> Self {
        Self {
            translation: basis.translation,
            rotation: basis.rotation(),
        }
    }
}
