//! 约束多链 IK 引擎
//!
//! 模块划分（自底向上）：
//! - `math`: glam 之上的射线求交、摆动/扭转分解等辅助
//! - `transform`: 带脏标记的层级变换树（句柄 + 世代号）
//! - `qcp`: 加权点集叠合（QCP）求最优旋转
//! - `constraint`: Kusudama 朝向约束（限制锥 + 切线桥 + 轴向扭转）
//! - `skeleton`: 骨骼、钉点（Pin）与骨架门面 `Armature`
//! - `solver`: 骨骼链分段与迭代求解

pub mod arena;
pub mod config;
pub mod constraint;
pub mod math;
pub mod qcp;
pub mod skeleton;
pub mod solver;
pub mod transform;

use thiserror::Error;

pub use arena::{Arena, Handle};
pub use config::{get_config, reset_config, set_config, SolverConfig};
pub use constraint::{Kusudama, LimitCone};
pub use qcp::Qcp;
pub use skeleton::{
    Armature, Bone, BoneDesc, BoneFlags, BoneId, BonePose, IkPin, PinState, SolveOverrides,
    SolveReport,
};
pub use solver::{BoneChain, ShadowBone};
pub use transform::{Basis, NodeId, ParentChangeObserver, TransformNode, TransformTree};

/// 引擎错误
///
/// 只覆盖调用方的结构性错误；退化几何与不可达目标在求解内部以回退值吸收。
#[derive(Debug, Error)]
pub enum ArmatureError {
    #[error("unknown or stale bone handle {0:?}")]
    UnknownBone(BoneId),

    #[error("unknown or stale transform node {0:?}")]
    UnknownNode(NodeId),

    #[error("bone tag '{0}' is already registered")]
    DuplicateTag(String),

    #[error("armature already has a root bone {0:?}")]
    RootAlreadyExists(BoneId),

    #[error("reparenting '{child}' under '{parent}' would create a cycle")]
    HierarchyCycle { child: String, parent: String },

    #[error("parenting node {0:?} under one of its dependents would create a cycle")]
    TransformCycle(NodeId),

    #[error("limit cone radius {0} must lie in (0, π)")]
    InvalidConeRadius(f32),

    #[error("limit cone direction must be non-zero and finite")]
    InvalidConeDirection,

    #[error("limit cone index {index} out of range (len {len})")]
    ConeIndexOutOfRange { index: usize, len: usize },

    #[error("bone {0:?} has no orientation constraint")]
    NoConstraint(BoneId),

    #[error("bone {0:?} has no pin")]
    NoPin(BoneId),

    #[error("{name} = {value} is out of range {range}")]
    InvalidParameter {
        name: &'static str,
        value: f32,
        range: &'static str,
    },
}

/// 引擎统一结果类型
pub type Result<T> = std::result::Result<T, ArmatureError>;
