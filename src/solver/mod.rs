//! 求解器
//!
//! - `chain`: 按钉点把骨骼树切成链段，并维护每根骨骼的模拟坐标系
//! - `ik_solver`: 在链树上做迭代求解

mod chain;
mod ik_solver;

pub use chain::{BoneChain, Effector, ShadowBone};
pub(crate) use ik_solver::{active_bones, HeadingBuffers, IkSolver, SolveParams};
