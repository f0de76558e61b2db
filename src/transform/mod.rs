//! 变换层级
//!
//! `Basis` 是单个刚体变换，`TransformTree` 在 arena 中维护父子关系
//! 与惰性更新的全局基。骨骼、约束参考系、目标点都是树里的节点。

mod basis;
mod tree;

pub use basis::Basis;
pub use tree::{NodeId, NoopObserver, ParentChangeObserver, TransformNode, TransformTree};
