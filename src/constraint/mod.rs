//! 朝向约束
//!
//! - `LimitCone`: 单个限制锥及其到下一个锥的切线桥
//! - `Kusudama`: 限制锥序列 + 轴向扭转范围

mod kusudama;
mod limit_cone;

pub use kusudama::Kusudama;
pub use limit_cone::LimitCone;
