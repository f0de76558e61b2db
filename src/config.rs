//! IK 求解配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 每个 `Armature` 创建时拷贝一份当前配置，之后可按骨架单独调整。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 求解配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct SolverConfig {
    // ========== 迭代 ==========
    /// 每次 solve 的外层迭代次数，默认 30
    pub default_iterations: usize,
    /// 每根骨骼每次迭代的最大转角（弧度），默认 0.2
    /// 骨骼的 stiffness 会按 (1 - stiffness) 缩放此值
    pub default_dampening: f32,
    /// 稳定化附加次数，默认 0（关闭）
    /// 大于 0 时每根骨骼最多重试这么多次，只保留不变差的结果
    pub default_stabilization_passes: usize,

    // ========== QCP ==========
    /// 最大特征值牛顿迭代上限，默认 30
    pub qcp_max_iterations: usize,
    /// 牛顿迭代相对收敛阈值，默认 1e-11
    pub qcp_eval_precision: f64,

    // ========== 根骨骼 ==========
    /// 根骨骼未钉住时是否允许整体平移，默认 false
    /// 开启后不可达目标会把整条骨架拖过去
    pub translate_unpinned_root: bool,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            // ====== 迭代 ======
            // 越大越容易收敛，CPU 消耗线性增长
            // 建议范围: 10~50
            default_iterations: 30,

            // 约 11.5°，所有骨骼（含根骨骼）都受此限制
            default_dampening: 0.2,

            default_stabilization_passes: 0,

            // ====== QCP ======
            qcp_max_iterations: 30,
            qcp_eval_precision: 1.0e-11,

            // ====== 根骨骼 ======
            translate_unpinned_root: false,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

/// 全局配置实例
static SOLVER_CONFIG: Lazy<RwLock<SolverConfig>> = Lazy::new(|| {
    RwLock::new(SolverConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> SolverConfig {
    SOLVER_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: SolverConfig) {
    *SOLVER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *SOLVER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = SolverConfig::default();
}
