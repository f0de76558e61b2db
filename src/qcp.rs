//! QCP 加权点集叠合
//!
//! 求使 Σ wᵢ·|R·mᵢ (+ t) − tᵢ|² 最小的旋转 R（可选平移 t）。
//! 做法是 Horn 四元数法的特征多项式形式：
//! 1. 由协方差矩阵 S 构造对称 4x4 矩阵 N，其最大特征值 λ 对应最优旋转
//! 2. 从上界 E0 = (G1 + G2) / 2 出发，对特征多项式做牛顿迭代求 λ
//! 3. 取 (N − λI) 的伴随矩阵某一行作为特征向量，即四元数
//!
//! 内部全部使用 f64，调用方的 f32 数据只在入口和出口转换。

use glam::{DVec3, Quat, Vec3};

use crate::config::get_config;

/// 伴随矩阵行的模方低于 `SELECT_EPSILON * e0⁶` 时换下一行
const SELECT_EPSILON: f64 = 1.0e-6;
/// 所有行都低于 `DEGENERATE_EPSILON * e0⁶` 时返回单位旋转
const DEGENERATE_EPSILON: f64 = 1.0e-12;

/// QCP 求解器
///
/// 除最近一次结果外不保存状态；固定大小的数组在栈上完成全部计算。
#[derive(Debug, Clone)]
pub struct Qcp {
    eval_precision: f64,
    max_iterations: usize,
    rmsd: f64,
    translation: Vec3,
}

impl Default for Qcp {
    fn default() -> Self {
        let config = get_config();
        Self::new(config.qcp_eval_precision, config.qcp_max_iterations)
    }
}

impl Qcp {
    /// 创建求解器
    pub fn new(eval_precision: f64, max_iterations: usize) -> Self {
        Self {
            eval_precision: eval_precision.abs(),
            max_iterations: max_iterations.max(1),
            rmsd: 0.0,
            translation: Vec3::ZERO,
        }
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations.max(1);
    }

    pub fn set_precision(&mut self, eval_precision: f64) {
        self.eval_precision = eval_precision.abs();
    }

    /// 最近一次叠合的平移（`translate == false` 时为零）
    #[inline]
    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    /// 最近一次叠合的加权 RMSD
    #[inline]
    pub fn rmsd(&self) -> f64 {
        self.rmsd
    }

    /// 计算把 `mobile` 旋到 `target` 的最优旋转
    ///
    /// - `weights` 为空时等权；长度不足的部分按权重 1 处理，负权重按 0 处理
    /// - `translate` 为 true 时先各自减去加权质心，平移结果由 `translation()` 给出
    /// - 点数少于 2、总权重为 0 或数据全部重合时返回单位旋转
    pub fn weighted_superpose(
        &mut self,
        mobile: &[Vec3],
        target: &[Vec3],
        weights: &[f32],
        translate: bool,
    ) -> Quat {
        self.rmsd = 0.0;
        self.translation = Vec3::ZERO;

        let n = mobile.len().min(target.len());
        let weight_at = |i: usize| -> f64 {
            if weights.is_empty() {
                1.0
            } else {
                weights.get(i).copied().unwrap_or(1.0).max(0.0) as f64
            }
        };

        let total_weight: f64 = (0..n).map(weight_at).sum();
        if n < 2 || total_weight <= 0.0 || !total_weight.is_finite() {
            return Quat::IDENTITY;
        }

        // ========== 质心 ==========
        let (mobile_center, target_center) = if translate {
            let mut mc = DVec3::ZERO;
            let mut tc = DVec3::ZERO;
            for i in 0..n {
                let w = weight_at(i);
                mc += mobile[i].as_dvec3() * w;
                tc += target[i].as_dvec3() * w;
            }
            (mc / total_weight, tc / total_weight)
        } else {
            (DVec3::ZERO, DVec3::ZERO)
        };

        // ========== 内积矩阵 ==========
        let mut s = [[0.0f64; 3]; 3];
        let mut g1 = 0.0;
        let mut g2 = 0.0;
        for i in 0..n {
            let w = weight_at(i);
            let m = mobile[i].as_dvec3() - mobile_center;
            let t = target[i].as_dvec3() - target_center;
            g1 += w * m.length_squared();
            g2 += w * t.length_squared();
            let m = m.to_array();
            let t = t.to_array();
            for a in 0..3 {
                for b in 0..3 {
                    s[a][b] += w * m[a] * t[b];
                }
            }
        }

        let e0 = 0.5 * (g1 + g2);
        if e0 <= 0.0 || !e0.is_finite() {
            return Quat::IDENTITY;
        }

        let rotation = self.rotation_from_inner_product(&s, e0, total_weight);

        if translate {
            let r = rotation.as_dquat();
            self.translation = (target_center - r * mobile_center).as_vec3();
        }
        rotation
    }

    fn rotation_from_inner_product(&mut self, s: &[[f64; 3]; 3], e0: f64, total_weight: f64) -> Quat {
        let [[sxx, sxy, sxz], [syx, syy, syz], [szx, szy, szz]] = *s;

        let n = [
            [sxx + syy + szz, syz - szy, szx - sxz, sxy - syx],
            [syz - szy, sxx - syy - szz, sxy + syx, szx + sxz],
            [szx - sxz, sxy + syx, -sxx + syy - szz, syz + szy],
            [sxy - syx, szx + sxz, syz + szy, -sxx - syy + szz],
        ];

        // ========== 特征多项式系数 ==========
        let c2 = -2.0 * s.iter().flatten().map(|v| v * v).sum::<f64>();
        let c1 = -8.0 * det3(s);
        let c0 = det4(&n);

        // ========== 牛顿迭代求最大特征值 ==========
        let mut lambda = e0;
        for _ in 0..self.max_iterations {
            let previous = lambda;
            let l2 = lambda * lambda;
            let p = (l2 + c2) * l2 + c1 * lambda + c0;
            let dp = 4.0 * l2 * lambda + 2.0 * c2 * lambda + c1;
            if dp == 0.0 {
                break;
            }
            lambda -= p / dp;
            if (lambda - previous).abs() < (self.eval_precision * lambda).abs() {
                break;
            }
        }

        self.rmsd = (2.0 * (e0 - lambda) / total_weight).abs().sqrt();

        // ========== 特征向量 ==========
        let mut a = n;
        for (i, row) in a.iter_mut().enumerate() {
            row[i] -= lambda;
        }

        let e6 = e0.powi(6);
        let mut best = [0.0f64; 4];
        let mut best_norm = -1.0;
        for r in 0..4 {
            let q = adjugate_row(&a, r);
            let norm = q.iter().map(|v| v * v).sum::<f64>();
            if norm > SELECT_EPSILON * e6 {
                best = q;
                best_norm = norm;
                break;
            }
            if norm > best_norm {
                best = q;
                best_norm = norm;
            }
        }

        if best_norm <= DEGENERATE_EPSILON * e6 || !best_norm.is_finite() {
            return Quat::IDENTITY;
        }

        let inv = 1.0 / best_norm.sqrt();
        let (mut w, mut x, mut y, mut z) = (best[0] * inv, best[1] * inv, best[2] * inv, best[3] * inv);
        if w < 0.0 {
            w = -w;
            x = -x;
            y = -y;
            z = -z;
        }
        Quat::from_xyzw(x as f32, y as f32, z as f32, w as f32).normalize()
    }
}

// ============================================================================
// 行列式
// ============================================================================

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]) - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn minor(a: &[[f64; 4]; 4], skip_row: usize, skip_col: usize) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    let mut oi = 0;
    for (i, row) in a.iter().enumerate() {
        if i == skip_row {
            continue;
        }
        let mut oj = 0;
        for (j, v) in row.iter().enumerate() {
            if j == skip_col {
                continue;
            }
            out[oi][oj] = *v;
            oj += 1;
        }
        oi += 1;
    }
    out
}

fn det4(a: &[[f64; 4]; 4]) -> f64 {
    (0..4)
        .map(|c| {
            let sign = if c % 2 == 0 { 1.0 } else { -1.0 };
            sign * a[0][c] * det3(&minor(a, 0, c))
        })
        .sum()
}

/// 伴随矩阵第 `r` 行（对称矩阵下与余子式第 r 行一致）
fn adjugate_row(a: &[[f64; 4]; 4], r: usize) -> [f64; 4] {
    let mut out = [0.0; 4];
    for (c, v) in out.iter_mut().enumerate() {
        let sign = if (r + c) % 2 == 0 { 1.0 } else { -1.0 };
        *v = sign * det3(&minor(a, r, c));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> Vec<Vec3> {
        vec![
            Vec3::new(1.0, 0.2, -0.5),
            Vec3::new(-0.3, 1.4, 0.8),
            Vec3::new(0.6, -1.1, 1.9),
            Vec3::new(-1.7, 0.4, -0.2),
            Vec3::new(0.9, 0.9, 0.9),
        ]
    }

    #[test]
    fn test_recovers_exact_rotation() {
        let rotations = [
            Quat::from_axis_angle(Vec3::new(1.0, 2.0, -0.5).normalize(), 0.8),
            Quat::from_axis_angle(Vec3::new(-0.3, 0.1, 1.0).normalize(), 2.9),
            Quat::from_rotation_y(-1.5),
        ];
        let mobile = sample_points();
        let mut qcp = Qcp::new(1e-11, 30);
        for r in rotations {
            let target: Vec<Vec3> = mobile.iter().map(|p| r * *p).collect();
            let q = qcp.weighted_superpose(&mobile, &target, &[], false);
            assert!(q.dot(r).abs() > 1.0 - 1e-5, "{q:?} vs {r:?}");
            assert!(q.w >= 0.0);
            assert!(qcp.rmsd() < 1e-3);
        }
    }

    #[test]
    fn test_translation() {
        let r = Quat::from_rotation_z(1.0);
        let offset = Vec3::new(1.0, 2.0, 3.0);
        let mobile = vec![Vec3::X, Vec3::Y, Vec3::Z, Vec3::ONE];
        let target: Vec<Vec3> = mobile.iter().map(|p| r * *p + offset).collect();

        let mut qcp = Qcp::new(1e-11, 30);
        let q = qcp.weighted_superpose(&mobile, &target, &[1.0, 2.0, 1.0, 1.0], true);
        assert!(q.dot(r).abs() > 1.0 - 1e-5);
        assert!((qcp.translation() - offset).length() < 1e-4);
    }

    #[test]
    fn test_weights_bias_fit() {
        // 两组相互矛盾的对应，权重大的一方主导
        let mobile = vec![Vec3::X, Vec3::Y, Vec3::X, Vec3::Y];
        let r_a = Quat::from_rotation_z(0.6);
        let r_b = Quat::from_rotation_z(-0.6);
        let target = vec![r_a * Vec3::X, r_a * Vec3::Y, r_b * Vec3::X, r_b * Vec3::Y];
        let mut qcp = Qcp::new(1e-11, 30);
        let q = qcp.weighted_superpose(&mobile, &target, &[10.0, 10.0, 1.0, 1.0], false);
        assert!(q.twist_angle_z() > 0.3);
    }

    #[test]
    fn test_degenerate_inputs() {
        let mut qcp = Qcp::new(1e-11, 30);
        assert_eq!(qcp.weighted_superpose(&[Vec3::X], &[Vec3::Y], &[], false), Quat::IDENTITY);
        assert_eq!(qcp.weighted_superpose(&[], &[], &[], true), Quat::IDENTITY);
        assert_eq!(
            qcp.weighted_superpose(&[Vec3::X, Vec3::Y], &[Vec3::Y, Vec3::X], &[0.0, 0.0], false),
            Quat::IDENTITY
        );
        assert_eq!(
            qcp.weighted_superpose(&[Vec3::ZERO, Vec3::ZERO], &[Vec3::ZERO, Vec3::ZERO], &[], false),
            Quat::IDENTITY
        );
        assert_eq!(qcp.translation(), Vec3::ZERO);
    }

    #[test]
    fn test_two_point_quarter_turn() {
        // 两个正交点对应绕 Z 的 90°
        let mobile = [Vec3::X, Vec3::Y];
        let target = [Vec3::Y, -Vec3::X];
        let mut qcp = Qcp::new(1e-11, 30);
        let q = qcp.weighted_superpose(&mobile, &target, &[], false);
        assert!(((q * Vec3::X) - Vec3::Y).length() < 1e-4);
        assert!(((q * Vec3::Y) + Vec3::X).length() < 1e-4);
    }

    trait ZAngle {
        fn twist_angle_z(self) -> f32;
    }

    impl ZAngle for Quat {
        fn twist_angle_z(self) -> f32 {
            let v = self * Vec3::X;
            v.y.atan2(v.x)
        }
    }
}
