//! glam 之上的几何辅助
//!
//! 向量/四元数运算本身直接使用 glam；这里只补充求解器需要的
//! 摆动/扭转分解、转角限制、角度折返和射线求交。

mod ray;

pub use ray::{barycentric, Ray};

use glam::{Quat, Vec3};
use std::f32::consts::{PI, TAU};

/// 长度平方低于此值的向量视为零向量
pub const DEGENERATE_EPSILON: f32 = 1.0e-12;

// ============================================================================
// 四元数扩展
// ============================================================================

pub trait QuatExt {
    /// 绕单位轴 `axis` 的摆动/扭转分解，返回 `(swing, twist)`，满足 `self = swing * twist`
    fn swing_twist(self, axis: Vec3) -> (Quat, Quat);
    /// 绕单位轴 `axis` 的有符号扭转角，范围 (-π, π]
    fn twist_angle(self, axis: Vec3) -> f32;
    /// 把转角限制在 `max_angle` 以内，旋转轴不变
    fn clamp_to_angle(self, max_angle: f32) -> Quat;
    /// 转角，范围 [0, π]
    fn rotation_angle(self) -> f32;
}

impl QuatExt for Quat {
    fn swing_twist(self, axis: Vec3) -> (Quat, Quat) {
        let projected = axis * self.xyz().dot(axis);
        let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, self.w);
        // 摆动恰为 180° 时扭转无定义，取单位扭转
        let twist = if twist.length_squared() <= DEGENERATE_EPSILON {
            Quat::IDENTITY
        } else {
            twist.normalize()
        };
        (self * twist.inverse(), twist)
    }

    fn twist_angle(self, axis: Vec3) -> f32 {
        let (_, twist) = self.swing_twist(axis);
        wrap_pi(2.0 * twist.xyz().dot(axis).atan2(twist.w))
    }

    fn clamp_to_angle(self, max_angle: f32) -> Quat {
        let q = if self.w < 0.0 { -self } else { self };
        if max_angle >= PI {
            return q;
        }
        if max_angle <= 0.0 {
            return Quat::IDENTITY;
        }
        let half = 0.5 * max_angle;
        if q.w >= half.cos() {
            return q;
        }
        let axis = q.xyz().normalize_or_zero();
        if axis == Vec3::ZERO {
            return Quat::IDENTITY;
        }
        let v = axis * half.sin();
        Quat::from_xyzw(v.x, v.y, v.z, half.cos())
    }

    #[inline]
    fn rotation_angle(self) -> f32 {
        2.0 * self.w.abs().min(1.0).acos()
    }
}

// ============================================================================
// 退化安全的构造
// ============================================================================

/// 把 `from` 转到 `to` 的最短弧旋转；任一向量为零时返回单位旋转
pub fn shortest_arc(from: Vec3, to: Vec3) -> Quat {
    let a = from.normalize_or_zero();
    let b = to.normalize_or_zero();
    if a == Vec3::ZERO || b == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let dot = a.dot(b);
    if dot < -1.0 + 1.0e-6 {
        return Quat::from_axis_angle(a.any_orthonormal_vector(), PI);
    }
    // 不截断微小转角，求解器收敛末段依赖它
    let c = a.cross(b);
    Quat::from_xyzw(c.x, c.y, c.z, 1.0 + dot).normalize()
}

/// 轴角构造；零轴返回单位旋转
pub fn axis_angle(axis: Vec3, angle: f32) -> Quat {
    let axis = axis.normalize_or_zero();
    if axis == Vec3::ZERO || !angle.is_finite() {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(axis, angle)
}

/// 与 `v` 垂直的单位向量
pub fn orthogonal(v: Vec3) -> Vec3 {
    let n = v.normalize_or_zero();
    if n == Vec3::ZERO {
        return Vec3::X;
    }
    n.any_orthonormal_vector()
}

// ============================================================================
// 角度折返
// ============================================================================

/// 折返到 [0, 2π)
#[inline]
pub fn wrap_tau(angle: f32) -> f32 {
    let r = angle.rem_euclid(TAU);
    if r >= TAU {
        0.0
    } else {
        r
    }
}

/// 折返到 (-π, π]
#[inline]
pub fn wrap_pi(angle: f32) -> f32 {
    let r = wrap_tau(angle);
    if r > PI {
        r - TAU
    } else {
        r
    }
}

/// `a - b` 的最短有符号角差，范围 (-π, π]
#[inline]
pub fn signed_angle_difference(a: f32, b: f32) -> f32 {
    wrap_pi(a - b)
}
