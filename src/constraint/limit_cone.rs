//! 限制锥
//!
//! 单位球面上的一个球冠（控制点 + 角半径），以及连接到下一个锥的
//! 两个切线圆（"桥"）。所有方向都在约束参考系内表示。

use glam::Vec3;
use std::f32::consts::{FRAC_PI_2, PI};

use crate::math::{axis_angle, orthogonal, Ray, DEGENERATE_EPSILON};
use crate::{ArmatureError, Result};

/// 桥区域查询结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum BridgeHit {
    /// 方向位于桥的允许区域内
    Inside,
    /// 方向落在切线圆内，给出切线圆边界上最近的点
    Boundary(Vec3),
}

#[derive(Clone, Debug)]
pub struct LimitCone {
    control_point: Vec3,
    radius: f32,
    radius_cos: f32,

    /// 到下一个锥的切线圆圆心；center1 位于 A×B 负侧，center2 位于正侧
    tangent_center_next1: Vec3,
    tangent_center_next2: Vec3,
    tangent_radius: f32,
    tangent_radius_cos: f32,
}

impl LimitCone {
    /// 创建限制锥；`direction` 必须非零，`radius` 必须在 (0, π) 内
    pub fn new(direction: Vec3, radius: f32) -> Result<Self> {
        let control_point = validate_direction(direction)?;
        validate_radius(radius)?;
        Ok(Self {
            control_point,
            radius,
            radius_cos: radius.cos(),
            tangent_center_next1: Vec3::ZERO,
            tangent_center_next2: Vec3::ZERO,
            tangent_radius: 0.0,
            tangent_radius_cos: 1.0,
        })
    }

    #[inline]
    pub fn control_point(&self) -> Vec3 {
        self.control_point
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    #[inline]
    pub fn radius_cos(&self) -> f32 {
        self.radius_cos
    }

    /// 与下一个锥之间的两个切线圆圆心
    #[inline]
    pub fn tangent_centers(&self) -> (Vec3, Vec3) {
        (self.tangent_center_next1, self.tangent_center_next2)
    }

    #[inline]
    pub fn tangent_radius(&self) -> f32 {
        self.tangent_radius
    }

    pub(crate) fn set_radius(&mut self, radius: f32) -> Result<()> {
        validate_radius(radius)?;
        self.radius = radius;
        self.radius_cos = radius.cos();
        Ok(())
    }

    pub(crate) fn set_control_point(&mut self, direction: Vec3) -> Result<()> {
        self.control_point = validate_direction(direction)?;
        Ok(())
    }

    /// 方向是否在球冠内（含边界）
    #[inline]
    pub fn contains(&self, direction: Vec3) -> bool {
        direction.dot(self.control_point) >= self.radius_cos
    }

    /// 球冠外的方向返回球冠边界上最近的点；球冠内返回 `None`
    pub fn closest_to_cone(&self, direction: Vec3) -> Option<Vec3> {
        if direction.dot(self.control_point) > self.radius_cos {
            return None;
        }
        let mut axis = self.control_point.cross(direction);
        if axis.length_squared() <= DEGENERATE_EPSILON {
            // 正对反方向：任取一条垂直轴
            axis = orthogonal(self.control_point);
        }
        Some(axis_angle(axis, self.radius) * self.control_point)
    }

    // ========================================
    // 切线桥
    // ========================================

    /// 重新计算与 `next` 之间的切线圆
    pub fn update_tangent_handles(&mut self, next: &LimitCone) {
        let a = self.control_point;
        let b = next.control_point;

        let tangent_radius = ((PI - (self.radius + next.radius)) * 0.5).max(0.0);
        let ra = self.radius + tangent_radius;
        let rb = next.radius + tangent_radius;

        let mut normal = a.cross(b);
        if normal.length_squared() <= DEGENERATE_EPSILON {
            normal = orthogonal(a);
        }
        let normal = normal.normalize();

        // 两个偏移平面：{x · A = cos(ra)}、{x · B = cos(rb)}，各取平面上三点
        let scaled_a = a * ra.cos();
        let dir1_a = axis_angle(normal, ra) * a;
        let dir2_a = axis_angle(a, FRAC_PI_2) * dir1_a;
        let scaled_b = b * rb.cos();
        let dir1_b = axis_angle(normal, rb) * b;
        let dir2_b = axis_angle(b, FRAC_PI_2) * dir1_b;

        let centers = Ray::new(scaled_b, dir1_b)
            .intersect_plane(scaled_a, dir1_a, dir2_a)
            .zip(Ray::new(dir1_b, dir2_b).intersect_plane(scaled_a, dir1_a, dir2_a))
            .and_then(|(i1, i2)| Ray::new(i1, i2).intersect_sphere(Vec3::ZERO, 1.0));

        let (center1, center2) = match centers {
            Some((p, q)) => {
                let (p, q) = (p.normalize_or_zero(), q.normalize_or_zero());
                if p.dot(normal) > 0.0 {
                    (q, p)
                } else {
                    (p, q)
                }
            }
            None => {
                log::debug!("[Kusudama] tangent circle degenerate, using arc normal");
                (-normal, normal)
            }
        };

        self.tangent_center_next1 = center1;
        self.tangent_center_next2 = center2;
        self.tangent_radius = tangent_radius;
        self.tangent_radius_cos = tangent_radius.cos();
    }

    /// 最后一个锥没有后继
    pub(crate) fn clear_tangent_handles(&mut self) {
        self.tangent_center_next1 = Vec3::ZERO;
        self.tangent_center_next2 = Vec3::ZERO;
        self.tangent_radius = 0.0;
        self.tangent_radius_cos = 1.0;
    }

    /// 方向落在本锥与 `next` 之间的大圆切线三角形内时给出桥的判定；否则 `None`
    pub(crate) fn on_great_tangent_triangle(&self, next: &LimitCone, direction: Vec3) -> Option<BridgeHit> {
        let a = self.control_point;
        let b = next.control_point;

        let tangent = if direction.dot(a.cross(b)) < 0.0 {
            let t = self.tangent_center_next1;
            if direction.dot(a.cross(t)) > 0.0 && direction.dot(t.cross(b)) > 0.0 {
                t
            } else {
                return None;
            }
        } else {
            let t = self.tangent_center_next2;
            if direction.dot(t.cross(a)) > 0.0 && direction.dot(b.cross(t)) > 0.0 {
                t
            } else {
                return None;
            }
        };

        if direction.dot(tangent) > self.tangent_radius_cos {
            // 切线圆内部不允许：推到切线圆边界
            let mut axis = tangent.cross(direction);
            if axis.length_squared() <= DEGENERATE_EPSILON {
                axis = orthogonal(tangent);
            }
            Some(BridgeHit::Boundary(axis_angle(axis, self.tangent_radius) * tangent))
        } else {
            Some(BridgeHit::Inside)
        }
    }

    /// 本锥控制点到 `next` 控制点的大圆弧上离 `direction` 最近的点
    pub fn closest_point_on_arc(&self, next: &LimitCone, direction: Vec3) -> Vec3 {
        let a = self.control_point;
        let b = next.control_point;
        let normal = a.cross(b);
        if normal.length_squared() <= DEGENERATE_EPSILON {
            return a;
        }
        let normal = normal.normalize();
        let projected = (direction - normal * direction.dot(normal)).normalize_or_zero();
        if projected == Vec3::ZERO {
            return a;
        }
        if a.cross(projected).dot(normal) >= 0.0 && projected.cross(b).dot(normal) >= 0.0 {
            projected
        } else if direction.dot(a) >= direction.dot(b) {
            a
        } else {
            b
        }
    }
}

fn validate_direction(direction: Vec3) -> Result<Vec3> {
    if !direction.is_finite() || direction.length_squared() <= DEGENERATE_EPSILON {
        return Err(ArmatureError::InvalidConeDirection);
    }
    Ok(direction.normalize())
}

fn validate_radius(radius: f32) -> Result<()> {
    if !(radius > 0.0 && radius < PI) {
        return Err(ArmatureError::InvalidConeRadius(radius));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(LimitCone::new(Vec3::Y, 0.0), Err(ArmatureError::InvalidConeRadius(_))));
        assert!(matches!(LimitCone::new(Vec3::Y, PI), Err(ArmatureError::InvalidConeRadius(_))));
        assert!(matches!(LimitCone::new(Vec3::ZERO, 0.5), Err(ArmatureError::InvalidConeDirection)));
        assert!(LimitCone::new(Vec3::new(0.0, 3.0, 0.0), 0.5).is_ok());
    }

    #[test]
    fn test_closest_to_cone() {
        let cone = LimitCone::new(Vec3::Y, 0.4).expect("cone");
        assert!(cone.closest_to_cone(Vec3::new(0.1, 1.0, 0.0).normalize()).is_none());

        let outside = Vec3::new(1.0, 0.2, 0.0).normalize();
        let clamped = cone.closest_to_cone(outside).expect("outside");
        assert!((clamped.dot(Vec3::Y).acos() - 0.4).abs() < 1e-5);
        // 保持在同一个经线平面
        assert!(clamped.z.abs() < 1e-6 && clamped.x > 0.0);

        // 正对反方向也有定义
        let opposite = cone.closest_to_cone(-Vec3::Y).expect("opposite");
        assert!((opposite.dot(Vec3::Y).acos() - 0.4).abs() < 1e-5);
    }

    #[test]
    fn test_tangent_circles_touch_both_cones() {
        let mut a = LimitCone::new(Vec3::new(1.0, 1.0, 0.0), 0.3).expect("a");
        let b = LimitCone::new(Vec3::new(-1.0, 1.0, 0.0), 0.3).expect("b");
        a.update_tangent_handles(&b);

        let (c1, c2) = a.tangent_centers();
        let t = a.tangent_radius();
        assert!((t - (PI - 0.6) * 0.5).abs() < 1e-6);
        for center in [c1, c2] {
            assert!((center.length() - 1.0).abs() < 1e-4);
            // 切线圆与两个球冠外切
            assert!((center.dot(a.control_point()).acos() - (0.3 + t)).abs() < 1e-3);
            assert!((center.dot(b.control_point()).acos() - (0.3 + t)).abs() < 1e-3);
        }
        let n = a.control_point().cross(b.control_point());
        assert!(c1.dot(n) < 0.0 && c2.dot(n) > 0.0);
    }

    #[test]
    fn test_closest_point_on_arc() {
        let a = LimitCone::new(Vec3::X, 0.2).expect("a");
        let b = LimitCone::new(Vec3::Y, 0.2).expect("b");
        let mid = Vec3::new(1.0, 1.0, 0.5).normalize();
        let on_arc = a.closest_point_on_arc(&b, mid);
        assert!(on_arc.z.abs() < 1e-6);
        assert!((on_arc - Vec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-5);

        // 弧外侧取较近的端点
        assert_eq!(a.closest_point_on_arc(&b, Vec3::new(1.0, -0.5, 0.0).normalize()), Vec3::X);
    }
}
