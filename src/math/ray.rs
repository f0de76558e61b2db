//! 射线（两点式直线）求交

use glam::Vec3;

/// 平行判定阈值
const PARALLEL_EPSILON: f32 = 1.0e-9;

/// 由两点定义的射线，求交时按整条直线处理（参数 t 不限范围）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub p1: Vec3,
    pub p2: Vec3,
}

impl Ray {
    #[inline]
    pub fn new(p1: Vec3, p2: Vec3) -> Self {
        Self { p1, p2 }
    }

    /// p1 → p2 方向（未归一化）
    #[inline]
    pub fn heading(&self) -> Vec3 {
        self.p2 - self.p1
    }

    /// p1 + t * heading
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.p1 + self.heading() * t
    }

    /// 与过 `a`、`b`、`c` 三点的平面求交；平行或平面退化时返回 `None`
    pub fn intersect_plane(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<Vec3> {
        let normal = (b - a).cross(c - a);
        let dir = self.heading();
        let denom = normal.dot(dir);
        if denom.abs() <= PARALLEL_EPSILON * normal.length() * dir.length() || denom == 0.0 {
            return None;
        }
        let t = normal.dot(a - self.p1) / denom;
        Some(self.point_at(t))
    }

    /// 与平面求交，同时给出交点在三角形 (a, b, c) 中的重心坐标
    pub fn intersect_plane_barycentric(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<(Vec3, Vec3)> {
        let point = self.intersect_plane(a, b, c)?;
        Some((point, barycentric(a, b, c, point)))
    }

    /// 与球面求交，按 t 从小到大返回两个交点（相切时两点重合）
    pub fn intersect_sphere(&self, center: Vec3, radius: f32) -> Option<(Vec3, Vec3)> {
        let dir = self.heading();
        let a = dir.length_squared();
        if a <= f32::EPSILON {
            return None;
        }
        let offset = self.p1 - center;
        let b = 2.0 * offset.dot(dir);
        let c = offset.length_squared() - radius * radius;
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let t1 = (-b - root) / (2.0 * a);
        let t2 = (-b + root) / (2.0 * a);
        Some((self.point_at(t1), self.point_at(t2)))
    }
}

/// 点 `p`（假设位于三角形平面内）相对三角形 (a, b, c) 的重心坐标
pub fn barycentric(a: Vec3, b: Vec3, c: Vec3, p: Vec3) -> Vec3 {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f32::EPSILON {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Vec3::new(1.0 - v - w, v, w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_intersection() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = ray
            .intersect_plane(Vec3::ZERO, Vec3::X, Vec3::Y)
            .expect("ray crosses the z = 0 plane");
        assert!(hit.length() < 1e-6);

        let parallel = Ray::new(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 1.0));
        assert!(parallel.intersect_plane(Vec3::ZERO, Vec3::X, Vec3::Y).is_none());
    }

    #[test]
    fn test_barycentric_output() {
        let ray = Ray::new(Vec3::new(0.25, 0.25, 1.0), Vec3::new(0.25, 0.25, -1.0));
        let (_, bary) = ray
            .intersect_plane_barycentric(Vec3::ZERO, Vec3::X, Vec3::Y)
            .expect("hit");
        assert!((bary - Vec3::new(0.5, 0.25, 0.25)).length() < 1e-6);
    }

    #[test]
    fn test_sphere_intersection() {
        let ray = Ray::new(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        let (a, b) = ray.intersect_sphere(Vec3::ZERO, 1.0).expect("two hits");
        assert!((a - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-6);
        assert!((b - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);

        let miss = Ray::new(Vec3::new(-2.0, 2.0, 0.0), Vec3::new(2.0, 2.0, 0.0));
        assert!(miss.intersect_sphere(Vec3::ZERO, 1.0).is_none());
    }
}
