//! 刚体基（平移 + 旋转 + 缓存的逆旋转）

use glam::{Mat4, Quat, Vec3};

/// 刚体变换：`p_global = rotation * p_local + translation`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Basis {
    pub translation: Vec3,
    rotation: Quat,
    inverse_rotation: Quat,
}

impl Default for Basis {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Basis {
    pub const IDENTITY: Basis = Basis {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        inverse_rotation: Quat::IDENTITY,
    };

    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        let rotation = rotation.normalize();
        Self {
            translation,
            rotation,
            inverse_rotation: rotation.inverse(),
        }
    }

    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    #[inline]
    pub fn from_rotation(rotation: Quat) -> Self {
        Self::new(Vec3::ZERO, rotation)
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn inverse_rotation(&self) -> Quat {
        self.inverse_rotation
    }

    /// 设置旋转并同步逆旋转
    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation.normalize();
        self.inverse_rotation = self.rotation.inverse();
    }

    /// 在当前旋转之前施加 `q`（q 与本基同处父坐标系）
    #[inline]
    pub fn rotate_by(&mut self, q: Quat) {
        self.set_rotation(q * self.rotation);
    }

    /// `self ∘ local`：先应用 `local`，再应用 `self`
    pub fn compose(&self, local: &Basis) -> Basis {
        Basis::new(
            self.translation + self.rotation * local.translation,
            self.rotation * local.rotation,
        )
    }

    pub fn inverse(&self) -> Basis {
        Basis {
            translation: -(self.inverse_rotation * self.translation),
            rotation: self.inverse_rotation,
            inverse_rotation: self.rotation,
        }
    }

    // ========================================
    // 点 / 方向变换
    // ========================================

    #[inline]
    pub fn global_of_point(&self, local: Vec3) -> Vec3 {
        self.rotation * local + self.translation
    }

    #[inline]
    pub fn local_of_point(&self, global: Vec3) -> Vec3 {
        self.inverse_rotation * (global - self.translation)
    }

    #[inline]
    pub fn global_of_direction(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    #[inline]
    pub fn local_of_direction(&self, global: Vec3) -> Vec3 {
        self.inverse_rotation * global
    }

    #[inline]
    pub fn x_heading(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    #[inline]
    pub fn y_heading(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    #[inline]
    pub fn z_heading(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// 两个基的位置与朝向是否在容差内相同
    pub fn approx_eq(&self, other: &Basis, tolerance: f32) -> bool {
        (self.translation - other.translation).length() <= tolerance
            && self.rotation.dot(other.rotation).abs() >= 1.0 - tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_inverse() {
        let a = Basis::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.7));
        let b = Basis::new(Vec3::new(-0.5, 0.0, 2.0), Quat::from_rotation_x(-1.2));
        let ab = a.compose(&b);
        let back = a.inverse().compose(&ab);
        assert!(back.approx_eq(&b, 1e-5));

        let p = Vec3::new(0.3, -0.2, 0.9);
        assert!((ab.local_of_point(ab.global_of_point(p)) - p).length() < 1e-5);
    }
}
