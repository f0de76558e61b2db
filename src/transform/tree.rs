//! 层级变换树
//!
//! 每个节点保存局部基与缓存的全局基：
//! - 修改局部基（或任一祖先）只打脏标记，全局基在读取时惰性重算
//! - 父链接与依赖链接都是世代号句柄，节点删除后句柄自然失效
//! - 父句柄失效时节点按根节点处理，并显式清除该链接

use glam::{Quat, Vec3};

use super::basis::Basis;
use crate::arena::{Arena, Handle};
use crate::{ArmatureError, Result};

/// 变换节点句柄
pub type NodeId = Handle<TransformNode>;

/// 变换节点
#[derive(Clone, Debug)]
pub struct TransformNode {
    local: Basis,
    global: Basis,
    parent: Option<NodeId>,
    /// 依赖本节点的子节点（非拥有）
    dependents: Vec<NodeId>,
    dirty: bool,
}

impl TransformNode {
    #[inline]
    pub fn local(&self) -> &Basis {
        &self.local
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[inline]
    pub fn dependents(&self) -> &[NodeId] {
        &self.dependents
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// 换父通知钩子
///
/// `set_parent_observed` 在改动前调用 `parent_change_warning`，
/// 改动完成后调用 `parent_change_completion_notice`。
pub trait ParentChangeObserver {
    fn parent_change_warning(&mut self, _node: NodeId, _old: Option<NodeId>, _new: Option<NodeId>) {}
    fn parent_change_completion_notice(&mut self, _node: NodeId) {}
}

/// 不关心换父事件时使用
pub struct NoopObserver;

impl ParentChangeObserver for NoopObserver {}

/// 变换树（节点存储 + 惰性全局基）
#[derive(Default)]
pub struct TransformTree {
    nodes: Arena<TransformNode>,
    /// mark_dirty / update_global 复用的栈，避免每次调用分配
    dirty_stack: Vec<NodeId>,
    update_stack: Vec<NodeId>,
}

impl TransformTree {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================
    // 节点生命周期
    // ========================================

    /// 创建节点；`local` 相对 `parent`，父句柄失效时作为根节点创建
    pub fn create_node(&mut self, local: Basis, parent: Option<NodeId>) -> NodeId {
        let parent = parent.filter(|p| self.nodes.contains(*p));
        let id = self.nodes.insert(TransformNode {
            local,
            global: local,
            parent,
            dependents: Vec::new(),
            dirty: true,
        });
        if let Some(p) = parent {
            if let Some(parent_node) = self.nodes.get_mut(p) {
                parent_node.dependents.push(id);
            }
        }
        id
    }

    /// 删除节点；仍存活的依赖节点先解除父链接（保持全局位姿）
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let dependents = node.dependents.clone();
        for dependent in dependents {
            if self.nodes.contains(dependent) {
                self.emancipate(dependent);
            }
        }
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.dependents.retain(|d| *d != id);
            }
        }
        self.nodes.remove(id).is_some()
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&TransformNode> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 有效父节点；失效的父句柄视为无父
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .get(id)
            .and_then(|n| n.parent)
            .filter(|p| self.nodes.contains(*p))
    }

    /// 局部基；失效句柄返回单位基
    pub fn local(&self, id: NodeId) -> Basis {
        self.nodes.get(id).map(|n| n.local).unwrap_or_default()
    }

    // ========================================
    // 换父
    // ========================================

    /// 换父并保持全局位姿不变
    pub fn set_parent(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<()> {
        self.set_parent_observed(id, new_parent, &mut NoopObserver)
    }

    /// 换父并触发通知钩子
    pub fn set_parent_observed(
        &mut self,
        id: NodeId,
        new_parent: Option<NodeId>,
        observer: &mut dyn ParentChangeObserver,
    ) -> Result<()> {
        if !self.nodes.contains(id) {
            return Err(ArmatureError::UnknownNode(id));
        }
        if let Some(p) = new_parent {
            if !self.nodes.contains(p) {
                return Err(ArmatureError::UnknownNode(p));
            }
            if self.is_self_or_ancestor(id, p) {
                return Err(ArmatureError::TransformCycle(id));
            }
        }
        let old_parent = self.parent_of(id);
        if old_parent == new_parent {
            return Ok(());
        }

        observer.parent_change_warning(id, old_parent, new_parent);

        let global = self.global(id);
        let new_local = match new_parent {
            Some(p) => self.global(p).inverse().compose(&global),
            None => global,
        };

        if let Some(old) = old_parent {
            if let Some(old_node) = self.nodes.get_mut(old) {
                old_node.dependents.retain(|d| *d != id);
            }
        }
        if let Some(p) = new_parent {
            if let Some(parent_node) = self.nodes.get_mut(p) {
                parent_node.dependents.push(id);
            }
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent;
            node.local = new_local;
        }
        self.mark_dirty(id);

        observer.parent_change_completion_notice(id);
        Ok(())
    }

    /// 把当前全局位姿烘焙到局部基，并断开父链接
    pub fn emancipate(&mut self, id: NodeId) {
        if !self.nodes.contains(id) {
            return;
        }
        let global = self.global(id);
        if let Some(parent) = self.parent_of(id) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.dependents.retain(|d| *d != id);
            }
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = None;
            node.local = global;
        }
        self.mark_dirty(id);
    }

    /// `ancestor` 是否为 `id` 自身或其祖先
    fn is_self_or_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }

    // ========================================
    // 局部基修改
    // ========================================

    pub fn set_local(&mut self, id: NodeId, basis: Basis) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.local = basis;
            self.mark_dirty(id);
        }
    }

    pub fn set_local_rotation(&mut self, id: NodeId, rotation: Quat) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.local.set_rotation(rotation);
            self.mark_dirty(id);
        }
    }

    pub fn set_local_translation(&mut self, id: NodeId, translation: Vec3) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.local.translation = translation;
            self.mark_dirty(id);
        }
    }

    /// 绕自身原点施加全局坐标系下的旋转：`global' = q * global`
    pub fn rotate_by(&mut self, id: NodeId, q: Quat) {
        let parent_rotation = match self.parent_of(id) {
            Some(p) => self.global(p).rotation(),
            None => Quat::IDENTITY,
        };
        if let Some(node) = self.nodes.get_mut(id) {
            let local_q = parent_rotation.inverse() * q * parent_rotation;
            node.local.rotate_by(local_q);
            self.mark_dirty(id);
        }
    }

    /// 绕自身坐标轴旋转：`local' = local * q`
    pub fn rotate_local(&mut self, id: NodeId, q: Quat) {
        if let Some(node) = self.nodes.get_mut(id) {
            let rotation = node.local.rotation() * q;
            node.local.set_rotation(rotation);
            self.mark_dirty(id);
        }
    }

    /// 按全局坐标系下的向量平移（先经父节点逆旋转换到父空间）
    pub fn translate_by(&mut self, id: NodeId, global_offset: Vec3) {
        let parent_inverse = match self.parent_of(id) {
            Some(p) => self.global(p).inverse_rotation(),
            None => Quat::IDENTITY,
        };
        if let Some(node) = self.nodes.get_mut(id) {
            node.local.translation += parent_inverse * global_offset;
            self.mark_dirty(id);
        }
    }

    /// 平移到全局位置
    pub fn translate_to(&mut self, id: NodeId, global_position: Vec3) {
        let local_position = match self.parent_of(id) {
            Some(p) => self.global(p).local_of_point(global_position),
            None => global_position,
        };
        self.set_local_translation(id, local_position);
    }

    /// 直接设置全局位姿
    pub fn set_global(&mut self, id: NodeId, basis: Basis) {
        let local = match self.parent_of(id) {
            Some(p) => self.global(p).inverse().compose(&basis),
            None => basis,
        };
        self.set_local(id, local);
    }

    // ========================================
    // 脏标记与全局基
    // ========================================

    /// 标记自身及所有依赖为脏；已脏的节点不再向下传播，同时清理失效依赖
    pub fn mark_dirty(&mut self, id: NodeId) {
        // 脏节点的依赖必然也是脏的
        if self.nodes.get(id).map_or(true, |n| n.dirty) {
            return;
        }
        let mut stack = std::mem::take(&mut self.dirty_stack);
        stack.clear();
        stack.push(id);

        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current) else {
                continue;
            };
            if node.dirty {
                continue;
            }
            node.dirty = true;
            let mut dependents = std::mem::take(&mut node.dependents);
            dependents.retain(|d| self.nodes.contains(*d));
            stack.extend_from_slice(&dependents);
            if let Some(node) = self.nodes.get_mut(current) {
                node.dependents = dependents;
            }
        }

        self.dirty_stack = stack;
    }

    /// 惰性重算全局基：先解决所有脏祖先；节点干净时 O(1)
    pub fn update_global(&mut self, id: NodeId) {
        let mut chain = std::mem::take(&mut self.update_stack);
        chain.clear();

        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(current) else {
                break;
            };
            if !node.dirty {
                break;
            }
            chain.push(current);
            cursor = node.parent;
        }

        for &current in chain.iter().rev() {
            let parent = self.nodes.get(current).and_then(|n| n.parent);
            let parent_global = parent.and_then(|p| self.nodes.get(p)).map(|p| p.global);
            if let Some(node) = self.nodes.get_mut(current) {
                node.global = match parent_global {
                    Some(pg) => pg.compose(&node.local),
                    None => {
                        // 父句柄已失效：按根节点处理并清除链接
                        node.parent = None;
                        node.local
                    }
                };
                node.dirty = false;
            }
        }

        self.update_stack = chain;
    }

    /// 全局基；失效句柄返回单位基
    pub fn global(&mut self, id: NodeId) -> Basis {
        self.update_global(id);
        self.nodes.get(id).map(|n| n.global).unwrap_or_default()
    }

    pub fn try_global(&mut self, id: NodeId) -> Option<Basis> {
        self.update_global(id);
        self.nodes.get(id).map(|n| n.global)
    }

    #[inline]
    pub fn global_rotation(&mut self, id: NodeId) -> Quat {
        self.global(id).rotation()
    }

    #[inline]
    pub fn origin(&mut self, id: NodeId) -> Vec3 {
        self.global(id).translation
    }

    /// 全局点 → 节点局部坐标
    pub fn local_of(&mut self, id: NodeId, global_point: Vec3) -> Vec3 {
        self.global(id).local_of_point(global_point)
    }

    /// 节点局部坐标 → 全局点
    pub fn global_of(&mut self, id: NodeId, local_point: Vec3) -> Vec3 {
        self.global(id).global_of_point(local_point)
    }

    pub fn local_of_direction(&mut self, id: NodeId, global_dir: Vec3) -> Vec3 {
        self.global(id).local_of_direction(global_dir)
    }

    pub fn global_of_direction(&mut self, id: NodeId, local_dir: Vec3) -> Vec3 {
        self.global(id).global_of_direction(local_dir)
    }
}
