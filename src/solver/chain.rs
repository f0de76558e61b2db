//! 骨骼链分段
//!
//! 从根骨骼出发，沿唯一的"受影响子骨骼"向下走，遇到被钉住的骨骼或
//! 有多个受影响子骨骼的分叉点就结束当前链，并为每个分支生成子链。
//! 没有任何钉点的分支不会进入链树。
//!
//! 每根链上的骨骼都有一份模拟坐标系（变换树中的临时节点），求解只改动
//! 模拟节点，最后一次性提交回真实骨骼。

use std::collections::HashMap;

use crate::arena::Arena;
use crate::skeleton::{Bone, BoneId};
use crate::transform::{NodeId, TransformTree};

/// 影响某根骨骼的钉点
#[derive(Clone, Debug)]
pub struct Effector {
    pub(crate) bone: BoneId,
    /// 被钉骨骼的模拟坐标系
    pub(crate) sim_axes: NodeId,
    /// 经过中间钉点累积的衰减
    pub(crate) falloff: f32,
}

impl Effector {
    #[inline]
    pub fn bone(&self) -> BoneId {
        self.bone
    }

    #[inline]
    pub fn falloff(&self) -> f32 {
        self.falloff
    }
}

/// 链上单根骨骼的求解工作集
#[derive(Clone, Debug)]
pub struct ShadowBone {
    pub(crate) bone: BoneId,
    pub(crate) sim_axes: NodeId,
    pub(crate) sim_constraint_axes: NodeId,
    pub(crate) effectors: Vec<Effector>,
}

impl ShadowBone {
    #[inline]
    pub fn bone(&self) -> BoneId {
        self.bone
    }

    #[inline]
    pub fn sim_axes(&self) -> NodeId {
        self.sim_axes
    }

    #[inline]
    pub fn effectors(&self) -> &[Effector] {
        &self.effectors
    }
}

/// 链段：`bones` 从链根到链尖排列，`children` 为链尖处的分支
#[derive(Clone, Debug)]
pub struct BoneChain {
    pub(crate) bones: Vec<ShadowBone>,
    pub(crate) children: Vec<BoneChain>,
}

impl BoneChain {
    #[inline]
    pub fn root(&self) -> BoneId {
        self.bones[0].bone
    }

    #[inline]
    pub fn tip(&self) -> BoneId {
        self.bones[self.bones.len() - 1].bone
    }

    #[inline]
    pub fn bones(&self) -> &[ShadowBone] {
        &self.bones
    }

    #[inline]
    pub fn children(&self) -> &[BoneChain] {
        &self.children
    }

    /// 本链是否包含 `bone`，返回其下标
    pub fn position_of(&self, bone: BoneId) -> Option<usize> {
        self.bones.iter().position(|sb| sb.bone == bone)
    }

    /// 在链树中找到包含 `bone` 的链
    pub fn find(&self, bone: BoneId) -> Option<(&BoneChain, usize)> {
        if let Some(index) = self.position_of(bone) {
            return Some((self, index));
        }
        self.children.iter().find_map(|child| child.find(bone))
    }

    /// 链树中的链数
    pub fn chain_count(&self) -> usize {
        1 + self.children.iter().map(BoneChain::chain_count).sum::<usize>()
    }

    /// 先序遍历所有工作骨骼
    pub fn for_each_shadow(&self, f: &mut dyn FnMut(&ShadowBone)) {
        for sb in &self.bones {
            f(sb);
        }
        for child in &self.children {
            child.for_each_shadow(f);
        }
    }

    /// 从 `bones[start..]` 开始，遍历本链及所有子链
    pub(crate) fn for_each_shadow_from(&self, start: usize, f: &mut dyn FnMut(&ShadowBone)) {
        for sb in self.bones.iter().skip(start) {
            f(sb);
        }
        for child in &self.children {
            child.for_each_shadow(f);
        }
    }

    // ========================================
    // 生成与释放
    // ========================================

    /// 从 `root` 生成链树；`root` 下没有任何启用钉点时返回 `None`
    pub(crate) fn generate(
        tree: &mut TransformTree,
        bones: &Arena<Bone>,
        root: BoneId,
        root_frame: NodeId,
    ) -> Option<BoneChain> {
        let mut sims = HashMap::new();
        let mut chain = Self::segment(tree, bones, root, root_frame, &mut sims)?;
        chain.fill_effectors(bones, &sims);
        Some(chain)
    }

    fn segment(
        tree: &mut TransformTree,
        bones: &Arena<Bone>,
        start: BoneId,
        root_frame: NodeId,
        sims: &mut HashMap<BoneId, NodeId>,
    ) -> Option<BoneChain> {
        let first = bones.get(start)?;
        if !first.leads_to_pin() {
            return None;
        }

        let mut shadows = Vec::new();
        let mut current = start;
        loop {
            let Some(bone) = bones.get(current) else {
                break;
            };
            shadows.push(Self::create_shadow(tree, bones, current, bone, root_frame, sims));
            if bone.is_pinned() || bone.effected_children.len() != 1 {
                break;
            }
            current = bone.effected_children[0];
        }

        let tip = shadows.last().map(|sb| sb.bone)?;
        let branches = bones.get(tip).map(|b| b.effected_children.clone()).unwrap_or_default();
        let children = branches
            .into_iter()
            .filter_map(|child| Self::segment(tree, bones, child, root_frame, sims))
            .collect();

        Some(BoneChain {
            bones: shadows,
            children,
        })
    }

    fn create_shadow(
        tree: &mut TransformTree,
        bones: &Arena<Bone>,
        id: BoneId,
        bone: &Bone,
        root_frame: NodeId,
        sims: &mut HashMap<BoneId, NodeId>,
    ) -> ShadowBone {
        // 父骨骼的模拟节点总是先于子骨骼创建；找不到时挂到真实父骨骼上
        let parent_node = match bone.parent {
            Some(parent) => sims
                .get(&parent)
                .copied()
                .or_else(|| bones.get(parent).map(|p| p.local_axes))
                .unwrap_or(root_frame),
            None => root_frame,
        };

        let sim_axes = tree.create_node(tree.local(bone.local_axes), Some(parent_node));
        let sim_constraint_axes = tree.create_node(tree.local(bone.major_rotation_axes), Some(parent_node));
        sims.insert(id, sim_axes);

        ShadowBone {
            bone: id,
            sim_axes,
            sim_constraint_axes,
            effectors: Vec::new(),
        }
    }

    fn fill_effectors(&mut self, bones: &Arena<Bone>, sims: &HashMap<BoneId, NodeId>) {
        for sb in &mut self.bones {
            sb.effectors.clear();
            collect_effectors(bones, sims, sb.bone, 1.0, &mut sb.effectors);
        }
        for child in &mut self.children {
            child.fill_effectors(bones, sims);
        }
    }

    /// 同步模拟节点到真实骨骼的当前局部位姿（父节点先于子节点）
    pub(crate) fn sync_from_bones(&self, tree: &mut TransformTree, bones: &Arena<Bone>) {
        self.for_each_shadow(&mut |sb| {
            if let Some(bone) = bones.get(sb.bone) {
                let local = tree.local(bone.local_axes);
                tree.set_local(sb.sim_axes, local);
                let constraint_local = tree.local(bone.major_rotation_axes);
                tree.set_local(sb.sim_constraint_axes, constraint_local);
            }
        });
    }

    /// 删除全部模拟节点（子节点先于父节点）
    pub(crate) fn release(self, tree: &mut TransformTree) {
        let mut nodes = Vec::new();
        self.for_each_shadow(&mut |sb| {
            nodes.push(sb.sim_axes);
            nodes.push(sb.sim_constraint_axes);
        });
        for node in nodes.into_iter().rev() {
            tree.remove_node(node);
        }
    }
}

/// 收集 `bone` 及其受影响子树中的钉点；经过钉点时乘上其衰减，衰减为 0 即停止
fn collect_effectors(
    bones: &Arena<Bone>,
    sims: &HashMap<BoneId, NodeId>,
    id: BoneId,
    falloff: f32,
    out: &mut Vec<Effector>,
) {
    let Some(bone) = bones.get(id) else {
        return;
    };

    let mut falloff = falloff;
    if let Some(pin) = bone.pin.as_ref().filter(|p| p.is_enabled()) {
        if let Some(&sim_axes) = sims.get(&id) {
            out.push(Effector {
                bone: id,
                sim_axes,
                falloff,
            });
        }
        falloff *= pin.depth_falloff;
        if falloff <= 0.0 {
            return;
        }
    }

    for &child in &bone.effected_children {
        collect_effectors(bones, sims, child, falloff, out);
    }
}
