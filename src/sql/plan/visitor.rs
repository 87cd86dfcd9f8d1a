use std::sync::Arc;

use crate::error::Result;

#[macro_export]
macro_rules! apply_each {
    ($f:expr; $ARRAY:expr) => {{
        let mut action: VisitRecursion = VisitRecursion::Continue;
        for it in $ARRAY.iter() {
            action = $f(it)?;
            match action {
                VisitRecursion::Continue | VisitRecursion::Jump => {}
                VisitRecursion::Stop => return Ok(VisitRecursion::Stop),
            }
        }
        Ok::<VisitRecursion, $crate::error::Error>(action)
    }};
    ($f:expr, $($x:expr),+ $(,)?) => {{
        let items = vec![$($x),+];
        let mut action: VisitRecursion = VisitRecursion::Continue;
        for it in items.iter() {
            action = $f(it)?;
            match action {
                VisitRecursion::Continue | VisitRecursion::Jump => {}
                VisitRecursion::Stop => return Ok(VisitRecursion::Stop),
            }
        }
        Ok::<VisitRecursion, $crate::error::Error>(action)
    }};
}

/// Apply `f` to a fixed list of owned children, collecting them into a
/// `Transformed<Vec<_>>`. Once a child reports `Stop` the remaining children
/// are kept as they are.
#[macro_export]
macro_rules! map_each_children {
    ($f:expr, $($x:expr),+ $(,)?) => {{
        $crate::sql::plan::visitor::map_until_stop(vec![$($x),+], $f)
    }};
}

/// Apply `f` to each item until one of them reports `Stop`.
pub fn map_until_stop<N, F>(items: Vec<N>, mut f: F) -> Result<Transformed<Vec<N>>>
where
    F: FnMut(N) -> Result<Transformed<N>>,
{
    let mut tnr = VisitRecursion::Continue;
    let mut transformed = false;
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        if let VisitRecursion::Stop = tnr {
            out.push(it);
            continue;
        }
        let t = f(it)?;
        tnr = t.tnr;
        transformed |= t.transformed;
        out.push(t.data);
    }
    Ok(Transformed::new(out, transformed, tnr))
}

pub trait TreeNode: Sized {
    /// Visit the tree node with a [`TreeNodeVisitor`], performing a
    /// depth-first walk of the node and its children.
    ///
    /// [`TreeNodeVisitor::f_down()`] is called in top-down order (pre-order,
    /// or, before children are visited), [`TreeNodeVisitor::f_up()`] is
    /// called in bottom-up order (post-order, or, after children are visited).
    fn visit<V>(&self, visitor: &mut V) -> Result<VisitRecursion>
    where
        V: for<'n> TreeNodeVisitor<'n, Node = Self>,
    {
        visitor
            .f_down(self)?
            .when_children(|| self.visit_children(|c| c.visit(visitor)))?
            .when_parent(|| visitor.f_up(self))
    }

    /// Call `f` on the node before its children, depth first.
    fn walk<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        fn walk_impl<N: TreeNode, F>(node: &N, f: &mut F) -> Result<VisitRecursion>
        where
            F: FnMut(&N) -> Result<VisitRecursion>,
        {
            f(node)?.when_children(|| node.visit_children(|c| walk_impl(c, f)))
        }

        walk_impl(self, &mut f)
    }

    /// Rewrite the tree in pre-order. Returning `Jump` from `f` keeps the
    /// children of that node untouched, `Stop` ends the whole rewrite.
    fn transform_down<F>(self, mut f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        fn transform_down_impl<N: TreeNode, F>(node: N, f: &mut F) -> Result<Transformed<N>>
        where
            F: FnMut(N) -> Result<Transformed<N>>,
        {
            let t = f(node)?;
            match t.tnr {
                VisitRecursion::Continue => {
                    let transformed = t.transformed;
                    let mut children = t.data.map_children(|c| transform_down_impl(c, f))?;
                    children.transformed |= transformed;
                    Ok(children)
                }
                VisitRecursion::Jump => {
                    Ok(Transformed::new(t.data, t.transformed, VisitRecursion::Continue))
                }
                VisitRecursion::Stop => Ok(t),
            }
        }

        transform_down_impl(self, &mut f)
    }

    /// Rewrite the tree in post-order.
    fn transform_up<F>(self, mut f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        fn transform_up_impl<N: TreeNode, F>(node: N, f: &mut F) -> Result<Transformed<N>>
        where
            F: FnMut(N) -> Result<Transformed<N>>,
        {
            let children = node.map_children(|c| transform_up_impl(c, f))?;
            match children.tnr {
                VisitRecursion::Continue | VisitRecursion::Jump => {
                    let transformed = children.transformed;
                    let mut t = f(children.data)?;
                    t.transformed |= transformed;
                    Ok(t)
                }
                VisitRecursion::Stop => Ok(children),
            }
        }

        transform_up_impl(self, &mut f)
    }

    fn visit_children<F>(&self, f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>;

    /// Rebuild the node from its children mapped through `f`.
    fn map_children<F>(self, f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>;
}

pub trait TreeNodeVisitor<'n> {
    type Node: TreeNode;

    fn f_down(&mut self, _node: &'n Self::Node) -> Result<VisitRecursion> {
        Ok(VisitRecursion::Continue)
    }

    fn f_up(&mut self, _node: &'n Self::Node) -> Result<VisitRecursion> {
        Ok(VisitRecursion::Continue)
    }
}

/// VisitRecursion is used to drive the traversal control flow, i.e.,
/// Each actual visit function/closure would return [`VisitRecursion`]
/// to the traversal controller, e.g., [`TreeNode::visit`], to have it
/// to decide the next nodes to traverse.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum VisitRecursion {
    /// Continue recursion with the next node.
    Continue,
    /// In top-down traversals, skip recursing into children but continue with
    /// the next node, which actually means pruning of the subtree.
    ///
    /// In combined traversals, if it is the `f_down` (pre-order) phase, execution
    /// "jumps" to the next `f_up` (post-order) phase by shortcutting its children.
    Jump,
    /// Stop recursion.
    Stop,
}

impl VisitRecursion {
    /// Decide whether the children of the node that produced this state are
    /// visited.
    pub fn when_children<F>(self, f: F) -> Result<VisitRecursion>
    where
        F: FnOnce() -> Result<VisitRecursion>,
    {
        match self {
            VisitRecursion::Continue => f(),
            VisitRecursion::Jump => Ok(VisitRecursion::Continue),
            VisitRecursion::Stop => Ok(self),
        }
    }

    /// Decide whether the next sibling is visited.
    pub fn when_sibling<F>(self, f: F) -> Result<VisitRecursion>
    where
        F: FnOnce() -> Result<VisitRecursion>,
    {
        match self {
            VisitRecursion::Continue | VisitRecursion::Jump => f(),
            VisitRecursion::Stop => Ok(self),
        }
    }

    /// Decide whether the parent's post-order hook runs.
    pub fn when_parent<F>(self, f: F) -> Result<VisitRecursion>
    where
        F: FnOnce() -> Result<VisitRecursion>,
    {
        match self {
            VisitRecursion::Continue => f(),
            VisitRecursion::Jump | VisitRecursion::Stop => Ok(self),
        }
    }
}

/// The result of a rewrite step: the (possibly new) data, whether anything
/// changed, and how the traversal should go on.
#[derive(Debug, PartialEq, Clone)]
pub struct Transformed<T> {
    pub data: T,
    pub transformed: bool,
    pub tnr: VisitRecursion,
}

impl<T> Transformed<T> {
    pub fn new(data: T, transformed: bool, tnr: VisitRecursion) -> Self {
        Self { data, transformed, tnr }
    }

    pub fn yes(data: T) -> Self {
        Self::new(data, true, VisitRecursion::Continue)
    }

    pub fn no(data: T) -> Self {
        Self::new(data, false, VisitRecursion::Continue)
    }

    pub fn map_data<U, F>(self, f: F) -> Result<Transformed<U>>
    where
        F: FnOnce(T) -> Result<U>,
    {
        f(self.data).map(|data| Transformed::new(data, self.transformed, self.tnr))
    }

    pub fn update_data<U, F>(self, f: F) -> Transformed<U>
    where
        F: FnOnce(T) -> U,
    {
        Transformed::new(f(self.data), self.transformed, self.tnr)
    }
}

/// Helper trait for implementing [`TreeNode`] that have children stored as
/// `Arc`s. If some trait object, such as `dyn T`, implements this trait,
/// its related `Arc<dyn T>` will automatically implement [`TreeNode`].
pub trait DynTreeNode {
    /// Returns all children of the specified `TreeNode`.
    fn arc_children(&self) -> Vec<&Arc<Self>>;

    /// Build a copy of `self` over new children, in the same order.
    fn with_new_arc_children(self: Arc<Self>, children: Vec<Arc<Self>>) -> Result<Arc<Self>>;
}

/// Blanket implementation for any `Arc<T>` where `T` implements [`DynTreeNode`]
impl<T: DynTreeNode + ?Sized> TreeNode for Arc<T> {
    fn visit_children<F>(&self, mut f: F) -> Result<VisitRecursion>
    where
        F: FnMut(&Self) -> Result<VisitRecursion>,
    {
        apply_each!(f; self.arc_children())
    }

    fn map_children<F>(self, f: F) -> Result<Transformed<Self>>
    where
        F: FnMut(Self) -> Result<Transformed<Self>>,
    {
        let children = self.arc_children().into_iter().cloned().collect::<Vec<_>>();
        if children.is_empty() {
            return Ok(Transformed::no(self));
        }
        let t = map_until_stop(children, f)?;
        if t.transformed {
            let tnr = t.tnr;
            let node = self.with_new_arc_children(t.data)?;
            Ok(Transformed::new(node, true, tnr))
        } else {
            Ok(Transformed::new(self, false, t.tnr))
        }
    }
}
