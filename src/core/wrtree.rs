//! Weight-ranked AVL tree.
//!
//! A self-balancing binary search tree in which every node carries an
//! `own_weight` and the cached weight of its whole subtree. Besides ordinary
//! keyed insert/remove it answers weighted-quantile queries: "which node does
//! the cumulative-weight fraction `r` land on?". The ranking uses this to turn
//! a fast-tier capacity share directly into a hotness threshold.
//!
//! Nodes are owned through `Box` links; rotations and weight/height updates
//! happen on the recursive unwind, so no parent pointers are needed.

use std::cmp::Ordering;

type Link<T> = Option<Box<Node<T>>>;

struct Node<T> {
    payload: T,
    own_weight: usize,
    subtree_weight: usize,
    /// Height of the subtree rooted here; a leaf has height 0.
    height: i32,
    left: Link<T>,
    right: Link<T>,
}

impl<T> Node<T> {
    fn new(payload: T, weight: usize) -> Self {
        Self {
            payload,
            own_weight: weight,
            subtree_weight: weight,
            height: 0,
            left: None,
            right: None,
        }
    }

    /// Recompute cached height and subtree weight from the children.
    fn refresh(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
        self.subtree_weight = self.own_weight + weight(&self.left) + weight(&self.right);
    }

    fn balance(&self) -> i32 {
        height(&self.left) - height(&self.right)
    }
}

#[inline]
fn height<T>(link: &Link<T>) -> i32 {
    link.as_ref().map_or(-1, |n| n.height)
}

#[inline]
fn weight<T>(link: &Link<T>) -> usize {
    link.as_ref().map_or(0, |n| n.subtree_weight)
}

/// Weight-ranked balanced tree keyed by `T`'s ordering.
///
/// Duplicate keys aggregate: a `put` over an existing key replaces the
/// payload and adds to the node's weight. Callers that bucket values (the
/// ranking's aggregated-hotness entries) rely on this.
pub struct WrTree<T: Ord> {
    root: Link<T>,
    len: usize,
}

impl<T: Ord> WrTree<T> {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self { root: None, len: 0 }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total weight over all nodes.
    pub fn total_weight(&self) -> usize {
        weight(&self.root)
    }

    /// Height of the root; a single node has height 0, empty trees -1.
    pub fn height(&self) -> i32 {
        height(&self.root)
    }

    /// Insert `payload` with `weight`.
    ///
    /// If a node with an equal key exists its payload is replaced and the
    /// weight is added to the node's own weight.
    pub fn put(&mut self, payload: T, weight: usize) {
        let root = self.root.take();
        let (new_root, inserted) = Self::put_node(root, payload, weight);
        self.root = Some(new_root);
        if inserted {
            self.len += 1;
        }
    }

    fn put_node(link: Link<T>, payload: T, weight: usize) -> (Box<Node<T>>, bool) {
        let Some(mut node) = link else {
            return (Box::new(Node::new(payload, weight)), true);
        };
        match payload.cmp(&node.payload) {
            Ordering::Equal => {
                node.payload = payload;
                node.own_weight += weight;
                node.refresh();
                (node, false)
            }
            Ordering::Less => {
                let (child, inserted) = Self::put_node(node.left.take(), payload, weight);
                node.left = Some(child);
                (Self::rebalance(node), inserted)
            }
            Ordering::Greater => {
                let (child, inserted) = Self::put_node(node.right.take(), payload, weight);
                node.right = Some(child);
                (Self::rebalance(node), inserted)
            }
        }
    }

    /// Remove the node equal to `key` and return its payload.
    pub fn remove(&mut self, key: &T) -> Option<T> {
        let root = self.root.take();
        let (new_root, removed) = Self::remove_node(root, key);
        self.root = new_root;
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_node(link: Link<T>, key: &T) -> (Link<T>, Option<T>) {
        let Some(mut node) = link else {
            return (None, None);
        };
        match key.cmp(&node.payload) {
            Ordering::Less => {
                let (child, removed) = Self::remove_node(node.left.take(), key);
                node.left = child;
                (Some(Self::rebalance(node)), removed)
            }
            Ordering::Greater => {
                let (child, removed) = Self::remove_node(node.right.take(), key);
                node.right = child;
                (Some(Self::rebalance(node)), removed)
            }
            Ordering::Equal => {
                let left = node.left.take();
                let right = node.right.take();
                let replacement = match (left, right) {
                    (None, None) => None,
                    (Some(l), None) => Some(l),
                    (None, Some(r)) => Some(r),
                    (Some(l), Some(r)) => {
                        // Splice the in-order successor into this position.
                        let (rest, mut successor) = Self::pop_min(r);
                        successor.left = Some(l);
                        successor.right = rest;
                        Some(Self::rebalance(successor))
                    }
                };
                (replacement, Some(node.payload))
            }
        }
    }

    /// Detach the minimum node of a subtree, returning the remaining subtree
    /// and the detached node (children cleared).
    fn pop_min(mut node: Box<Node<T>>) -> (Link<T>, Box<Node<T>>) {
        match node.left.take() {
            None => {
                let rest = node.right.take();
                node.refresh();
                (rest, node)
            }
            Some(left) => {
                let (rest, min) = Self::pop_min(left);
                node.left = rest;
                (Some(Self::rebalance(node)), min)
            }
        }
    }

    /// Find the payload at cumulative-weight fraction `fraction` of the total.
    ///
    /// With nodes laid out in key order and `target = fraction * total`, this
    /// returns the node whose half-open cumulative interval `(lo, hi]`
    /// contains `target`, where `lo` is the weight of everything strictly
    /// before the node and `hi = lo + own_weight`. A non-positive target
    /// selects the minimum key; `fraction = 1` selects the maximum.
    pub fn find_by_weight_fraction(&self, fraction: f64) -> Option<&T> {
        let mut node = self.root.as_deref()?;
        let total = node.subtree_weight;
        if total == 0 {
            return None;
        }
        let target = fraction * total as f64;
        if target <= 0.0 {
            while let Some(left) = node.left.as_deref() {
                node = left;
            }
            return Some(&node.payload);
        }
        let mut acc = 0.0;
        loop {
            let lo = acc + weight(&node.left) as f64;
            let hi = lo + node.own_weight as f64;
            if target <= lo {
                match node.left.as_deref() {
                    Some(left) => node = left,
                    None => return Some(&node.payload),
                }
            } else if target > hi {
                match node.right.as_deref() {
                    Some(right) => {
                        acc = hi;
                        node = right;
                    }
                    None => return Some(&node.payload),
                }
            } else {
                return Some(&node.payload);
            }
        }
    }

    fn rebalance(mut node: Box<Node<T>>) -> Box<Node<T>> {
        node.refresh();
        let balance = node.balance();
        if balance > 1 {
            if node.left.as_deref().map_or(0, Node::balance) < 0 {
                if let Some(left) = node.left.take() {
                    node.left = Some(Self::rotate_left(left));
                }
            }
            Self::rotate_right(node)
        } else if balance < -1 {
            if node.right.as_deref().map_or(0, Node::balance) > 0 {
                if let Some(right) = node.right.take() {
                    node.right = Some(Self::rotate_right(right));
                }
            }
            Self::rotate_left(node)
        } else {
            node
        }
    }

    fn rotate_left(mut node: Box<Node<T>>) -> Box<Node<T>> {
        match node.right.take() {
            Some(mut pivot) => {
                node.right = pivot.left.take();
                node.refresh();
                pivot.left = Some(node);
                pivot.refresh();
                pivot
            }
            None => node,
        }
    }

    fn rotate_right(mut node: Box<Node<T>>) -> Box<Node<T>> {
        match node.left.take() {
            Some(mut pivot) => {
                node.left = pivot.right.take();
                node.refresh();
                pivot.right = Some(node);
                pivot.refresh();
                pivot
            }
            None => node,
        }
    }

    /// Walk the tree in key order.
    pub fn for_each(&self, mut f: impl FnMut(&T, usize)) {
        Self::visit(&self.root, &mut f);
    }

    fn visit(link: &Link<T>, f: &mut impl FnMut(&T, usize)) {
        if let Some(node) = link {
            Self::visit(&node.left, f);
            f(&node.payload, node.own_weight);
            Self::visit(&node.right, f);
        }
    }

    /// Recompute every cached weight and height and assert they match, along
    /// with the AVL balance bound. Test support.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        Self::check_node(&self.root);
    }

    #[cfg(test)]
    fn check_node(link: &Link<T>) -> (usize, i32) {
        let Some(node) = link else {
            return (0, -1);
        };
        let (lw, lh) = Self::check_node(&node.left);
        let (rw, rh) = Self::check_node(&node.right);
        assert_eq!(node.subtree_weight, node.own_weight + lw + rw);
        assert_eq!(node.height, 1 + lh.max(rh));
        assert!((lh - rh).abs() <= 1, "AVL balance violated");
        if let Some(left) = node.left.as_deref() {
            assert!(left.payload < node.payload);
        }
        if let Some(right) = node.right.as_deref() {
            assert!(right.payload > node.payload);
        }
        (node.subtree_weight, node.height)
    }
}

impl<T: Ord> Default for WrTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
