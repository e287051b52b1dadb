//! B+Tree implementation for ordered key-value storage.
//!
//! Fully in-memory tree with a small fixed fan-out. Nodes live in an arena
//! owned by the tree and refer to each other by [`NodeId`]: a parent owns its
//! children through their ids, and the leaf chain link is traversal-only.
//! There are no parent pointers; splits and merges are driven by the
//! recursive descent, which knows each child's index within its parent.

use std::fmt;
use std::mem;
use std::ops::{Bound, RangeBounds};

// Tree configuration

/// Maximum number of children per interior node.
pub const ORDER: usize = 4;

/// Maximum keys per node once an operation has completed.
pub const MAX_KEYS: usize = ORDER - 1;

/// Minimum keys per node (except root).
pub const MIN_KEYS: usize = ORDER / 2 - 1;

// Binary search utilities

/// Binary search: find first index where keys[i] >= key.
#[inline]
fn lower_bound<K: Ord>(keys: &[K], key: &K) -> usize {
    keys.partition_point(|k| k < key)
}

/// Binary search: find first index where keys[i] > key.
///
/// Used to route through interior nodes, so a key equal to a separator
/// descends into the right child.
#[inline]
fn upper_bound<K: Ord>(keys: &[K], key: &K) -> usize {
    keys.partition_point(|k| k <= key)
}

/// Arena slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

/// A B+Tree node.
#[derive(Debug, Clone)]
struct Node<K, V> {
    /// Whether this is a leaf node.
    is_leaf: bool,
    /// Keys stored in this node (separators for interior nodes).
    keys: Vec<K>,
    /// Values (only for leaf nodes).
    values: Vec<V>,
    /// Children (only for interior nodes), `keys.len() + 1` of them.
    children: Vec<NodeId>,
    /// Next leaf in key order (only for leaf nodes, for range scans).
    next_leaf: Option<NodeId>,
}

impl<K, V> Default for Node<K, V> {
    fn default() -> Self {
        Self::new_leaf()
    }
}

impl<K, V> Node<K, V> {
    fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            keys: Vec::with_capacity(ORDER),
            values: Vec::with_capacity(ORDER),
            children: Vec::new(),
            next_leaf: None,
        }
    }

    fn new_interior(keys: Vec<K>, children: Vec<NodeId>) -> Self {
        Self {
            is_leaf: false,
            keys,
            values: Vec::new(),
            children,
            next_leaf: None,
        }
    }

    fn is_underflow(&self) -> bool {
        self.keys.len() < MIN_KEYS
    }

    fn can_lend(&self) -> bool {
        self.keys.len() > MIN_KEYS
    }
}

/// Result of inserting into a subtree.
enum InsertOutcome<K, V> {
    /// The key existed; its previous value is returned.
    Replaced(V),
    /// A new key was added. Carries the separator and new right sibling
    /// when the subtree root had to split.
    Inserted(Option<(K, NodeId)>),
}

/// In-memory B+Tree with leaf chaining.
pub struct BPlusTree<K, V> {
    nodes: Vec<Node<K, V>>,
    free: Vec<NodeId>,
    root: NodeId,
    len: usize,
}

impl<K: Ord + Clone, V: Clone> Default for BPlusTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone> BPlusTree<K, V> {
    /// Create an empty tree: a single empty leaf acting as root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new_leaf()],
            free: Vec::new(),
            root: NodeId(0),
            len: 0,
        }
    }

    /// Build a tree from a sequence of entries.
    pub fn from_entries<I: IntoIterator<Item = (K, V)>>(entries: I) -> Self {
        let mut tree = Self::new();
        for (key, value) in entries {
            tree.insert(key, value);
        }
        tree
    }

    // Arena management

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0] = Node::default();
        self.free.push(id);
    }

    #[inline]
    fn node(&self, id: NodeId) -> &Node<K, V> {
        &self.nodes[id.0]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        &mut self.nodes[id.0]
    }

    /// Move a node out of its slot so that it can be edited alongside another node.
    fn take(&mut self, id: NodeId) -> Node<K, V> {
        mem::take(&mut self.nodes[id.0])
    }

    fn put(&mut self, id: NodeId, node: Node<K, V>) {
        self.nodes[id.0] = node;
    }

    // Insertion

    /// Insert a key-value pair, returning the previous value if the key existed.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.insert_into(self.root, key, value) {
            InsertOutcome::Replaced(old) => Some(old),
            InsertOutcome::Inserted(split) => {
                if let Some((separator, sibling)) = split {
                    // Root split: the only place the tree grows taller
                    let old_root = self.root;
                    self.root = self.alloc(Node::new_interior(
                        vec![separator],
                        vec![old_root, sibling],
                    ));
                }
                self.len += 1;
                None
            }
        }
    }

    fn insert_into(&mut self, id: NodeId, key: K, value: V) -> InsertOutcome<K, V> {
        if self.node(id).is_leaf {
            let node = self.node_mut(id);
            let idx = lower_bound(&node.keys, &key);

            if idx < node.keys.len() && node.keys[idx] == key {
                return InsertOutcome::Replaced(mem::replace(&mut node.values[idx], value));
            }

            node.keys.insert(idx, key);
            node.values.insert(idx, value);

            if node.keys.len() < ORDER {
                return InsertOutcome::Inserted(None);
            }
            return InsertOutcome::Inserted(Some(self.split_leaf(id)));
        }

        let idx = upper_bound(&self.node(id).keys, &key);
        let child = self.node(id).children[idx];

        match self.insert_into(child, key, value) {
            InsertOutcome::Inserted(Some((separator, sibling))) => {
                let node = self.node_mut(id);
                node.keys.insert(idx, separator);
                node.children.insert(idx + 1, sibling);

                if node.keys.len() < ORDER {
                    InsertOutcome::Inserted(None)
                } else {
                    InsertOutcome::Inserted(Some(self.split_interior(id)))
                }
            }
            other => other,
        }
    }

    /// Split a full leaf. The right half moves to a new sibling spliced into
    /// the leaf chain; its first key is copied up as the separator.
    fn split_leaf(&mut self, id: NodeId) -> (K, NodeId) {
        let node = self.node_mut(id);
        let mid = node.keys.len() / 2;

        let mut sibling = Node::new_leaf();
        sibling.keys = node.keys.split_off(mid);
        sibling.values = node.values.split_off(mid);
        sibling.next_leaf = node.next_leaf;

        let separator = sibling.keys[0].clone();
        let sibling_id = self.alloc(sibling);
        self.node_mut(id).next_leaf = Some(sibling_id);

        (separator, sibling_id)
    }

    /// Split a full interior node. The middle key moves up and belongs to
    /// neither half.
    fn split_interior(&mut self, id: NodeId) -> (K, NodeId) {
        let node = self.node_mut(id);
        let mid = node.keys.len() / 2;

        let right_keys = node.keys.split_off(mid + 1);
        let right_children = node.children.split_off(mid + 1);
        let separator = node.keys.remove(mid);

        let sibling_id = self.alloc(Node::new_interior(right_keys, right_children));
        (separator, sibling_id)
    }

    // Lookup

    /// Get the value for a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let node = self.node(self.find_leaf(key));
        let idx = lower_bound(&node.keys, key);
        if idx < node.keys.len() && &node.keys[idx] == key {
            Some(&node.values[idx])
        } else {
            None
        }
    }

    /// Check if a key exists.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Find the leaf that holds (or would hold) a key.
    fn find_leaf(&self, key: &K) -> NodeId {
        let mut current = self.root;
        loop {
            let node = self.node(current);
            if node.is_leaf {
                return current;
            }
            current = node.children[upper_bound(&node.keys, key)];
        }
    }

    /// Find the leftmost leaf.
    fn find_leftmost_leaf(&self) -> NodeId {
        let mut current = self.root;
        loop {
            let node = self.node(current);
            if node.is_leaf {
                return current;
            }
            current = node.children[0];
        }
    }

    // Deletion

    /// Delete a key, returning its value if it was present.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let removed = self.delete_from(self.root, key)?;
        self.len -= 1;

        // An interior root left with a single child hands over to it
        let root = self.node(self.root);
        if !root.is_leaf && root.keys.is_empty() {
            let child = root.children[0];
            self.release(self.root);
            self.root = child;
        }

        Some(removed)
    }

    fn delete_from(&mut self, id: NodeId, key: &K) -> Option<V> {
        if self.node(id).is_leaf {
            let node = self.node_mut(id);
            let idx = lower_bound(&node.keys, key);
            if idx < node.keys.len() && &node.keys[idx] == key {
                node.keys.remove(idx);
                return Some(node.values.remove(idx));
            }
            return None;
        }

        let idx = upper_bound(&self.node(id).keys, key);
        let child = self.node(id).children[idx];
        let removed = self.delete_from(child, key)?;

        if self.node(child).is_underflow() {
            self.rebalance_child(id, idx);
        }

        Some(removed)
    }

    /// Repair an underflowing child: borrow from the left sibling, then the
    /// right sibling, and merge only when neither can spare an entry.
    fn rebalance_child(&mut self, parent: NodeId, idx: usize) {
        let children = &self.node(parent).children;
        let left = idx.checked_sub(1).map(|i| children[i]);
        let right = children.get(idx + 1).copied();

        if let Some(left) = left
            && self.node(left).can_lend()
        {
            self.borrow_from_left(parent, idx);
        } else if let Some(right) = right
            && self.node(right).can_lend()
        {
            self.borrow_from_right(parent, idx);
        } else if left.is_some() {
            self.merge_children(parent, idx - 1);
        } else if right.is_some() {
            self.merge_children(parent, idx);
        }
    }

    fn borrow_from_left(&mut self, parent: NodeId, idx: usize) {
        let left_id = self.node(parent).children[idx - 1];
        let child_id = self.node(parent).children[idx];

        let mut left = self.take(left_id);
        let mut child = self.take(child_id);

        let last = left.keys.len() - 1;
        let key = left.keys.remove(last);

        if child.is_leaf {
            let value = left.values.remove(last);
            child.keys.insert(0, key.clone());
            child.values.insert(0, value);
            self.node_mut(parent).keys[idx - 1] = key;
        } else {
            let grandchild = left.children.remove(last + 1);
            let separator = mem::replace(&mut self.node_mut(parent).keys[idx - 1], key);
            child.keys.insert(0, separator);
            child.children.insert(0, grandchild);
        }

        self.put(left_id, left);
        self.put(child_id, child);
    }

    fn borrow_from_right(&mut self, parent: NodeId, idx: usize) {
        let child_id = self.node(parent).children[idx];
        let right_id = self.node(parent).children[idx + 1];

        let mut child = self.take(child_id);
        let mut right = self.take(right_id);

        if child.is_leaf {
            child.keys.push(right.keys.remove(0));
            child.values.push(right.values.remove(0));
            self.node_mut(parent).keys[idx] = right.keys[0].clone();
        } else {
            let key = right.keys.remove(0);
            let grandchild = right.children.remove(0);
            let separator = mem::replace(&mut self.node_mut(parent).keys[idx], key);
            child.keys.push(separator);
            child.children.push(grandchild);
        }

        self.put(child_id, child);
        self.put(right_id, right);
    }

    /// Merge `children[left_idx + 1]` into `children[left_idx]` and drop the
    /// separator between them from the parent.
    fn merge_children(&mut self, parent: NodeId, left_idx: usize) {
        let left_id = self.node(parent).children[left_idx];
        let right_id = self.node(parent).children[left_idx + 1];

        let separator = {
            let parent = self.node_mut(parent);
            parent.children.remove(left_idx + 1);
            parent.keys.remove(left_idx)
        };

        let right = self.take(right_id);
        let left = self.node_mut(left_id);

        if left.is_leaf {
            left.keys.extend(right.keys);
            left.values.extend(right.values);
            left.next_leaf = right.next_leaf;
        } else {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }

        self.release(right_id);
    }

    // Scans

    /// Range scan, in key order.
    pub fn range<R: RangeBounds<K>>(&self, range: R) -> Vec<(K, V)> {
        let mut results = Vec::new();

        let (mut current, mut start_idx) = match range.start_bound() {
            Bound::Included(k) | Bound::Excluded(k) => {
                let leaf = self.find_leaf(k);
                let node = self.node(leaf);
                let idx = lower_bound(&node.keys, k);
                if matches!(range.start_bound(), Bound::Excluded(_))
                    && idx < node.keys.len()
                    && &node.keys[idx] == k
                {
                    (Some(leaf), idx + 1)
                } else {
                    (Some(leaf), idx)
                }
            }
            Bound::Unbounded => (Some(self.find_leftmost_leaf()), 0),
        };

        while let Some(id) = current {
            let node = self.node(id);

            for i in start_idx..node.keys.len() {
                let key = &node.keys[i];
                let in_range = match range.end_bound() {
                    Bound::Included(end) => key <= end,
                    Bound::Excluded(end) => key < end,
                    Bound::Unbounded => true,
                };
                if !in_range {
                    return results;
                }
                results.push((key.clone(), node.values[i].clone()));
            }

            current = node.next_leaf;
            start_idx = 0;
        }

        results
    }

    /// Iterate over all entries in key order by walking the leaf chain.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            tree: self,
            leaf: Some(self.find_leftmost_leaf()),
            pos: 0,
        }
    }

    /// Get the minimum key-value pair.
    pub fn min(&self) -> Option<(&K, &V)> {
        self.iter().next()
    }

    /// Get the maximum key-value pair.
    pub fn max(&self) -> Option<(&K, &V)> {
        let mut current = self.root;
        loop {
            let node = self.node(current);
            if node.is_leaf {
                return node.keys.last().zip(node.values.last());
            }
            current = *node.children.last()?;
        }
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels, 1 for a lone leaf root.
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = self.root;
        while !self.node(current).is_leaf {
            current = self.node(current).children[0];
            height += 1;
        }
        height
    }

    /// Drop every entry, leaving a single empty leaf.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Verify the structural invariants of the tree.
    ///
    /// Checks key ordering and occupancy of every node, separator bounds,
    /// uniform leaf depth and that the leaf chain visits every entry once in
    /// ascending order.
    pub fn check_invariants(&self) -> Result<(), String>
    where
        K: fmt::Debug,
    {
        let mut leaf_depth = None;
        let counted = self.check_node(self.root, None, None, 1, &mut leaf_depth)?;
        if counted != self.len {
            return Err(format!("len is {} but tree holds {}", self.len, counted));
        }

        let mut chained = 0;
        let mut prev: Option<&K> = None;
        for (key, _) in self.iter() {
            if let Some(p) = prev
                && p >= key
            {
                return Err(format!("leaf chain out of order at {:?}", key));
            }
            prev = Some(key);
            chained += 1;
        }
        if chained != self.len {
            return Err(format!("leaf chain holds {} of {} entries", chained, self.len));
        }

        Ok(())
    }

    fn check_node(
        &self,
        id: NodeId,
        lower: Option<&K>,
        upper: Option<&K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<usize, String>
    where
        K: fmt::Debug,
    {
        let node = self.node(id);
        let is_root = id == self.root;

        if node.keys.len() > MAX_KEYS {
            return Err(format!("node {:?} overflows with {} keys", id, node.keys.len()));
        }
        if !is_root && node.keys.len() < MIN_KEYS {
            return Err(format!("node {:?} underflows with {} keys", id, node.keys.len()));
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("node {:?} keys not strictly increasing", id));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first())
            && first < lo
        {
            return Err(format!("key {:?} below separator {:?}", first, lo));
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last())
            && last >= hi
        {
            return Err(format!("key {:?} not below separator {:?}", last, hi));
        }

        if node.is_leaf {
            if node.keys.len() != node.values.len() {
                return Err(format!("leaf {:?} has mismatched keys and values", id));
            }
            match *leaf_depth {
                Some(d) if d != depth => {
                    return Err(format!("leaf {:?} at depth {} expected {}", id, depth, d));
                }
                _ => *leaf_depth = Some(depth),
            }
            return Ok(node.keys.len());
        }

        if node.children.len() != node.keys.len() + 1 {
            return Err(format!(
                "interior {:?} has {} keys but {} children",
                id,
                node.keys.len(),
                node.children.len()
            ));
        }

        let mut total = 0;
        for (i, &child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i == node.keys.len() { upper } else { Some(&node.keys[i]) };
            total += self.check_node(child, lo, hi, depth + 1, leaf_depth)?;
        }
        Ok(total)
    }
}

impl<V: Clone> BPlusTree<String, V> {
    /// Inclusive range scan over string keys. An empty bound is unbounded on
    /// that side, so `range_query("", "")` returns every entry.
    pub fn range_query(&self, start: &str, end: &str) -> Vec<(String, V)> {
        let lower = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start.to_string())
        };
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(end.to_string())
        };
        self.range((lower, upper))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for BPlusTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BPlusTree")
            .field("len", &self.len)
            .field("root", &self.root)
            .finish()
    }
}

/// Ordered iterator over the leaf chain.
pub struct Iter<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    leaf: Option<NodeId>,
    pos: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let tree: &'a BPlusTree<K, V> = self.tree;
        loop {
            let node = &tree.nodes[self.leaf?.0];
            if self.pos < node.keys.len() {
                let item = (&node.keys[self.pos], &node.values[self.pos]);
                self.pos += 1;
                return Some(item);
            }
            self.leaf = node.next_leaf;
            self.pos = 0;
        }
    }
}

// Tests
