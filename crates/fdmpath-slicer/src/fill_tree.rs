//! Space-filling tree for fractal fill patterns.
//!
//! Every node sits at a junction and may have a child in each of the four
//! diagonal directions, each half as far away as the node is from its own
//! parent. A depth-first walk that revisits a node after each child traces
//! one continuous line covering the square around the root.
//!
//! Nodes live in an arena and refer to each other by index.

use crate::point::{Coord, Point};

// Diagonal directions, clockwise from left-up (right-up is 1), so that
// `(d + 2) % 4` is the opposite one.
const LEFT_UP: usize = 0;
const RIGHT_DOWN: usize = 2;
const LEFT_DOWN: usize = 3;
const DIRECTION_COUNT: usize = 4;

#[derive(Debug, Clone)]
struct Node {
    parent: Option<usize>,
    depth: i32,
    middle: Point,
    /// Direction from the parent to this node; `DIRECTION_COUNT` for the root.
    parent_to_here: usize,
    children: [Option<usize>; DIRECTION_COUNT],
}

/// A quad-direction fractal tree rooted at a fixed middle point.
#[derive(Debug, Clone)]
pub struct SpaceFillingTree {
    nodes: Vec<Node>,
    root: usize,
}

impl SpaceFillingTree {
    /// Build a tree around `middle` that covers a square extending `radius`
    /// microns in each direction, recursing `depth` levels deep.
    pub fn new(middle: Point, radius: Coord, depth: i32) -> Self {
        let mut tree = Self {
            nodes: vec![Node {
                parent: None,
                depth,
                middle,
                parent_to_here: DIRECTION_COUNT,
                children: [None; DIRECTION_COUNT],
            }],
            root: 0,
        };
        // 1 + 1/2 + 1/4 + .. = 2, so the first segment spans half the radius.
        let first_offset = radius / 2;
        for dir in 0..DIRECTION_COUNT {
            tree.add_child(tree.root, dir, first_offset);
        }
        tree.prune(tree.root);
        tree
    }

    /// Visit every junction in walk order. A junction is visited again
    /// after returning from each of its children, so consecutive points are
    /// always connected by a tree edge.
    pub fn walk(&self, visitor: &mut impl FnMut(Point)) {
        self.walk_node(self.root, visitor);
    }

    /// All walk points in order.
    pub fn points(&self) -> Vec<Point> {
        let mut points = Vec::new();
        self.walk(&mut |p| points.push(p));
        points
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn add_child(&mut self, this: usize, direction: usize, child_offset: Coord) {
        let mut offset = Point::new(child_offset, child_offset);
        if direction == LEFT_DOWN || direction == RIGHT_DOWN {
            offset.y = -offset.y;
        }
        if direction == LEFT_DOWN || direction == LEFT_UP {
            offset.x = -offset.x;
        }

        let Node {
            parent,
            depth,
            middle,
            parent_to_here,
            ..
        } = self.nodes[this];
        let child_middle = middle + offset;

        let new_node = match parent {
            Some(parent) if direction == (parent_to_here + 2) % DIRECTION_COUNT => {
                // Splice the new node in between the parent and this node.
                let mut children = [None; DIRECTION_COUNT];
                children[parent_to_here] = Some(this);
                let new_node = self.push(Node {
                    parent: Some(parent),
                    depth: depth - 1,
                    middle: child_middle,
                    parent_to_here,
                    children,
                });
                self.nodes[parent].children[parent_to_here] = Some(new_node);
                self.nodes[this].parent = Some(new_node);
                new_node
            }
            _ => {
                let mut children = [None; DIRECTION_COUNT];
                let existing = self.nodes[this].children[direction];
                children[direction] = existing;
                let new_node = self.push(Node {
                    parent: Some(this),
                    depth: depth - 1,
                    middle: child_middle,
                    parent_to_here: direction,
                    children,
                });
                if let Some(existing) = existing {
                    self.nodes[existing].parent = Some(new_node);
                }
                self.nodes[this].children[direction] = Some(new_node);
                new_node
            }
        };

        if depth <= 0 {
            return;
        }
        for dir in 0..DIRECTION_COUNT {
            self.add_child(new_node, dir, child_offset / 2);
        }
    }

    /// Collapse children that only continue straight on.
    fn prune(&mut self, this: usize) {
        let mut dir = 0;
        while dir < DIRECTION_COUNT {
            let Some(child) = self.nodes[this].children[dir] else {
                dir += 1;
                continue;
            };
            let grandchildren = self.nodes[child].children;
            let front = grandchildren[dir];
            let right = grandchildren[(dir + 1) % DIRECTION_COUNT];
            let left = grandchildren[(dir + 3) % DIRECTION_COUNT];
            match front {
                Some(front) if left.is_none() && right.is_none() => {
                    self.nodes[this].children[dir] = Some(front);
                    self.nodes[front].parent = Some(this);
                    self.nodes[child].children[dir] = None;
                    self.nodes[child].parent = None;
                }
                _ => {
                    self.prune(child);
                    dir += 1;
                }
            }
        }
    }

    fn walk_node(&self, idx: usize, visitor: &mut impl FnMut(Point)) {
        let node = &self.nodes[idx];
        visitor(node.middle);
        for offset in 0..DIRECTION_COUNT {
            let dir = (node.parent_to_here + offset + 2) % DIRECTION_COUNT;
            if let Some(child) = node.children[dir] {
                self.walk_node(child, visitor);
                visitor(node.middle);
            }
        }
    }

    #[cfg(test)]
    fn is_consistent(&self, idx: usize) -> bool {
        let node = &self.nodes[idx];
        node.children.iter().enumerate().all(|(dir, child)| match *child {
            None => true,
            Some(child) => {
                let c = &self.nodes[child];
                c.parent == Some(idx)
                    && c.parent_to_here == dir
                    && c.children[(dir + 2) % DIRECTION_COUNT].is_none()
                    && self.is_consistent(child)
            }
        })
    }
}
