// Cursor over a single B-tree: a materialized root-to-leaf path.
//
// On-disk nodes carry no parent pointers, so the retained path is the
// source of truth for parentage. Neighbor navigation walks the path in
// O(height) instead of re-descending from the root. Each path slot owns
// its node view; ascending (or dropping the cursor) releases it.

use crate::btree::{BTree, Cell, Key, Node};
use crate::error::{Result, RliteError};
use crate::format::PageType;
use crate::pager::PageNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    Read,
    Write,
}

pub struct Cursor {
    mode: CursorMode,
    root_page: PageNumber,
    /// Nodes on the path, root first. Never empty.
    nodes: Vec<Node>,
    /// Current cell index at each path level. `n_cells` at a level means
    /// the right page was taken there.
    cells: Vec<u16>,
}

fn no_next_means_miss(e: RliteError) -> RliteError {
    match e {
        RliteError::NoNext => RliteError::KeyNotFound,
        other => other,
    }
}

fn no_prev_means_miss(e: RliteError) -> RliteError {
    match e {
        RliteError::NoPrev => RliteError::KeyNotFound,
        other => other,
    }
}

impl Cursor {
    /// Open a cursor on the B-tree rooted at `root_page`, positioned at
    /// the first cell of the root.
    pub fn open(bt: &mut BTree, mode: CursorMode, root_page: PageNumber) -> Result<Cursor> {
        let root = bt.load_node(root_page)?;
        Ok(Cursor {
            mode,
            root_page,
            nodes: vec![root],
            cells: vec![0],
        })
    }

    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    pub fn root_page(&self) -> PageNumber {
        self.root_page
    }

    pub fn root_is_empty(&self) -> bool {
        self.nodes[0].n_cells == 0
    }

    fn depth(&self) -> usize {
        self.nodes.len() - 1
    }

    fn current_node(&self) -> &Node {
        self.nodes.last().unwrap()
    }

    pub fn current_cell_no(&self) -> u16 {
        *self.cells.last().unwrap()
    }

    /// The cell the cursor is positioned on.
    pub fn current_cell(&self) -> Result<Cell> {
        self.current_node().cell(self.current_cell_no())
    }

    fn is_leaf(&self) -> bool {
        self.current_node().kind.is_leaf()
    }

    /// Drop the whole path and reload the root. Called after a mutation:
    /// a split may have rewritten pages the path referenced.
    pub fn reset(&mut self, bt: &mut BTree) -> Result<()> {
        self.nodes.clear();
        self.cells.clear();
        self.nodes.push(bt.load_node(self.root_page)?);
        self.cells.push(0);
        Ok(())
    }

    /// Push the child the current cell points at (or the right page when
    /// the cell index equals n_cells), positioned at its first cell.
    fn go_down_current_cell(&mut self, bt: &mut BTree) -> Result<()> {
        let node = self.current_node();
        let ncell = self.current_cell_no();
        let next_page = if ncell == node.n_cells {
            node.right_page
        } else {
            match node.cell(ncell)? {
                Cell::TableInternal { child_page, .. }
                | Cell::IndexInternal { child_page, .. } => child_page,
                _ => {
                    return Err(RliteError::Corrupt(
                        "descent through a leaf cell".into(),
                    ))
                }
            }
        };
        let child = bt.load_node(next_page)?;
        self.nodes.push(child);
        self.cells.push(0);
        Ok(())
    }

    /// Pop one path level, releasing the node view.
    fn go_to_parent(&mut self) {
        debug_assert!(self.depth() > 0);
        self.nodes.pop();
        self.cells.pop();
    }

    fn descend_leftmost(&mut self, bt: &mut BTree) -> Result<()> {
        while !self.is_leaf() {
            self.go_down_current_cell(bt)?;
        }
        Ok(())
    }

    /// Follow right pages down to a leaf, marking each level as
    /// right-page-taken.
    fn descend_rightmost(&mut self, bt: &mut BTree) -> Result<()> {
        while !self.is_leaf() {
            let n_cells = self.current_node().n_cells;
            *self.cells.last_mut().unwrap() = n_cells;
            self.go_down_current_cell(bt)?;
        }
        Ok(())
    }

    /// Position at the first entry. The caller handles the empty tree (the
    /// Rewind opcode checks the root's cell count before calling this).
    pub fn rewind(&mut self, bt: &mut BTree) -> Result<()> {
        while self.depth() > 0 {
            self.go_to_parent();
        }
        self.cells[0] = 0;
        self.descend_leftmost(bt)
    }

    /// Advance to the in-order successor. `NoNext` past the last entry,
    /// without moving the cursor.
    pub fn next(&mut self, bt: &mut BTree) -> Result<()> {
        debug_assert!(self.current_node().kind != PageType::TableInternal);
        let kind = self.current_node().kind;
        let ncell = self.current_cell_no();
        let n_cells = self.current_node().n_cells;

        if ncell + 1 < n_cells {
            *self.cells.last_mut().unwrap() += 1;
            // The successor of an index-internal entry is the leftmost
            // entry below its next cell's child.
            if kind == PageType::IndexInternal {
                self.descend_leftmost(bt)?;
            }
            return Ok(());
        }

        if kind.is_leaf() {
            if self.depth() == 0 {
                return Err(RliteError::NoNext);
            }
            // Right page taken at every ancestor: this is the last entry.
            // Fail before touching the path.
            let all_right = (0..self.depth()).all(|i| self.cells[i] == self.nodes[i].n_cells);
            if all_right {
                return Err(RliteError::NoNext);
            }
            loop {
                if self.depth() == 0 {
                    return Err(RliteError::NoNext);
                }
                self.go_to_parent();
                if self.current_cell_no() < self.current_node().n_cells {
                    break;
                }
            }
            if self.current_node().kind == PageType::IndexInternal {
                // That ancestor cell is itself the successor.
                return Ok(());
            }
            *self.cells.last_mut().unwrap() += 1;
            return self.descend_leftmost(bt);
        }

        // Index internal with its cells exhausted: mark the right page
        // taken and continue down its leftmost path.
        *self.cells.last_mut().unwrap() = n_cells;
        self.descend_leftmost(bt)
    }

    /// Step to the in-order predecessor. `NoPrev` before the first entry,
    /// without moving the cursor.
    pub fn prev(&mut self, bt: &mut BTree) -> Result<()> {
        debug_assert!(self.current_node().kind != PageType::TableInternal);
        let kind = self.current_node().kind;
        let ncell = self.current_cell_no();

        // The predecessor of an index-internal entry is the rightmost
        // entry below its own cell's child.
        if kind == PageType::IndexInternal && ncell < self.current_node().n_cells {
            self.go_down_current_cell(bt)?;
            self.descend_rightmost(bt)?;
            let last = self.current_node().n_cells - 1;
            *self.cells.last_mut().unwrap() = last;
            return Ok(());
        }

        if ncell > 0 {
            *self.cells.last_mut().unwrap() -= 1;
            return Ok(());
        }

        if self.depth() == 0 {
            return Err(RliteError::NoPrev);
        }
        // Leftmost child taken at every ancestor: this is the first entry.
        let all_left = (0..self.depth()).all(|i| self.cells[i] == 0);
        if all_left {
            return Err(RliteError::NoPrev);
        }
        loop {
            if self.depth() == 0 {
                return Err(RliteError::NoPrev);
            }
            self.go_to_parent();
            if self.current_cell_no() > 0 {
                break;
            }
        }
        *self.cells.last_mut().unwrap() -= 1;
        if self.current_node().kind == PageType::IndexInternal {
            // The decremented ancestor cell is itself the predecessor.
            return Ok(());
        }
        self.go_down_current_cell(bt)?;
        self.descend_rightmost(bt)?;
        let last = self.current_node().n_cells - 1;
        *self.cells.last_mut().unwrap() = last;
        Ok(())
    }

    /// The smallest cell with key >= `key`, or (n_cells, None).
    fn find_cell(node: &Node, key: Key) -> Result<(u16, Option<Cell>)> {
        for i in 0..node.n_cells {
            let cell = node.cell(i)?;
            if key <= cell.key() {
                return Ok((i, Some(cell)));
            }
        }
        Ok((node.n_cells, None))
    }

    /// Shared descent for the seek family: rewind to the root, then walk
    /// down toward the smallest entry >= `key`, stopping early on an exact
    /// index-internal match. Returns the landing cell index and cell.
    fn seek_partial(&mut self, bt: &mut BTree, key: Key) -> Result<(u16, Option<Cell>)> {
        while self.depth() > 0 {
            self.go_to_parent();
        }
        loop {
            let (i, cell) = Self::find_cell(self.current_node(), key)?;
            *self.cells.last_mut().unwrap() = i;
            if self.is_leaf() {
                return Ok((i, cell));
            }
            if self.current_node().kind == PageType::IndexInternal {
                if let Some(c) = &cell {
                    if c.key() == key {
                        return Ok((i, cell));
                    }
                }
            }
            self.go_down_current_cell(bt)?;
        }
    }

    /// Position exactly at `key`, or `KeyNotFound`.
    pub fn seek(&mut self, bt: &mut BTree, key: Key) -> Result<()> {
        match self.seek_partial(bt, key)? {
            (_, Some(cell)) if cell.key() == key => Ok(()),
            _ => Err(RliteError::KeyNotFound),
        }
    }

    /// Position at the smallest entry >= `key`.
    pub fn seek_ge(&mut self, bt: &mut BTree, key: Key) -> Result<()> {
        let (_, cell) = self.seek_partial(bt, key)?;
        let kind = self.current_node().kind;
        match cell {
            None => match kind {
                // Landing past the end of a table leaf means the key is
                // greater than everything in the tree.
                PageType::TableLeaf => Err(RliteError::KeyNotFound),
                _ => self.next(bt).map_err(no_next_means_miss),
            },
            Some(c) => match kind {
                PageType::TableLeaf | PageType::IndexInternal => Ok(()),
                PageType::IndexLeaf if key > c.key() => {
                    self.next(bt).map_err(no_next_means_miss)
                }
                PageType::IndexLeaf => Ok(()),
                PageType::TableInternal => Err(RliteError::Corrupt(
                    "seek landed on a table internal node".into(),
                )),
            },
        }
    }

    /// Position at the smallest entry > `key`.
    pub fn seek_gt(&mut self, bt: &mut BTree, key: Key) -> Result<()> {
        match self.seek_partial(bt, key)? {
            (_, Some(cell)) if cell.key() != key => Ok(()),
            _ => self.next(bt).map_err(no_next_means_miss),
        }
    }

    /// Position at the largest entry <= `key`.
    pub fn seek_le(&mut self, bt: &mut BTree, key: Key) -> Result<()> {
        match self.seek_partial(bt, key)? {
            (_, Some(cell)) if cell.key() == key => Ok(()),
            _ => self.prev(bt).map_err(no_prev_means_miss),
        }
    }

    /// Position at the largest entry < `key`.
    pub fn seek_lt(&mut self, bt: &mut BTree, key: Key) -> Result<()> {
        self.seek_partial(bt, key)?;
        self.prev(bt).map_err(no_prev_means_miss)
    }
}
