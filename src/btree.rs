// B-tree file engine: node codec, cell layouts, find/insert/split.
//
// A database file holds any number of table and index B-trees, identified
// by their root page numbers. All I/O goes through the pager: nodes are
// loaded into owned views, mutated in memory, and persisted with
// write_node after a mutation batch.

use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, RliteError};
use crate::format::{self, FileHeader, PageType, DEFAULT_PAGE_SIZE, HEADER_SIZE};
use crate::pager::{Page, PageNumber, Pager};
use crate::varint;

/// Entry key. Table B-trees key on the row's primary key; index B-trees key
/// on the indexed column value.
pub type Key = u32;

/// Fixed marker carried by every index cell: the record header of a
/// one-column record holding a 4-byte integer. No other value is accepted.
pub const INDEX_CELL_MAGIC: u32 = 0x0B03_0404;

/// One logical entry in a node, tagged by the layout it serializes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    TableInternal {
        key: Key,
        child_page: PageNumber,
    },
    TableLeaf {
        key: Key,
        data: Vec<u8>,
    },
    IndexInternal {
        key: Key,
        key_pk: Key,
        child_page: PageNumber,
    },
    IndexLeaf {
        key: Key,
        key_pk: Key,
    },
}

impl Cell {
    pub fn key(&self) -> Key {
        match self {
            Cell::TableInternal { key, .. }
            | Cell::TableLeaf { key, .. }
            | Cell::IndexInternal { key, .. }
            | Cell::IndexLeaf { key, .. } => *key,
        }
    }

    /// On-disk size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Cell::TableInternal { .. } => 8,
            Cell::TableLeaf { data, .. } => 8 + data.len(),
            Cell::IndexInternal { .. } => 16,
            Cell::IndexLeaf { .. } => 12,
        }
    }
}

/// An in-memory view of one B-tree node. Owns its page buffer; changes are
/// not visible in the file until write_node persists them.
#[derive(Debug)]
pub struct Node {
    pub page: Page,
    pub kind: PageType,
    /// First free byte between the cell-offset array and the cell area.
    pub free_offset: u16,
    pub n_cells: u16,
    /// Start of the cell area, which grows down from the page end. Equals
    /// the page size while the node is empty.
    pub cells_offset: u16,
    /// Child holding keys greater than every cell key. Internal nodes only.
    pub right_page: PageNumber,
}

impl Node {
    /// Parse the node header out of a page. On page 1 the node starts
    /// after the 100-byte file header.
    pub fn parse(page: Page) -> Result<Node> {
        let base = header_offset(page.number);
        let data = &page.data;
        if data.len() < base + 12 {
            return Err(RliteError::Corrupt("page too small for a node".into()));
        }
        let kind = PageType::from_flag(data[base])?;
        let free_offset = format::read_be_u16(data, base + 1);
        let n_cells = format::read_be_u16(data, base + 3);
        let cells_offset = format::read_be_u16(data, base + 5);
        let right_page = if kind.is_internal() {
            format::read_be_u32(data, base + 8)
        } else {
            0
        };
        Ok(Node {
            page,
            kind,
            free_offset,
            n_cells,
            cells_offset,
            right_page,
        })
    }

    fn header_offset(&self) -> usize {
        header_offset(self.page.number)
    }

    /// Node header size: internal nodes carry the 4-byte right_page field.
    fn header_size(&self) -> usize {
        if self.kind.is_internal() {
            12
        } else {
            8
        }
    }

    /// Where the cell-offset array begins.
    fn offset_array_start(&self) -> usize {
        self.header_offset() + self.header_size()
    }

    fn cell_offset(&self, ncell: u16) -> usize {
        format::read_be_u16(&self.page.data, self.offset_array_start() + 2 * ncell as usize)
            as usize
    }

    /// Read cell `ncell`, parsing the layout that matches the node type.
    pub fn cell(&self, ncell: u16) -> Result<Cell> {
        if ncell >= self.n_cells {
            return Err(RliteError::InvalidCell(ncell));
        }
        let off = self.cell_offset(ncell);
        let data = &self.page.data;
        let fixed = match self.kind {
            PageType::TableInternal | PageType::TableLeaf => 8,
            PageType::IndexInternal => 16,
            PageType::IndexLeaf => 12,
        };
        if off + fixed > data.len() {
            return Err(RliteError::Corrupt(format!(
                "cell offset {off} out of bounds on page {}",
                self.page.number
            )));
        }
        match self.kind {
            PageType::TableInternal => {
                let child_page = format::read_be_u32(data, off);
                let (key, _) = varint::read_varint32(data, off + 4)?;
                Ok(Cell::TableInternal { key, child_page })
            }
            PageType::TableLeaf => {
                let (data_size, _) = varint::read_varint32(data, off)?;
                let (key, _) = varint::read_varint32(data, off + 4)?;
                let start = off + 8;
                let end = start
                    .checked_add(data_size as usize)
                    .filter(|&e| e <= data.len())
                    .ok_or_else(|| {
                        RliteError::Corrupt(format!(
                            "cell payload out of bounds on page {}",
                            self.page.number
                        ))
                    })?;
                Ok(Cell::TableLeaf {
                    key,
                    data: data[start..end].to_vec(),
                })
            }
            PageType::IndexInternal => {
                let child_page = format::read_be_u32(data, off);
                check_index_magic(format::read_be_u32(data, off + 4))?;
                Ok(Cell::IndexInternal {
                    key: format::read_be_u32(data, off + 8),
                    key_pk: format::read_be_u32(data, off + 12),
                    child_page,
                })
            }
            PageType::IndexLeaf => {
                check_index_magic(format::read_be_u32(data, off))?;
                Ok(Cell::IndexLeaf {
                    key: format::read_be_u32(data, off + 4),
                    key_pk: format::read_be_u32(data, off + 8),
                })
            }
        }
    }

    /// Whether the free gap can admit `cell` plus its offset-array slot.
    pub fn fits(&self, cell: &Cell) -> bool {
        let gap = (self.cells_offset as usize).saturating_sub(self.free_offset as usize);
        cell.size() + 2 <= gap
    }

    /// Insert `cell` at position `ncell`, shifting later offset-array
    /// entries up one slot. The caller guarantees space (see `fits`).
    pub fn insert_cell(&mut self, ncell: u16, cell: &Cell) -> Result<()> {
        if ncell > self.n_cells {
            return Err(RliteError::InvalidCell(ncell));
        }
        debug_assert!(self.fits(cell));

        self.cells_offset -= cell.size() as u16;
        let off = self.cells_offset as usize;
        let data = &mut self.page.data;
        match cell {
            Cell::TableInternal { key, child_page } => {
                format::write_be_u32(data, off, *child_page);
                varint::write_varint32_fixed(data, off + 4, *key);
            }
            Cell::TableLeaf { key, data: payload } => {
                varint::write_varint32_fixed(data, off, payload.len() as u32);
                varint::write_varint32_fixed(data, off + 4, *key);
                data[off + 8..off + 8 + payload.len()].copy_from_slice(payload);
            }
            Cell::IndexInternal {
                key,
                key_pk,
                child_page,
            } => {
                format::write_be_u32(data, off, *child_page);
                format::write_be_u32(data, off + 4, INDEX_CELL_MAGIC);
                format::write_be_u32(data, off + 8, *key);
                format::write_be_u32(data, off + 12, *key_pk);
            }
            Cell::IndexLeaf { key, key_pk } => {
                format::write_be_u32(data, off, INDEX_CELL_MAGIC);
                format::write_be_u32(data, off + 4, *key);
                format::write_be_u32(data, off + 8, *key_pk);
            }
        }

        let array = self.offset_array_start();
        let slot = array + 2 * ncell as usize;
        let end = array + 2 * self.n_cells as usize;
        self.page.data.copy_within(slot..end, slot + 2);
        format::write_be_u16(&mut self.page.data, slot, self.cells_offset);

        self.free_offset += 2;
        self.n_cells += 1;
        Ok(())
    }
}

fn header_offset(npage: PageNumber) -> usize {
    if npage == 1 {
        HEADER_SIZE
    } else {
        0
    }
}

fn check_index_magic(word: u32) -> Result<()> {
    if word != INDEX_CELL_MAGIC {
        return Err(RliteError::Corrupt(format!(
            "bad index cell marker: {word:#010x}"
        )));
    }
    Ok(())
}

/// A database file: the pager plus the B-tree operations over it.
pub struct BTree {
    pager: Pager,
}

impl BTree {
    /// Open a database file, validating its header. A missing or empty
    /// file is bootstrapped: default page size, file header, and an empty
    /// table leaf root on page 1.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<BTree> {
        let pager = Pager::open(path)?;
        Self::bootstrap(pager)
    }

    /// A transient in-memory database with the default page size.
    pub fn in_memory() -> Result<BTree> {
        Self::bootstrap(Pager::in_memory())
    }

    fn bootstrap(mut pager: Pager) -> Result<BTree> {
        match pager.read_header() {
            Ok(buf) => {
                let header = FileHeader::parse(&buf)?;
                pager.set_page_size(header.page_size)?;
                debug!(page_size = header.page_size, "opened existing database");
                Ok(BTree { pager })
            }
            Err(RliteError::NoHeader) => {
                pager.set_page_size(DEFAULT_PAGE_SIZE)?;
                let mut bt = BTree { pager };
                let root = bt.new_node(PageType::TableLeaf)?;
                // The fresh file's first node lands on page 1; stamp the
                // file header in front of it.
                let mut page = bt.pager.read_page(root)?;
                FileHeader::new().write(&mut page.data);
                bt.pager.write_page(&page)?;
                debug!("initialized fresh database");
                Ok(bt)
            }
            Err(e) => Err(e),
        }
    }

    /// Flush and close the file.
    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    /// Load the node stored on `npage`.
    pub fn load_node(&mut self, npage: PageNumber) -> Result<Node> {
        Node::parse(self.pager.read_page(npage)?)
    }

    /// Serialize the header scalars into the node's page and persist it.
    /// The cell area and offset array are edited in place by insert_cell,
    /// so they are already in the buffer.
    pub fn write_node(&mut self, node: &mut Node) -> Result<()> {
        let base = node.header_offset();
        let internal = node.kind.is_internal();
        let data = &mut node.page.data;
        data[base] = node.kind.to_flag();
        format::write_be_u16(data, base + 1, node.free_offset);
        format::write_be_u16(data, base + 3, node.n_cells);
        format::write_be_u16(data, base + 5, node.cells_offset);
        if internal {
            format::write_be_u32(data, base + 8, node.right_page);
        }
        self.pager.write_page(&node.page)
    }

    /// Reinitialize `npage` as an empty node of the given type and persist.
    pub fn init_empty_node(&mut self, npage: PageNumber, kind: PageType) -> Result<()> {
        let page = self.pager.read_page(npage)?;
        let base = header_offset(npage);
        let header_size = if kind.is_internal() { 12 } else { 8 };
        let mut node = Node {
            kind,
            free_offset: (base + header_size) as u16,
            n_cells: 0,
            cells_offset: self.pager.page_size() as u16,
            right_page: 0,
            page,
        };
        self.write_node(&mut node)
    }

    /// Allocate a fresh page and initialize it as an empty node.
    pub fn new_node(&mut self, kind: PageType) -> Result<PageNumber> {
        let npage = self.pager.allocate_page();
        self.init_empty_node(npage, kind)?;
        Ok(npage)
    }

    /// Look up `key` in the B-tree rooted at `nroot`. Table B-trees return
    /// an owned copy of the record payload; index B-trees return the
    /// matching keyPk as four big-endian bytes.
    pub fn find(&mut self, nroot: PageNumber, key: Key) -> Result<Vec<u8>> {
        let mut npage = nroot;
        let leaf = loop {
            let node = self.load_node(npage)?;
            if node.kind.is_leaf() {
                break node;
            }
            let mut matched = None;
            for ncell in 0..node.n_cells {
                let cell = node.cell(ncell)?;
                if key <= cell.key() {
                    matched = Some(cell);
                    break;
                }
            }
            match matched {
                None => npage = node.right_page,
                Some(Cell::IndexInternal {
                    key: cell_key,
                    key_pk,
                    child_page,
                }) => {
                    if cell_key == key {
                        return Ok(key_pk.to_be_bytes().to_vec());
                    }
                    npage = child_page;
                }
                Some(Cell::TableInternal { child_page, .. }) => npage = child_page,
                Some(_) => {
                    return Err(RliteError::Corrupt(
                        "leaf cell inside an internal node".into(),
                    ))
                }
            }
        };

        for ncell in 0..leaf.n_cells {
            let cell = leaf.cell(ncell)?;
            if key < cell.key() {
                break;
            }
            if key == cell.key() {
                return match cell {
                    Cell::TableLeaf { data, .. } => Ok(data),
                    Cell::IndexLeaf { key_pk, .. } => Ok(key_pk.to_be_bytes().to_vec()),
                    _ => Err(RliteError::Corrupt(
                        "internal cell inside a leaf node".into(),
                    )),
                };
            }
        }
        Err(RliteError::NotFound)
    }

    /// Insert a (key, record) entry into a table B-tree.
    pub fn insert_in_table(&mut self, nroot: PageNumber, key: Key, data: &[u8]) -> Result<()> {
        // A record must fit in an empty non-root leaf: 8-byte node header,
        // 2-byte offset slot, 8-byte cell prefix. Anything larger would
        // recurse through splits forever.
        let limit = self.pager.page_size().saturating_sub(18);
        if data.len() > limit {
            return Err(RliteError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "record too large for a single page",
            )));
        }
        self.insert(
            nroot,
            Cell::TableLeaf {
                key,
                data: data.to_vec(),
            },
        )
    }

    /// Insert a (keyIdx, keyPk) entry into an index B-tree.
    pub fn insert_in_index(&mut self, nroot: PageNumber, key_idx: Key, key_pk: Key) -> Result<()> {
        self.insert(
            nroot,
            Cell::IndexLeaf {
                key: key_idx,
                key_pk,
            },
        )
    }

    /// Insert a cell into the B-tree rooted at `nroot`, splitting the root
    /// first when it cannot take the cell.
    pub fn insert(&mut self, nroot: PageNumber, cell: Cell) -> Result<()> {
        let root = self.load_node(nroot)?;
        let root_full = !root.fits(&cell);
        drop(root); // release the view before the split rewrites the page
        if root_full {
            self.split(0, nroot, 0)?;
        }
        self.insert_non_full(nroot, cell)
    }

    /// Insert into a node known to have room for the cell. Internal nodes
    /// pick the child to recurse into, splitting it first if it is full.
    fn insert_non_full(&mut self, npage: PageNumber, cell: Cell) -> Result<()> {
        let node = self.load_node(npage)?;

        // Find the smallest existing key >= the new key.
        let mut ncell = 0u16;
        let mut found = None;
        while ncell < node.n_cells {
            let existing = node.cell(ncell)?;
            if cell.key() <= existing.key() {
                let clashes = node.kind.is_leaf() || node.kind == PageType::IndexInternal;
                if cell.key() == existing.key() && clashes {
                    return Err(RliteError::Duplicate(cell.key()));
                }
                found = Some(existing);
                break;
            }
            ncell += 1;
        }

        if node.kind.is_leaf() {
            let mut node = node;
            node.insert_cell(ncell, &cell)?;
            return self.write_node(&mut node);
        }

        let child_page = match &found {
            None => node.right_page,
            Some(Cell::TableInternal { child_page, .. })
            | Some(Cell::IndexInternal { child_page, .. }) => *child_page,
            Some(_) => {
                return Err(RliteError::Corrupt(
                    "leaf cell inside an internal node".into(),
                ))
            }
        };

        let child = self.load_node(child_page)?;
        let child_full = !child.fits(&cell);
        drop(child);
        drop(node); // a child split reinitializes pages; hold no views across it

        if child_full {
            self.split(npage, child_page, ncell)?;
            // Rescan this node: the median just landed here and may change
            // which child the cell belongs in.
            self.insert_non_full(npage, cell)
        } else {
            self.insert_non_full(child_page, cell)
        }
    }

    /// Split the node on `child_no` around its median. `parent_no == 0`
    /// marks a root split. Returns the page number of the new pre-median
    /// half; the cell inserted into the parent at `parent_ncell` carries
    /// the median key and points at that half.
    fn split(
        &mut self,
        parent_no: PageNumber,
        child_no: PageNumber,
        parent_ncell: u16,
    ) -> Result<PageNumber> {
        let child = self.load_node(child_no)?;
        let kind = child.kind;
        let median_ncell = child.n_cells / 2;
        let median = child.cell(median_ncell)?;
        let is_root = parent_no == 0;

        debug!(
            parent = parent_no,
            page = child_no,
            median = median.key(),
            "splitting node"
        );

        // Pre-median half: a fresh page of the same type. A table leaf
        // keeps the median row too, since the parent cell will duplicate
        // its key but not its payload.
        let left_no = self.new_node(kind)?;
        let mut left = self.load_node(left_no)?;
        let left_end = if kind == PageType::TableLeaf {
            median_ncell + 1
        } else {
            median_ncell
        };
        for i in 0..left_end {
            left.insert_cell(i, &child.cell(i)?)?;
        }
        if let Cell::TableInternal { child_page, .. } | Cell::IndexInternal { child_page, .. } =
            &median
        {
            // Keys below the median continue through the median's old child.
            left.right_page = *child_page;
        }

        // Post-median half: a second fresh page for a root split; otherwise
        // the original page is reinitialized in place so the parent's
        // pointer to it stays valid.
        let right_no = if is_root {
            self.new_node(kind)?
        } else {
            self.init_empty_node(child_no, kind)?;
            child_no
        };
        let mut right = self.load_node(right_no)?;
        let mut j = 0u16;
        for i in (median_ncell + 1)..child.n_cells {
            right.insert_cell(j, &child.cell(i)?)?;
            j += 1;
        }
        if kind.is_internal() {
            right.right_page = child.right_page;
        }

        // The parent. A root split reuses the old root page as the new
        // internal parent of the matching B-tree flavor.
        let mut parent = if is_root {
            self.init_empty_node(child_no, kind.internal_kind())?;
            self.load_node(child_no)?
        } else {
            self.load_node(parent_no)?
        };

        // The median goes up, converted to the internal flavor, pointing at
        // the pre-median half.
        let up = match median {
            Cell::TableInternal { key, .. } | Cell::TableLeaf { key, .. } => Cell::TableInternal {
                key,
                child_page: left_no,
            },
            Cell::IndexInternal { key, key_pk, .. } | Cell::IndexLeaf { key, key_pk } => {
                Cell::IndexInternal {
                    key,
                    key_pk,
                    child_page: left_no,
                }
            }
        };
        parent.insert_cell(parent_ncell, &up)?;
        if is_root {
            parent.right_page = right_no;
        }

        self.write_node(&mut parent)?;
        self.write_node(&mut right)?;
        self.write_node(&mut left)?;
        Ok(left_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (BTree, PageNumber) {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::TableLeaf).unwrap();
        (bt, root)
    }

    #[test]
    fn test_cell_codec_round_trip() {
        let mut bt = BTree::in_memory().unwrap();
        let cases = [
            (
                PageType::TableInternal,
                Cell::TableInternal {
                    key: 99,
                    child_page: 7,
                },
            ),
            (
                PageType::TableLeaf,
                Cell::TableLeaf {
                    key: 42,
                    data: b"hello".to_vec(),
                },
            ),
            (
                PageType::IndexInternal,
                Cell::IndexInternal {
                    key: 5,
                    key_pk: 77,
                    child_page: 3,
                },
            ),
            (
                PageType::IndexLeaf,
                Cell::IndexLeaf { key: 5, key_pk: 77 },
            ),
        ];
        for (kind, cell) in cases {
            let npage = bt.new_node(kind).unwrap();
            let mut node = bt.load_node(npage).unwrap();
            node.insert_cell(0, &cell).unwrap();
            bt.write_node(&mut node).unwrap();

            let node = bt.load_node(npage).unwrap();
            assert_eq!(node.cell(0).unwrap(), cell);
        }
    }

    #[test]
    fn test_cell_numbers_are_checked() {
        let (mut bt, root) = fresh();
        let node = bt.load_node(root).unwrap();
        assert!(matches!(node.cell(0), Err(RliteError::InvalidCell(0))));

        let mut node = bt.load_node(root).unwrap();
        let cell = Cell::TableLeaf {
            key: 1,
            data: vec![0],
        };
        assert!(matches!(
            node.insert_cell(1, &cell),
            Err(RliteError::InvalidCell(1))
        ));
    }

    #[test]
    fn test_space_accounting() {
        let (mut bt, root) = fresh();
        let mut node = bt.load_node(root).unwrap();
        let cell = Cell::TableLeaf {
            key: 1,
            data: vec![0xAA; 16],
        };
        assert!(node.fits(&cell));
        let before_gap = node.cells_offset - node.free_offset;
        node.insert_cell(0, &cell).unwrap();
        assert!(node.free_offset <= node.cells_offset);
        let after_gap = node.cells_offset - node.free_offset;
        assert_eq!(
            before_gap - after_gap,
            cell.size() as u16 + 2,
            "one cell plus one offset slot consumed"
        );
    }

    #[test]
    fn test_offset_array_keeps_key_order() {
        let (mut bt, root) = fresh();
        for key in [5u32, 1, 9, 3, 7] {
            bt.insert_in_table(root, key, &[key as u8]).unwrap();
        }
        let node = bt.load_node(root).unwrap();
        let keys: Vec<Key> = (0..node.n_cells)
            .map(|i| node.cell(i).unwrap().key())
            .collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_insert_then_find() {
        let (mut bt, root) = fresh();
        bt.insert_in_table(root, 7, b"a").unwrap();
        bt.insert_in_table(root, 3, b"bb").unwrap();
        bt.insert_in_table(root, 11, b"ccc").unwrap();

        assert_eq!(bt.find(root, 3).unwrap(), b"bb");
        assert_eq!(bt.find(root, 7).unwrap(), b"a");
        assert_eq!(bt.find(root, 11).unwrap(), b"ccc");
        assert!(matches!(bt.find(root, 5), Err(RliteError::NotFound)));
    }

    #[test]
    fn test_duplicate_key_leaves_tree_untouched() {
        let (mut bt, root) = fresh();
        bt.insert_in_table(root, 1, b"one").unwrap();
        bt.insert_in_table(root, 2, b"two").unwrap();

        let before = bt.load_node(root).unwrap().page.data.clone();
        assert!(matches!(
            bt.insert_in_table(root, 2, b"again"),
            Err(RliteError::Duplicate(2))
        ));
        let after = bt.load_node(root).unwrap().page.data.clone();
        assert_eq!(before, after);
    }

    #[test]
    fn test_root_split_and_find_all() {
        let (mut bt, root) = fresh();
        let payload = vec![0x5A; 200];
        for key in 1..=100u32 {
            bt.insert_in_table(root, key, &payload).unwrap();
        }
        // The root page number never changes, but its type does.
        let node = bt.load_node(root).unwrap();
        assert_eq!(node.kind, PageType::TableInternal);

        for key in 1..=100u32 {
            assert_eq!(bt.find(root, key).unwrap(), payload);
        }
        assert!(matches!(bt.find(root, 101), Err(RliteError::NotFound)));
    }

    #[test]
    fn test_split_out_of_order_inserts() {
        let (mut bt, root) = fresh();
        let payload = vec![1u8; 120];
        // Descending order forces splits on the left edge.
        for key in (1..=80u32).rev() {
            bt.insert_in_table(root, key, &payload).unwrap();
        }
        for key in 1..=80u32 {
            assert_eq!(bt.find(root, key).unwrap(), payload);
        }
    }

    #[test]
    fn test_duplicate_after_split() {
        let (mut bt, root) = fresh();
        let payload = vec![0u8; 200];
        for key in 1..=50u32 {
            bt.insert_in_table(root, key, &payload).unwrap();
        }
        assert!(matches!(
            bt.insert_in_table(root, 25, &payload),
            Err(RliteError::Duplicate(25))
        ));
    }

    #[test]
    fn test_index_insert_and_find() {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::IndexLeaf).unwrap();
        bt.insert_in_index(root, 10, 100).unwrap();
        bt.insert_in_index(root, 5, 50).unwrap();
        bt.insert_in_index(root, 20, 200).unwrap();

        assert_eq!(bt.find(root, 5).unwrap(), 50u32.to_be_bytes());
        assert_eq!(bt.find(root, 20).unwrap(), 200u32.to_be_bytes());
        assert!(matches!(bt.find(root, 6), Err(RliteError::NotFound)));
    }

    #[test]
    fn test_index_split_keeps_membership() {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::IndexLeaf).unwrap();
        // 12-byte cells, ~72 per 1024-byte page: enough for several splits.
        for key in 1..=500u32 {
            bt.insert_in_index(root, key, key * 2).unwrap();
        }
        let node = bt.load_node(root).unwrap();
        assert_eq!(node.kind, PageType::IndexInternal);
        for key in 1..=500u32 {
            assert_eq!(bt.find(root, key).unwrap(), (key * 2).to_be_bytes());
        }
    }

    #[test]
    fn test_index_duplicate_rejected() {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::IndexLeaf).unwrap();
        for key in 1..=300u32 {
            bt.insert_in_index(root, key, key).unwrap();
        }
        // Some of these now live in internal nodes; all must still clash.
        for key in [1u32, 150, 300] {
            assert!(matches!(
                bt.insert_in_index(root, key, 9999),
                Err(RliteError::Duplicate(_))
            ));
        }
    }

    #[test]
    fn test_oversized_record_rejected() {
        let (mut bt, root) = fresh();
        let too_big = vec![0u8; bt.page_size()];
        assert!(matches!(
            bt.insert_in_table(root, 1, &too_big),
            Err(RliteError::Io(_))
        ));
    }
}
