// Page-based I/O layer between the B-tree engine and the filesystem.
//
// The pager hands out owned page buffers: every read yields a fresh view of
// the page, a view is released by dropping it, and changes reach the file
// only through write_page. Cache policy is deliberately absent.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, RliteError};
use crate::format::HEADER_SIZE;

/// A page number. Page 1 is the first page (it contains the file header).
/// Page 0 is invalid.
pub type PageNumber = u32;

/// A single database page.
#[derive(Debug, Clone)]
pub struct Page {
    /// The page number (1-based).
    pub number: PageNumber,
    /// Raw page data, page_size bytes.
    pub data: Vec<u8>,
}

enum Backing {
    File(File),
    Memory(Vec<Vec<u8>>),
}

/// Reads and writes fixed-size pages from/to the backing store.
pub struct Pager {
    backing: Backing,
    page_size: usize,
    n_pages: u32,
}

impl Pager {
    /// Open a database file, creating it if it does not exist. The page
    /// size is unknown until `set_page_size` is called (the caller reads it
    /// from the header, or picks the default for a fresh file).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened database file");
        Ok(Self {
            backing: Backing::File(file),
            page_size: 0,
            n_pages: 0,
        })
    }

    /// A pager with no backing file (tests, transient databases).
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            page_size: 0,
            n_pages: 0,
        }
    }

    /// Read the 100-byte file header. `NoHeader` means the file is new or
    /// too short to contain one.
    pub fn read_header(&mut self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        match &mut self.backing {
            Backing::File(file) => {
                if file.metadata()?.len() < HEADER_SIZE as u64 {
                    return Err(RliteError::NoHeader);
                }
                file.seek(SeekFrom::Start(0))?;
                file.read_exact(&mut buf)?;
            }
            Backing::Memory(pages) => match pages.first() {
                Some(p) if p.len() >= HEADER_SIZE => buf.copy_from_slice(&p[..HEADER_SIZE]),
                _ => return Err(RliteError::NoHeader),
            },
        }
        Ok(buf)
    }

    /// Set the page size and recompute the page count from the backing size.
    pub fn set_page_size(&mut self, size: u16) -> Result<()> {
        self.page_size = size as usize;
        self.n_pages = match &self.backing {
            Backing::File(file) => (file.metadata()?.len() / size as u64) as u32,
            Backing::Memory(pages) => pages.len() as u32,
        };
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Total number of pages, including ones allocated but not yet written.
    pub fn page_count(&self) -> u32 {
        self.n_pages
    }

    /// Allocate a new page number. The page materializes zero-filled on
    /// first read and reaches the backing store on first write.
    pub fn allocate_page(&mut self) -> PageNumber {
        self.n_pages += 1;
        self.n_pages
    }

    /// Read a page into a fresh owned buffer. Pages past the current end of
    /// the backing store read back zero-filled.
    pub fn read_page(&mut self, number: PageNumber) -> Result<Page> {
        if number == 0 || number > self.n_pages {
            return Err(RliteError::InvalidPage(number));
        }
        let mut data = vec![0u8; self.page_size];
        match &mut self.backing {
            Backing::File(file) => {
                let offset = (number as u64 - 1) * self.page_size as u64;
                let len = file.metadata()?.len();
                if offset < len {
                    let available = ((len - offset) as usize).min(self.page_size);
                    file.seek(SeekFrom::Start(offset))?;
                    file.read_exact(&mut data[..available])?;
                }
            }
            Backing::Memory(pages) => {
                if let Some(stored) = pages.get(number as usize - 1) {
                    data[..stored.len()].copy_from_slice(stored);
                }
            }
        }
        Ok(Page { number, data })
    }

    /// Persist a page to the backing store.
    pub fn write_page(&mut self, page: &Page) -> Result<()> {
        if page.number == 0 || page.number > self.n_pages {
            return Err(RliteError::InvalidPage(page.number));
        }
        match &mut self.backing {
            Backing::File(file) => {
                let offset = (page.number as u64 - 1) * self.page_size as u64;
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(&page.data)?;
            }
            Backing::Memory(pages) => {
                while pages.len() < page.number as usize {
                    pages.push(vec![0u8; self.page_size]);
                }
                pages[page.number as usize - 1] = page.data.clone();
            }
        }
        Ok(())
    }

    /// Flush and close the backing store.
    pub fn close(mut self) -> Result<()> {
        if let Backing::File(file) = &mut self.backing {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let mut pager = Pager::in_memory();
        pager.set_page_size(1024).unwrap();

        let p1 = pager.allocate_page();
        assert_eq!(p1, 1);
        let p2 = pager.allocate_page();
        assert_eq!(p2, 2);

        let mut page = pager.read_page(p2).unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
        page.data[0] = 0x42;
        pager.write_page(&page).unwrap();

        let page = pager.read_page(p2).unwrap();
        assert_eq!(page.data[0], 0x42);
    }

    #[test]
    fn test_invalid_page_numbers() {
        let mut pager = Pager::in_memory();
        pager.set_page_size(1024).unwrap();
        assert!(matches!(
            pager.read_page(0),
            Err(RliteError::InvalidPage(0))
        ));
        assert!(matches!(
            pager.read_page(1),
            Err(RliteError::InvalidPage(1))
        ));
    }

    #[test]
    fn test_fresh_file_has_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("t.db")).unwrap();
        assert!(matches!(pager.read_header(), Err(RliteError::NoHeader)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let mut pager = Pager::open(&db_path).unwrap();
            pager.set_page_size(1024).unwrap();
            let p1 = pager.allocate_page();
            let mut page = pager.read_page(p1).unwrap();
            page.data[0] = 0xAB;
            page.data[1023] = 0xCD;
            pager.write_page(&page).unwrap();
            pager.close().unwrap();
        }

        {
            let mut pager = Pager::open(&db_path).unwrap();
            pager.set_page_size(1024).unwrap();
            assert_eq!(pager.page_count(), 1);
            let page = pager.read_page(1).unwrap();
            assert_eq!(page.data[0], 0xAB);
            assert_eq!(page.data[1023], 0xCD);
        }
    }

    #[test]
    fn test_allocated_page_reads_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("t.db")).unwrap();
        pager.set_page_size(512).unwrap();
        let p = pager.allocate_page();
        let page = pager.read_page(p).unwrap();
        assert_eq!(page.data.len(), 512);
        assert!(page.data.iter().all(|&b| b == 0));
    }
}
