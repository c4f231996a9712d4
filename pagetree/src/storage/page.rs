//! Page types and constants for the storage engine.
//!
//! Pages are the fundamental unit of I/O. The page size is chosen when the
//! environment is created (a power of two, 4KB by default) and never changes
//! afterwards, so page buffers are sized at runtime rather than by a constant.

/// Default page size in bytes (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size (entry counts are stored as u16).
pub const MAX_PAGE_SIZE: usize = 65536;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// B-tree branch node
    Branch = 0x03,
    /// B-tree leaf node
    Leaf = 0x04,
    /// First page of an overflow run
    Overflow = 0x05,
    /// Persisted free list page
    FreeList = 0x06,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x03 => Ok(Self::Branch),
            0x04 => Ok(Self::Leaf),
            0x05 => Ok(Self::Overflow),
            0x06 => Ok(Self::FreeList),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every page except the two
/// superblock slots.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `entry_count`: 2 bytes
/// - `checksum`: 4 bytes (CRC32)
/// - `page_id`: 8 bytes
/// - `overflow_size`: 4 bytes (value length, overflow pages only)
/// - `reserved`: 4 bytes
///
/// Total: 24 bytes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub entry_count: u16,
    pub checksum: u32,
    pub page_id: PageId,
    pub overflow_size: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 24;

    /// Byte range of the checksum field.
    const CHECKSUM_RANGE: std::ops::Range<usize> = 4..8;

    /// Create a header for a page of the given type.
    #[must_use]
    pub const fn new(page_type: PageType, page_id: PageId) -> Self {
        Self {
            page_type,
            flags: 0,
            entry_count: 0,
            checksum: 0,
            page_id,
            overflow_size: 0,
        }
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.page_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.overflow_size.to_le_bytes());
        // bytes 20-23 reserved
        buf
    }

    /// Deserialize a header from the start of a page.
    pub fn from_page(page: &Page) -> Result<Self, PageError> {
        let page_type = PageType::try_from(page.read_u8(0)).map_err(PageError::InvalidPageType)?;

        Ok(Self {
            page_type,
            flags: page.read_u8(1),
            entry_count: page.read_u16(2),
            checksum: page.read_u32(4),
            page_id: page.read_u64(8),
            overflow_size: page.read_u32(16),
        })
    }
}

/// A raw page buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `page_size` bytes.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            data: vec![0u8; page_size].into_boxed_slice(),
        }
    }

    /// Create a page from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Size of this page in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    /// Get the raw page data.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub const fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u16 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a u16 (little-endian) at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Compute CRC32 checksum of the page data (excluding the checksum field itself).
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..PageHeader::CHECKSUM_RANGE.start]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[PageHeader::CHECKSUM_RANGE.end..]);
        hasher.finalize()
    }

    /// Compute and store the checksum in the header.
    pub fn seal(&mut self) {
        let checksum = self.compute_checksum();
        self.write_u32(PageHeader::CHECKSUM_RANGE.start, checksum);
    }

    /// Verify the stored checksum against the page contents.
    pub fn verify_checksum(&self) -> Result<(), PageError> {
        let expected = self.read_u32(PageHeader::CHECKSUM_RANGE.start);
        let actual = self.compute_checksum();
        if expected == actual {
            Ok(())
        } else {
            Err(PageError::ChecksumMismatch { expected, actual })
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("size", &self.data.len())
            .field("first_16_bytes", &&self.data[..16.min(self.data.len())])
            .finish_non_exhaustive()
    }
}

/// Number of pages needed to hold `bytes` bytes.
#[must_use]
pub const fn pages_for(bytes: usize, page_size: usize) -> u64 {
    bytes.div_ceil(page_size) as u64
}

/// Errors related to page operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for PageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_header_roundtrip() {
        let header = PageHeader {
            page_type: PageType::Leaf,
            flags: 0x42,
            entry_count: 17,
            checksum: 0xDEAD_BEEF,
            page_id: 99,
            overflow_size: 1234,
        };

        let mut page = Page::new(DEFAULT_PAGE_SIZE);
        page.write_bytes(0, &header.to_bytes());
        let restored = PageHeader::from_page(&page).expect("should parse");

        assert_eq!(restored, header);
    }

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new(DEFAULT_PAGE_SIZE);

        page.write_u8(0, 0xFF);
        assert_eq!(page.read_u8(0), 0xFF);

        page.write_u16(50, 0xBEEF);
        assert_eq!(page.read_u16(50), 0xBEEF);

        page.write_u32(100, 0x1234_5678);
        assert_eq!(page.read_u32(100), 0x1234_5678);

        page.write_u64(200, 0x0102_0304_0506_0708);
        assert_eq!(page.read_u64(200), 0x0102_0304_0506_0708);

        page.write_bytes(500, b"hello");
        assert_eq!(page.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_page_type_conversion() {
        assert_eq!(PageType::try_from(0x03), Ok(PageType::Branch));
        assert_eq!(PageType::try_from(0x04), Ok(PageType::Leaf));
        assert!(PageType::try_from(0x01).is_err());
        assert!(PageType::try_from(0xFF).is_err());
        assert!(PageType::try_from(0x00).is_err());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page = Page::new(1024);
        page.write_bytes(0, &PageHeader::new(PageType::Leaf, 7).to_bytes());
        page.write_bytes(100, b"payload");
        page.seal();
        assert!(page.verify_checksum().is_ok());

        page.write_u8(101, b'X');
        assert!(matches!(
            page.verify_checksum(),
            Err(PageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(1, 4096), 1);
        assert_eq!(pages_for(4096, 4096), 1);
        assert_eq!(pages_for(4097, 4096), 2);
        assert_eq!(pages_for(8192 + PageHeader::SIZE, 4096), 3);
    }
}
