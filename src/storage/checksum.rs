// CRC32 checksum helper shared by page.rs and the redo/binlog framing.

/// CRC32 of `data`, used for page checksums and log record framing.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
