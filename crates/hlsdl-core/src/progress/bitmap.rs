//! Downloaded-segment set stored as a bitmap.

/// One bit per segment (LSB of byte 0 = segment 0).
///
/// Serializes to/from bytes for the DB BLOB. Only the first
/// `ceil(segment_count/8)` bytes are significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentBitmap {
    bytes: Vec<u8>,
}

impl SegmentBitmap {
    /// New empty bitmap with capacity for `segment_count` bits.
    pub fn new(segment_count: usize) -> Self {
        SegmentBitmap {
            bytes: vec![0u8; segment_count.div_ceil(8)],
        }
    }

    /// Deserialize from DB BLOB. Extra bytes are ignored; missing bytes treated as 0.
    pub fn from_bytes(bytes: &[u8], segment_count: usize) -> Self {
        let len = segment_count.div_ceil(8);
        let mut b = vec![0u8; len];
        let copy = bytes.len().min(len);
        b[..copy].copy_from_slice(&bytes[..copy]);
        let mut bitmap = SegmentBitmap { bytes: b };
        bitmap.clear_tail(segment_count);
        bitmap
    }

    /// Serialize for DB BLOB (exactly the bytes needed for `segment_count` bits).
    pub fn to_bytes(&self, segment_count: usize) -> Vec<u8> {
        let len = segment_count.div_ceil(8);
        let mut out = self.bytes.get(..len).unwrap_or(&self.bytes).to_vec();
        out.resize(len, 0);
        out
    }

    /// Mark segment at `index` as completed. Returns false if it already was.
    pub fn set_completed(&mut self, index: usize) -> bool {
        let byte_idx = index / 8;
        let bit = 1u8 << (index % 8);
        if byte_idx >= self.bytes.len() {
            self.bytes.resize(byte_idx + 1, 0);
        }
        let was_set = self.bytes[byte_idx] & bit != 0;
        self.bytes[byte_idx] |= bit;
        !was_set
    }

    /// Clear segment at `index`. Returns true if it was set.
    pub fn clear_completed(&mut self, index: usize) -> bool {
        let bit = 1u8 << (index % 8);
        match self.bytes.get_mut(index / 8) {
            Some(b) if *b & bit != 0 => {
                *b &= !bit;
                true
            }
            _ => false,
        }
    }

    /// True if segment at `index` is marked completed.
    pub fn is_completed(&self, index: usize) -> bool {
        let byte_idx = index / 8;
        let bit = index % 8;
        self.bytes
            .get(byte_idx)
            .map(|&b| (b & (1 << bit)) != 0)
            .unwrap_or(false)
    }

    /// Number of completed segments.
    pub fn count_completed(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Completed indices in ascending order.
    pub fn iter_completed(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes.iter().enumerate().flat_map(|(byte_idx, &b)| {
            (0..8)
                .filter(move |bit| b & (1 << bit) != 0)
                .map(move |bit| byte_idx * 8 + bit)
        })
    }

    /// True if all segments in [0, segment_count) are completed.
    pub fn all_completed(&self, segment_count: usize) -> bool {
        (0..segment_count).all(|i| self.is_completed(i))
    }

    /// Drop any bits at or beyond `segment_count`.
    fn clear_tail(&mut self, segment_count: usize) {
        let rem = segment_count % 8;
        if rem != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= (1u8 << rem) - 1;
            }
        }
    }
}
