//! Immutable, reference-counted byte buffer shared between rows

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytemuck::Pod;

/// Buffer holding raw bytes with cheap cloning
///
/// Clones share the same allocation; the bytes are never mutated after
/// construction, so a tensor can be handed to several consumers without
/// copying.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Buffer {
    bytes: Arc<[u8]>,
}

impl Buffer {
    /// Create a buffer that takes ownership of `bytes`
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Create a new buffer by copying typed values
    pub fn from_slice<T: Pod>(data: &[T]) -> Self {
        Self {
            bytes: Arc::from(bytemuck::cast_slice::<T, u8>(data)),
        }
    }

    /// Create a buffer by concatenating several buffers
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Buffer>) -> Self {
        let mut bytes = Vec::new();
        for part in parts {
            bytes.extend_from_slice(part);
        }
        Self::from_vec(bytes)
    }

    /// Get the size of the buffer in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the buffer as a sequence of `T`
    ///
    /// The buffer carries no alignment guarantee, so values are read one by
    /// one. Trailing bytes that do not form a whole `T` are ignored.
    pub fn to_typed_vec<T: Pod>(&self) -> Vec<T> {
        self.bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    /// Get the current reference count
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("size", &self.size()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip_is_unaligned_safe() {
        let buffer = Buffer::from_slice(&[1.5f32, -2.0, 3.25]);
        assert_eq!(buffer.size(), 12);
        assert_eq!(buffer.to_typed_vec::<f32>(), vec![1.5, -2.0, 3.25]);
    }

    #[test]
    fn clones_share_storage() {
        let a = Buffer::from_vec(vec![1, 2, 3]);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(&*b, &[1, 2, 3]);
    }

    #[test]
    fn concat_appends_in_order() {
        let a = Buffer::from_vec(vec![1, 2]);
        let b = Buffer::from_vec(vec![3]);
        assert_eq!(&*Buffer::concat([&a, &b]), &[1, 2, 3]);
    }
}
