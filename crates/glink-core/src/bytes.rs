//! Safe byte-slice views over constant storage for buffer uploads.

/// Plain numeric element that can be viewed as raw bytes.
///
/// # Safety
///
/// Only implement on primitive numeric types with no padding, pointers or
/// invalid bit patterns.
pub unsafe trait AsBytes: Copy + Sized {
    /// View `self` as a byte slice of length `size_of::<Self>()`.
    fn as_bytes(&self) -> &[u8] {
        slice_as_bytes(std::slice::from_ref(self))
    }
}

unsafe impl AsBytes for f32 {}
unsafe impl AsBytes for f64 {}
unsafe impl AsBytes for i32 {}
unsafe impl AsBytes for u32 {}

/// View a slice of numeric elements as its native-endian bytes.
pub fn slice_as_bytes<T: AsBytes>(values: &[T]) -> &[u8] {
    // SAFETY: `AsBytes` is only implemented for padding-free primitives, and
    // `u8` has alignment 1.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_native_endian_bytes() {
        let values = [1.0f32, -2.5];
        let bytes = slice_as_bytes(&values);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_ne_bytes());
        assert_eq!(7u32.as_bytes(), &7u32.to_ne_bytes());
    }
}
