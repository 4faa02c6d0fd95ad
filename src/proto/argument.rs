//! Byte-slice decomposition for wire messages.
//!
//! Helper to decompose a slice of binary data (an inbound control message)
//! into multiple typed fields without copying.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use zerocopy::error::ConvertError;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;

/// An iterator that can be used to fetch typed fields from a byte slice.
pub(crate) struct ArgumentIterator<'a> {
    data: &'a [u8],
}

impl<'a> ArgumentIterator<'a> {
    /// Create a new argument iterator for the given byte slice.
    pub(crate) fn new(data: &'a [u8]) -> ArgumentIterator<'a> {
        ArgumentIterator { data }
    }

    /// Returns the size of the remaining data.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Fetch a slice of all remaining bytes.
    pub(crate) fn fetch_all(&mut self) -> &'a [u8] {
        let bytes = self.data;
        self.data = &[];
        bytes
    }

    /// Fetch a typed argument. Returns `None` if there's not enough data left.
    ///
    /// Only used with byte-aligned (`align = 1`) types here: wire fields are
    /// never assumed to land at a naturally aligned offset.
    pub(crate) fn fetch<T: FromBytes + KnownLayout + Immutable>(&mut self) -> Option<&'a T> {
        match zerocopy::Ref::<_, T>::from_prefix(self.data) {
            Err(ConvertError::Alignment(_)) => {
                panic!("wire field requires alignment, which a byte stream cannot guarantee");
            }
            Err(ConvertError::Size(_)) => None,
            Err(ConvertError::Validity(infallible)) => match infallible {},
            Ok((x, rest)) => {
                self.data = rest;
                Some(zerocopy::Ref::<&[u8], T>::into_ref(x))
            }
        }
    }

    /// Fetch a slice of `count` typed elements. Returns `None` if there's not
    /// enough data left.
    pub(crate) fn fetch_slice<T: FromBytes + Immutable>(
        &mut self,
        count: usize,
    ) -> Option<&'a [T]> {
        match zerocopy::Ref::<_, [T]>::from_prefix_with_elems(self.data, count) {
            Err(ConvertError::Alignment(_)) => {
                panic!("wire field requires alignment, which a byte stream cannot guarantee");
            }
            Err(ConvertError::Size(_)) => None,
            Err(ConvertError::Validity(infallible)) => match infallible {},
            Ok((x, rest)) => {
                self.data = rest;
                Some(zerocopy::Ref::<&[u8], [T]>::into_ref(x))
            }
        }
    }

    /// Fetch a (zero-terminated) string (can be non-utf8). Returns `None` if
    /// there's not enough data left or no zero-termination could be found.
    pub(crate) fn fetch_str(&mut self) -> Option<&'a OsStr> {
        let len = memchr::memchr(0, self.data)?;
        let (out, rest) = self.data.split_at(len);
        self.data = &rest[1..];
        Some(OsStr::from_bytes(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromBytes;

    #[repr(C)]
    #[derive(FromBytes, KnownLayout, Immutable)]
    struct TestArgument {
        p1: u8,
        p2: u8,
    }

    const TEST_DATA: [u8; 6] = [0x66, 0x6f, 0x6f, 0x00, 0x62, 0x61];

    #[test]
    fn generic_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg: &TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x66);
        assert_eq!(arg.p2, 0x6f);
        assert_eq!(it.len(), 4);
    }

    #[test]
    fn string_then_remainder() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let s = it.fetch_str().unwrap();
        assert_eq!(s, "foo");
        assert_eq!(it.fetch_all(), [0x62, 0x61]);
    }

    #[test]
    fn byte_slice_fetch_never_panics_on_misalignment() {
        // u8 has align 1, so this exercises an odd starting offset safely.
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let _: &u8 = it.fetch().unwrap();
        let rest: &[u8] = it.fetch_slice(3).unwrap();
        assert_eq!(rest, [0x6f, 0x6f, 0x00]);
    }
}
