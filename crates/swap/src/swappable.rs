//! The serialization capability that makes a cown eligible for swapping.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use boc_runtime::{CownHeader, CownInner};

/// Payload types that can move between memory and disk.
///
/// A cown is *swappable* iff its payload type implements this trait; the
/// bound is checked when the generic registration path is instantiated, so
/// ineligible payloads are rejected at compile time.
pub trait Swappable: Send + 'static {
    /// Write the current value to `writer`. The engine frees the in-memory
    /// form once this returns successfully.
    fn serialize_out<W: Write>(&mut self, writer: &mut W) -> io::Result<()>;

    /// Reconstruct a value from `reader`, allocating a fresh in-memory form.
    fn serialize_in<R: Read>(reader: &mut R) -> io::Result<Self>
    where
        Self: Sized;

    /// Current in-memory byte footprint, used for eviction accounting.
    fn size(&self) -> usize;
}

impl Swappable for Vec<u8> {
    fn serialize_out<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self)
    }

    fn serialize_in<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> usize {
        self.len()
    }
}

impl Swappable for String {
    fn serialize_out<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(self.as_bytes())
    }

    fn serialize_in<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        String::from_utf8(buffer).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn size(&self) -> usize {
        self.len()
    }
}

/// Type-erased view of a swappable cown.
///
/// The registry holds `Weak<dyn SwapCown>` references so the engine can
/// observe cowns without extending their lifetime.
pub trait SwapCown: CownHeader {
    /// Recover the scheduler-facing view for behaviour construction.
    fn as_header(self: Arc<Self>) -> Arc<dyn CownHeader>;

    /// Serialize the resident payload to `path` and free the in-memory
    /// form. The payload is left untouched on error. Returns the number of
    /// bytes written.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive scheduling access to the cown.
    unsafe fn swap_out(&self, path: &Path) -> io::Result<u64>;

    /// Read `path` and restore the payload.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive scheduling access to the cown.
    unsafe fn fetch_in(&self, path: &Path) -> io::Result<()>;
}

impl<T: Swappable> SwapCown for CownInner<T> {
    fn as_header(self: Arc<Self>) -> Arc<dyn CownHeader> {
        self
    }

    unsafe fn swap_out(&self, path: &Path) -> io::Result<u64> {
        let slot = unsafe { self.payload_slot() };
        let payload = match slot.as_mut() {
            Some(payload) => payload,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "payload is not resident",
                ))
            }
        };

        let mut file = std::fs::File::create(path)?;
        payload.serialize_out(&mut file)?;
        file.sync_all()?;
        let written = file.metadata()?.len();
        *slot = None;
        Ok(written)
    }

    unsafe fn fetch_in(&self, path: &Path) -> io::Result<()> {
        let mut file = std::fs::File::open(path)?;
        let value = T::serialize_in(&mut file)?;
        unsafe { *self.payload_slot() = Some(value) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boc_runtime::Cown;
    use proptest::prelude::*;

    #[test]
    fn test_vec_round_trip() {
        let mut original = vec![0xABu8; 4096];
        let mut buffer = Vec::new();
        original.serialize_out(&mut buffer).unwrap();
        let restored = Vec::<u8>::serialize_in(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored, original);
        assert_eq!(original.size(), 4096);
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let bytes = [0xFFu8, 0xFE, 0xFD];
        let err = String::serialize_in(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_swap_out_frees_payload_and_fetch_in_restores_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.cown");
        let cown = Cown::new(vec![7u8; 1024]);
        let inner = Arc::clone(cown.inner());

        // Safety: no behaviours are in flight on this cown.
        let written = unsafe { inner.swap_out(&path) }.unwrap();
        assert_eq!(written, 1024);
        assert!(unsafe { inner.payload_slot() }.is_none());
        assert!(path.exists());

        unsafe { inner.fetch_in(&path) }.unwrap();
        assert_eq!(
            unsafe { inner.payload_slot() }.as_deref(),
            Some(&[7u8; 1024][..])
        );
    }

    #[test]
    fn test_swap_out_without_payload_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.cown");
        let cown = Cown::new(Vec::<u8>::new());
        // Safety: no behaviours are in flight on this cown.
        unsafe { cown.inner().payload_slot() }.take();
        let err = unsafe { cown.inner().swap_out(&path) }.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    proptest! {
        #[test]
        fn test_serialize_round_trip_identity(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let mut original = data.clone();
            let mut buffer = Vec::new();
            original.serialize_out(&mut buffer).unwrap();
            let restored = Vec::<u8>::serialize_in(&mut buffer.as_slice()).unwrap();
            prop_assert_eq!(restored, data);
        }

        #[test]
        fn test_string_round_trip_identity(text in ".{0,512}") {
            let mut original = text.clone();
            let mut buffer = Vec::new();
            original.serialize_out(&mut buffer).unwrap();
            let restored = String::serialize_in(&mut buffer.as_slice()).unwrap();
            prop_assert_eq!(restored, text);
        }
    }
}
