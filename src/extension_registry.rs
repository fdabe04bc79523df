//! Lookup of extensions by extendee and field number

use crate::error::{Error, Result};
use crate::hash::StrTable;
use crate::mini_table::{MiniTable, MiniTableExtension};
use log::warn;

/// Key bytes: extendee address (u64 LE) then field number (u32 LE)
const KEY_SIZE: usize = 12;

#[inline]
fn key(extendee: &MiniTable, number: u32) -> [u8; KEY_SIZE] {
    let mut k = [0u8; KEY_SIZE];
    let addr = extendee as *const MiniTable as usize as u64;
    k[..8].copy_from_slice(&addr.to_le_bytes());
    k[8..].copy_from_slice(&number.to_le_bytes());
    k
}

/// Set of extensions the decoder may resolve unknown fields against
///
/// ```
/// use minipb::mini_table::{ExtensionSub, MiniTable, MiniTableExtension, Platform};
/// use minipb::ExtensionRegistry;
///
/// let extendee = MiniTable::build(b"$P", Platform::Bit64)?.leak();
/// let ext = MiniTableExtension::build(b"#(", extendee, ExtensionSub::None, Platform::Bit64)?
///     .leak();
/// let mut reg = ExtensionRegistry::new();
/// reg.add(&[ext])?;
/// assert!(reg.lookup(extendee, 1).is_some());
/// # Ok::<(), minipb::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    table: StrTable<&'static MiniTableExtension>,
}

impl ExtensionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered extensions
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Register a batch of extensions
    ///
    /// If any (extendee, number) pair is already taken, by the registry or
    /// earlier in the batch, nothing from the batch is kept and
    /// `DuplicateExtension` is returned.
    pub fn add(&mut self, exts: &[&'static MiniTableExtension]) -> Result<()> {
        for (i, ext) in exts.iter().enumerate() {
            let k = key(ext.extendee(), ext.number());
            if !self.table.insert(&k, ext) {
                warn!(
                    "extension {} registered twice, rolling back {} of the batch",
                    ext.number(),
                    i
                );
                for done in &exts[..i] {
                    self.table.remove(&key(done.extendee(), done.number()));
                }
                return Err(Error::DuplicateExtension);
            }
        }
        Ok(())
    }

    /// Extension numbered `number` on `extendee`
    #[inline]
    pub fn lookup(&self, extendee: &MiniTable, number: u32) -> Option<&'static MiniTableExtension> {
        self.table.lookup(&key(extendee, number)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_table::{ExtensionSub, Platform};

    fn extendee() -> &'static MiniTable {
        MiniTable::build(b"$P", Platform::Bit64).unwrap().leak()
    }

    fn ext(extendee: &'static MiniTable, data: &[u8]) -> &'static MiniTableExtension {
        MiniTableExtension::build(data, extendee, ExtensionSub::None, Platform::Bit64)
            .unwrap()
            .leak()
    }

    #[test]
    fn test_lookup_is_per_extendee() {
        let a = extendee();
        let b = extendee();
        let ea = ext(a, b"#(");
        let mut reg = ExtensionRegistry::new();
        reg.add(&[ea]).unwrap();
        assert!(core::ptr::eq(reg.lookup(a, 1).unwrap(), ea));
        assert!(reg.lookup(b, 1).is_none());
        assert!(reg.lookup(a, 2).is_none());
    }

    #[test]
    fn test_duplicate_rolls_back_batch() {
        let a = extendee();
        let first = ext(a, b"#(");
        let mut reg = ExtensionRegistry::new();
        reg.add(&[first]).unwrap();

        let two = ext(a, b"#a("); // number 2
        let dup = ext(a, b"#(");
        assert_eq!(reg.add(&[two, dup]), Err(Error::DuplicateExtension));
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup(a, 2).is_none());
        assert!(core::ptr::eq(reg.lookup(a, 1).unwrap(), first));
    }

    #[test]
    fn test_duplicate_within_batch() {
        let a = extendee();
        let x = ext(a, b"#(");
        let y = ext(a, b"#(");
        let mut reg = ExtensionRegistry::new();
        assert_eq!(reg.add(&[x, y]), Err(Error::DuplicateExtension));
        assert!(reg.is_empty());
    }
}
