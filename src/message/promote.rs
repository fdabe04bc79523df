//! Moving extension bytes out of the unknown fields
//!
//! A message parsed before an extension was registered keeps that
//! extension's bytes among its unknown fields. Promotion re-decodes exactly
//! those bytes as the extension and splices them out.

use super::{Message, MessageValue};
use crate::error::{Error, Result};
use crate::extension_registry::ExtensionRegistry;
use crate::mini_table::MiniTableExtension;
use crate::wire::{self, DecodeOptions};
use alloc::vec::Vec;
use log::debug;

impl Message {
    /// Value of `ext`, promoting it from the unknown fields if needed
    ///
    /// Returns `Ok(None)` when the extension is neither set nor present in
    /// the unknown fields. Every occurrence is decoded, so repeated
    /// extensions collect all elements and message extensions merge.
    /// Fails with `FieldNotFound` if `ext` does not extend this message's
    /// type or the type is not extendable.
    pub fn get_or_promote_extension(
        &self,
        ext: &'static MiniTableExtension,
    ) -> Result<Option<MessageValue>> {
        if !core::ptr::eq(ext.extendee(), self.table) || !self.table.is_extendable() {
            return Err(Error::FieldNotFound);
        }
        if self.has_extension(ext) {
            return Ok(self.get_extension(ext));
        }
        let spans = self.unknown_spans(ext.number())?;
        if spans.is_empty() {
            return Ok(None);
        }

        let unknown = self.unknown();
        let bytes: Vec<u8> = spans
            .iter()
            .flat_map(|s| unknown[s.clone()].iter().copied())
            .collect();
        let mut registry = ExtensionRegistry::new();
        registry.add(&[ext])?;
        if let Err(e) = wire::decode(&bytes, self, Some(&registry), DecodeOptions::default()) {
            debug!("promoting extension {} failed: {:?}", ext.number(), e);
            self.clear_extension(ext);
            return Err(e);
        }

        // the decode may only append, so earlier spans are still valid
        for span in spans.into_iter().rev() {
            self.delete_unknown(span);
        }
        debug!(
            "promoted extension {} from {} unknown bytes",
            ext.number(),
            bytes.len()
        );
        Ok(self.get_extension(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::mini_descriptor::{field_modifier, MtDataEncoder};
    use crate::mini_table::{ExtensionSub, FieldType, MiniTable, Platform};

    fn extendable() -> &'static MiniTable {
        MiniTable::build(b"$P(", Platform::Bit64).unwrap().leak()
    }

    fn ext(
        extendee: &'static MiniTable,
        ty: FieldType,
        number: u32,
        modifiers: u64,
        sub: ExtensionSub,
    ) -> &'static MiniTableExtension {
        let mut e = MtDataEncoder::new();
        e.encode_extension(ty, number, modifiers).unwrap();
        MiniTableExtension::build(e.as_bytes(), extendee, sub, Platform::Bit64)
            .unwrap()
            .leak()
    }

    #[test]
    fn test_promote_scalar() {
        let t = extendable();
        let e = ext(t, FieldType::Int32, 100, 0, ExtensionSub::None);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        // field 100 varint 7, field 2 varint 1
        m.add_unknown(&[0xA0, 0x06, 0x07, 0x10, 0x01]).unwrap();
        let v = m.get_or_promote_extension(e).unwrap();
        assert!(matches!(v, Some(MessageValue::Int32(7))));
        assert_eq!(m.unknown(), [0x10, 0x01]);
        assert!(m.has_extension(e));
        // second call reads the typed slot
        assert!(matches!(m.get_or_promote_extension(e).unwrap(), Some(MessageValue::Int32(7))));
    }

    #[test]
    fn test_promote_absent() {
        let t = extendable();
        let e = ext(t, FieldType::Int32, 100, 0, ExtensionSub::None);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        m.add_unknown(&[0x10, 0x01]).unwrap();
        assert!(m.get_or_promote_extension(e).unwrap().is_none());
        assert_eq!(m.unknown(), [0x10, 0x01]);
    }

    #[test]
    fn test_promote_repeated_collects_every_occurrence() {
        let t = extendable();
        let e = ext(t, FieldType::Int32, 5, field_modifier::IS_REPEATED, ExtensionSub::None);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        m.add_unknown(&[0x28, 0x01, 0x10, 0x09, 0x28, 0x02]).unwrap();
        let Some(MessageValue::Array(a)) = m.get_or_promote_extension(e).unwrap() else {
            panic!("expected an array");
        };
        assert_eq!(a.len(), 2);
        assert_eq!(a.get_i32(1), Some(2));
        assert_eq!(m.unknown(), [0x10, 0x09]);
    }

    #[test]
    fn test_promote_message_extension() {
        let t = extendable();
        let sub = MiniTable::build(b"$(", Platform::Bit64).unwrap().leak();
        let e = ext(t, FieldType::Message, 9, 0, ExtensionSub::Message(sub));
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        // field 9 { field 1 = 3 }
        m.add_unknown(&[0x4A, 0x02, 0x08, 0x03]).unwrap();
        let Some(MessageValue::Message(inner)) = m.get_or_promote_extension(e).unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(inner.get_int32(sub.field(0).unwrap()), 3);
        assert_eq!(m.unknown_len(), 0);
    }

    #[test]
    fn test_promote_malformed_payload() {
        let t = extendable();
        let sub = MiniTable::build(b"$(", Platform::Bit64).unwrap().leak();
        let e = ext(t, FieldType::Message, 9, 0, ExtensionSub::Message(sub));
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        // the payload claims a second varint byte that is not there
        m.add_unknown(&[0x4A, 0x02, 0x08, 0x83]).unwrap();
        assert_eq!(m.get_or_promote_extension(e).unwrap_err(), Error::Malformed);
        assert!(!m.has_extension(e));
        assert_eq!(m.unknown_len(), 4);
    }

    #[test]
    fn test_promote_wrong_extendee() {
        let t = extendable();
        let other = extendable();
        let e = ext(other, FieldType::Int32, 100, 0, ExtensionSub::None);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        assert_eq!(m.get_or_promote_extension(e).unwrap_err(), Error::FieldNotFound);
    }
}
