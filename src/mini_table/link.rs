//! Filling sub-message and closed-enum slots after build

use super::field::MODE_MASK;
use super::{FieldMode, FieldType, MiniTable, MiniTableEnum, MiniTableField, Sub};
use core::sync::atomic::Ordering;
use log::debug;

impl MiniTable {
    /// Link the sub table of a message, group or map field
    ///
    /// Linking a map-entry table turns a repeated message field into a map
    /// field. Returns false if the field does not belong to this table, has
    /// no message slot, is incompatible with `sub`, or was already linked to
    /// a different table.
    pub fn set_sub_message(&self, field: &MiniTableField, sub: &'static MiniTable) -> bool {
        if !self.contains(field) {
            return false;
        }
        let to_map = match field.descriptor_type {
            FieldType::Message if sub.is_map_entry() => {
                if self.is_map_entry() || field.mode() == FieldMode::Scalar {
                    return false;
                }
                true
            }
            FieldType::Message => false,
            FieldType::Group if !sub.is_map_entry() => false,
            _ => return false,
        };
        let Some(Sub::Message(slot)) = self.subs.get(field.submsg_index as usize) else {
            return false;
        };
        let linked = match slot.get() {
            Some(existing) => core::ptr::eq(existing, sub),
            None => slot.set(sub).is_ok() || slot.get().is_some_and(|t| core::ptr::eq(t, sub)),
        };
        if linked && to_map {
            let mode = (field.mode_bits() & !MODE_MASK) | FieldMode::Map as u8;
            field.mode.store(mode, Ordering::Relaxed);
        }
        linked
    }

    /// Link the enum table of a closed-enum field
    pub fn set_sub_enum(&self, field: &MiniTableField, sub: &'static MiniTableEnum) -> bool {
        if !self.contains(field) || field.descriptor_type != FieldType::Enum {
            return false;
        }
        let Some(Sub::Enum(slot)) = self.subs.get(field.submsg_index as usize) else {
            return false;
        };
        match slot.get() {
            Some(existing) => core::ptr::eq(existing, sub),
            None => slot.set(sub).is_ok() || slot.get().is_some_and(|t| core::ptr::eq(t, sub)),
        }
    }

    /// Link every slot at once, in [`MiniTable::sub_list`] order
    ///
    /// `sub_tables` covers the message and group fields; a `None` entry
    /// leaves that slot unlinked. `sub_enums` covers the closed-enum fields.
    pub fn link(
        &self,
        sub_tables: &[Option<&'static MiniTable>],
        sub_enums: &[&'static MiniTableEnum],
    ) -> bool {
        let mut tables = sub_tables.iter();
        let mut enums = sub_enums.iter();
        for field in &self.fields {
            if field.is_sub_message() {
                let Some(entry) = tables.next() else {
                    debug!("link: too few sub tables for field {}", field.number);
                    return false;
                };
                if let Some(sub) = entry {
                    if !self.set_sub_message(field, sub) {
                        debug!("link: field {} rejected its sub table", field.number);
                        return false;
                    }
                }
            }
        }
        for field in &self.fields {
            if field.is_closed_enum() {
                let Some(sub) = enums.next() else {
                    debug!("link: too few enum tables for field {}", field.number);
                    return false;
                };
                if !self.set_sub_enum(field, sub) {
                    return false;
                }
            }
        }
        tables.next().is_none() && enums.next().is_none()
    }
}
