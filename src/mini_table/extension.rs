//! Extension descriptors

use super::build::Parsed;
use super::field::FLAG_EXTENSION;
use super::{FieldMode, MiniTable, MiniTableEnum, MiniTableField, Platform};
use crate::error::{BuildError, Result};
use crate::mini_descriptor::VERSION_EXTENSION;
use alloc::boxed::Box;
use log::debug;

/// Table an extension field refers to
#[derive(Debug, Clone, Copy)]
pub enum ExtensionSub {
    /// Scalar or open-enum extension
    None,
    /// Message or group extension
    Message(&'static MiniTable),
    /// Closed-enum extension
    Enum(&'static MiniTableEnum),
}

/// A field declared outside its containing message
#[derive(Debug, Clone)]
pub struct MiniTableExtension {
    field: MiniTableField,
    extendee: &'static MiniTable,
    sub: ExtensionSub,
}

impl MiniTableExtension {
    /// Build from an extension descriptor (`'#'` plus one field)
    ///
    /// Extensions of a MessageSet must be singular messages.
    pub fn build(
        data: &[u8],
        extendee: &'static MiniTable,
        sub: ExtensionSub,
        platform: Platform,
    ) -> Result<MiniTableExtension> {
        let result = Self::build_inner(data, extendee, sub, platform);
        if let Err(e) = &result {
            debug!("extension build failed: {:?}", e);
        }
        result
    }

    fn build_inner(
        data: &[u8],
        extendee: &'static MiniTable,
        sub: ExtensionSub,
        platform: Platform,
    ) -> Result<MiniTableExtension> {
        let body = match data.split_first() {
            None => &[][..],
            Some((&VERSION_EXTENSION, rest)) => rest,
            Some((&other, _)) => return Err(BuildError::InvalidVersion(other).into()),
        };
        let mut parsed = Parsed::parse(body, platform, true)?;
        if parsed.fields.len() != 1 {
            return Err(BuildError::ExtensionFieldCount.into());
        }
        let Some(mut field) = parsed.fields.pop() else {
            return Err(BuildError::ExtensionFieldCount.into());
        };
        *field.mode.get_mut() |= FLAG_EXTENSION;
        field.offset = 0;
        field.presence = 0;

        if extendee.is_message_set()
            && (!field.is_sub_message() || field.mode() == FieldMode::Array)
        {
            return Err(BuildError::MessageSetExtension.into());
        }
        Ok(MiniTableExtension {
            field,
            extendee,
            sub,
        })
    }

    /// Move the extension to the heap for the rest of the program
    pub fn leak(self) -> &'static MiniTableExtension {
        Box::leak(Box::new(self))
    }

    /// The extension's field
    #[inline]
    pub fn field(&self) -> &MiniTableField {
        &self.field
    }

    /// Wire number of the extension field
    #[inline]
    pub fn number(&self) -> u32 {
        self.field.number
    }

    /// Message type being extended
    #[inline]
    pub fn extendee(&self) -> &'static MiniTable {
        self.extendee
    }

    /// Sub table of message and closed-enum extensions
    #[inline]
    pub fn sub(&self) -> ExtensionSub {
        self.sub
    }

    /// Sub-message table, if this is a message extension
    #[inline]
    pub fn sub_message(&self) -> Option<&'static MiniTable> {
        match self.sub {
            ExtensionSub::Message(t) => Some(t),
            _ => None,
        }
    }

    /// Enum table, if this is a closed-enum extension
    #[inline]
    pub fn sub_enum(&self) -> Option<&'static MiniTableEnum> {
        match self.sub {
            ExtensionSub::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Identity of this extension, as stored in message extension records
    #[inline]
    pub(crate) fn addr(&'static self) -> u64 {
        self as *const MiniTableExtension as usize as u64
    }
}
