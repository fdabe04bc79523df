//! minipb: arena-backed protobuf messages driven by mini-tables
//!
//! Message types are described at runtime by compact base-92
//! mini-descriptors. A [`MiniTable`](mini_table::MiniTable) built from one
//! fixes the in-memory layout of the type; messages are blobs in an
//! [`Arena`] read and written through the table's field records, and the
//! [`wire`] module converts between those blobs and the protobuf binary
//! format.
//!
//! # Layers
//!
//! ```text
//! mini_descriptor   base-92 schema strings  (MtDataEncoder)
//!       |
//! mini_table        layout, linking, enums, extensions, fast table
//!       |
//! message           blob + unknown fields + extensions + arrays + maps
//!       |
//! wire              decode / encode / length-prefixed decode
//! ```
//!
//! # Features
//!
//! - One arena per message tree; no per-field allocation or free
//! - Late linking, so recursive and mutually recursive types work
//! - Unknown fields preserved byte-for-byte and re-emitted on encode
//! - Extensions resolved through an [`ExtensionRegistry`], or promoted
//!   from the unknown fields afterwards
//! - `no_std` with `alloc`
//!
//! # Example
//!
//! ```rust
//! use minipb::mini_descriptor::MtDataEncoder;
//! use minipb::mini_table::{FieldType, MiniTable, Platform};
//! use minipb::wire::{decode, encode, DecodeOptions, EncodeOptions};
//! use minipb::{Arena, Message};
//!
//! // message { int32 id = 1; bytes name = 2; }
//! let mut enc = MtDataEncoder::new();
//! enc.start_message(0);
//! enc.put_field(FieldType::Int32, 1, 0)?;
//! enc.put_field(FieldType::Bytes, 2, 0)?;
//! let table = MiniTable::build(enc.as_bytes(), Platform::Bit64)?.leak();
//!
//! let arena = Arena::new();
//! let msg = Message::new(table, &arena)?;
//! decode(b"\x08\x2a\x12\x03abc", &msg, None, DecodeOptions::default())?;
//! assert_eq!(msg.get_int32(table.field(0).unwrap()), 42);
//! assert_eq!(msg.get_string(table.field(1).unwrap()), b"abc");
//! assert_eq!(encode(&msg, EncodeOptions::default())?, b"\x08\x2a\x12\x03abc");
//! # Ok::<(), minipb::Error>(())
//! ```

#![no_std]
#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod arena;
pub mod error;
pub mod extension_registry;
pub mod hash;
pub mod message;
pub mod mini_descriptor;
pub mod mini_table;
pub mod wire;

// Re-export main types
pub use arena::{Arena, ArenaOptions, ArenaPtr};
pub use error::{BuildError, Error, Result};
pub use extension_registry::ExtensionRegistry;
pub use message::{Array, Map, MapKey, MapValue, Message, MessageValue, StringView};
pub use mini_table::{FieldType, MiniTable, MiniTableEnum, MiniTableExtension, MiniTableField};
pub use wire::{decode, decode_length_prefixed, encode, DecodeOptions, EncodeOptions};
