//! Error types for the minipb runtime

/// Errors that can occur while building tables, decoding, encoding or
/// manipulating messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Arena allocation failed
    OutOfMemory,
    /// Wire format was corrupt
    Malformed,
    /// A string field held invalid UTF-8
    BadUtf8,
    /// Sub-message nesting exceeded the configured depth limit
    MaxDepthExceeded,
    /// A required field was not set
    MissingRequired,
    /// A sub-message or closed enum was reached before its table was linked
    Unlinked,
    /// Value is not a member of the closed enum
    BadEnumValue,
    /// Extension registry already holds this (extendee, number) pair
    DuplicateExtension,
    /// Field does not belong to the mini-table it was used with
    FieldNotFound,
    /// Mini-table was laid out for a platform other than the running one
    IncompatibleLayout,
    /// Pointer belongs to an arena that is not fused with the target's
    ForeignArena,
    /// Mini-descriptor could not be turned into a table
    Build(BuildError),
}

impl Error {
    /// Returns a human-readable description of the error
    pub const fn description(&self) -> &'static str {
        match self {
            Error::OutOfMemory => "Arena alloc failed",
            Error::Malformed => "Wire format was corrupt",
            Error::BadUtf8 => "String field had bad UTF-8",
            Error::MaxDepthExceeded => "Exceeded the decode recursion limit",
            Error::MissingRequired => "Missing required field",
            Error::Unlinked => "Unlinked sub-message field was present",
            Error::BadEnumValue => "Value is not a member of the closed enum",
            Error::DuplicateExtension => "Extension already registered",
            Error::FieldNotFound => "Field does not belong to this mini-table",
            Error::IncompatibleLayout => "Mini-table layout does not match this platform",
            Error::ForeignArena => "Pointer belongs to an unfused arena",
            Error::Build(e) => e.description(),
        }
    }
}

impl From<BuildError> for Error {
    fn from(e: BuildError) -> Self {
        Error::Build(e)
    }
}

/// Reasons a mini-descriptor was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// Character outside the grammar at this position
    InvalidChar(u8),
    /// Leading version character is not the expected one
    InvalidVersion(u8),
    /// Encoded field type out of range
    InvalidFieldType(u8),
    /// Base-92 varint longer than 32 bits
    OverlongVarint,
    /// Field numbers must strictly increase
    FieldNumberRegression(u32),
    /// A oneof with no members
    EmptyOneof,
    /// Oneof names a field number that was never declared
    OneofNoSuchField(u32),
    /// Oneof member is repeated, required or proto3-singular
    OneofBadField(u32),
    /// FlipPacked applied to a field that cannot be packed
    FlipPackedUnpackable(u32),
    /// FlipValidateUtf8 applied to a field that is not an unvalidated string
    FlipValidateUtf8(u32),
    /// Singular or required modifier on a field without hasbit presence
    InvalidModifiers(u32),
    /// Field is marked both proto3-singular and required
    SingularAndRequired(u32),
    /// Sub-message fields always have presence
    SingularSubmessage(u32),
    /// More required fields than the presence check supports
    TooManyRequired,
    /// Laid out message exceeds 65535 bytes
    MessageSizeExceeded,
    /// Map entry does not have exactly two fields
    MapFieldCount(usize),
    /// Map entry declares a oneof
    MapOneof,
    /// Map key or value has the wrong number or type
    MapBadField(u32),
    /// MessageSet descriptors carry no fields
    MessageSetNotEmpty,
    /// Extension descriptor must hold exactly one field
    ExtensionFieldCount,
    /// Extensions cannot carry message modifiers or oneofs
    ExtensionModifiers,
    /// MessageSet extensions must be singular sub-messages
    MessageSetExtension,
    /// Enum values must be non-decreasing
    EnumValueRegression(u32),
}

impl BuildError {
    /// Returns a human-readable description of the build failure
    pub const fn description(&self) -> &'static str {
        match self {
            BuildError::InvalidChar(_) => "Invalid char in mini-descriptor",
            BuildError::InvalidVersion(_) => "Invalid mini-descriptor version",
            BuildError::InvalidFieldType(_) => "Invalid field type",
            BuildError::OverlongVarint => "Overlong varint",
            BuildError::FieldNumberRegression(_) => "Field numbers must increase",
            BuildError::EmptyOneof => "Empty oneof",
            BuildError::OneofNoSuchField(_) => "Oneof refers to an unknown field number",
            BuildError::OneofBadField(_) => {
                "Cannot add repeated, required, or singular field to oneof"
            }
            BuildError::FlipPackedUnpackable(_) => "Cannot flip packed on unpackable field",
            BuildError::FlipValidateUtf8(_) => "Cannot flip ValidateUtf8 on this field",
            BuildError::InvalidModifiers(_) => "Invalid modifier(s) for repeated field",
            BuildError::SingularAndRequired(_) => "Field cannot be both singular and required",
            BuildError::SingularSubmessage(_) => "Field cannot be a singular submessage",
            BuildError::TooManyRequired => "Too many required fields",
            BuildError::MessageSizeExceeded => {
                "Message size exceeded maximum size of 65535 bytes"
            }
            BuildError::MapFieldCount(_) => "Map entry must have exactly two fields",
            BuildError::MapOneof => "Map entry cannot have oneof",
            BuildError::MapBadField(_) => "Map key or value has an invalid number or type",
            BuildError::MessageSetNotEmpty => "Invalid message set encode length",
            BuildError::ExtensionFieldCount => "Extension must declare exactly one field",
            BuildError::ExtensionModifiers => "Extensions cannot have message modifiers or oneofs",
            BuildError::MessageSetExtension => "MessageSet extensions must be singular messages",
            BuildError::EnumValueRegression(_) => "Enum values must be non-decreasing",
        }
    }
}

#[cfg(feature = "std")]
impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidChar(c)
            | BuildError::InvalidVersion(c)
            | BuildError::InvalidFieldType(c) => {
                write!(f, "{}: {:?}", self.description(), *c as char)
            }
            BuildError::FieldNumberRegression(n)
            | BuildError::OneofNoSuchField(n)
            | BuildError::OneofBadField(n)
            | BuildError::FlipPackedUnpackable(n)
            | BuildError::FlipValidateUtf8(n)
            | BuildError::InvalidModifiers(n)
            | BuildError::SingularAndRequired(n)
            | BuildError::SingularSubmessage(n)
            | BuildError::MapBadField(n)
            | BuildError::EnumValueRegression(n) => {
                write!(f, "{} (field {})", self.description(), n)
            }
            BuildError::MapFieldCount(n) => write!(f, "{} (found {})", self.description(), n),
            _ => write!(f, "{}", self.description()),
        }
    }
}

#[cfg(feature = "std")]
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Build(e) => write!(f, "{}", e),
            _ => write!(f, "{}", self.description()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias for minipb operations
pub type Result<T> = core::result::Result<T, Error>;
