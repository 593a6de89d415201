//! The interface between the ordering engine and whatever object model the caller uses. The
//! engine never looks inside a linker's section representation directly. Callers implement
//! [`Section`] and [`Symbol`] for their own types, then hand us a slice of sections. Within one
//! ordering request, a section's identity is its index in that slice.

use std::fmt::Display;

/// Index of a section within the slice passed to [`crate::order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionIndex(u32);

impl SectionIndex {
    pub fn from_usize(value: usize) -> Self {
        Self(u32::try_from(value).expect("section indexes overflowed 32 bits"))
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// An input section as seen by the ordering engine.
pub trait Section {
    type Symbol<'sym>: Symbol
    where
        Self: 'sym;

    fn name(&self) -> &[u8];

    /// Whether the section holds executable code. Anything else is treated as data.
    fn is_code(&self) -> bool;

    fn size(&self) -> u64;

    /// Whether the section has bytes in the object file. False for zero-fill sections like bss,
    /// which are never hashed but still get a position.
    fn has_content(&self) -> bool;

    /// The section's raw bytes. Empty when `has_content` is false.
    fn content(&self) -> &[u8];

    /// Symbols defined in this section. Symbols a caller cannot attribute to exactly one section
    /// should be reported by none.
    fn symbols(&self) -> impl Iterator<Item = Self::Symbol<'_>>;

    /// Relocations that apply to this section's content, with their targets already resolved as
    /// far as the caller is able to.
    fn relocations(&self) -> impl Iterator<Item = Relocation> + '_;
}

/// A symbol defined in some section.
pub trait Symbol {
    fn name(&self) -> &[u8];

    fn is_defined(&self) -> bool;

    /// The symbol's offset within its section.
    fn value(&self) -> u64;

    fn size(&self) -> u64;
}

impl<T: Symbol + ?Sized> Symbol for &T {
    fn name(&self) -> &[u8] {
        (**self).name()
    }

    fn is_defined(&self) -> bool {
        (**self).is_defined()
    }

    fn value(&self) -> u64 {
        (**self).value()
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// A relocation, reduced to the parts the ordering engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Offset within the section's content at which the relocation applies.
    pub offset: u64,

    /// Architecture-specific relocation type.
    pub kind: u32,

    pub addend: i64,

    /// Number of bytes the relocation writes.
    pub size: u8,

    pub target: RelocationTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationTarget {
    /// The relocation's symbol resolved to a definition.
    Defined {
        /// The section containing the definition, if it's one of the sections being ordered.
        /// Absolute symbols have no section.
        section: Option<SectionIndex>,

        /// The symbol's offset within `section`, or its absolute value.
        value: u64,
    },

    /// The target couldn't be resolved, e.g. an undefined symbol.
    Unresolved,
}

impl Display for SectionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}
