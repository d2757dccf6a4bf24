//! Piece header and tagged dispatch.
//!
//! Every piece starts with a 16-byte [`PieceHeader`]; the caller's pointer
//! is the first byte after it. The header records which pool family owns the
//! piece (the tag byte), the size class, and one link word:
//!
//! ```text
//!   ┌──────┬───────┬──────────┬──────────────────┬────────────────────────┐
//!   │ tag  │ class │ reserved │ link             │ caller bytes ...       │
//!   │ 1 B  │ 1 B   │ 6 B      │ ptr-sized        │ usable_size            │
//!   └──────┴───────┴──────────┴──────────────────┴────────────────────────┘
//!                                                 ▲
//!                                                 └── pointer returned
//! ```
//!
//! While a piece is free, `link` is the next free piece. Once issued, the
//! header layout decides what `link` holds (see [`HeaderLayout`]).

use std::mem;
use std::ptr::{self, NonNull};

use zmem_core::config::PIECE_ALIGN;

/// Pool family named by a header's tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolTag {
    /// A size-class pool engine.
    SizeClass = 0x5A,
    /// Reserved for a large-object pool. None is configured, so dispatch
    /// on this tag is fatal.
    Large = 0x4C,
}

impl PoolTag {
    /// Decodes a raw tag byte.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x5A => Some(Self::SizeClass),
            0x4C => Some(Self::Large),
            _ => None,
        }
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self as u8
    }
}

/// Fixed-layout metadata in front of every piece.
#[derive(Debug)]
#[repr(C, align(16))]
pub struct PieceHeader {
    tag: u8,
    class: u8,
    _reserved: [u8; 6],
    link: *mut u8,
}

/// Bytes every piece reserves for its header.
pub const HEADER_SIZE: usize = mem::size_of::<PieceHeader>();

const _: () = assert!(HEADER_SIZE == PIECE_ALIGN);

impl PieceHeader {
    /// Header of a freshly carved, free piece.
    #[must_use]
    pub const fn free(class: u8, next: *mut u8) -> Self {
        Self {
            tag: PoolTag::SizeClass.raw(),
            class,
            _reserved: [0; 6],
            link: next,
        }
    }

    /// Raw tag byte; may not name any [`PoolTag`].
    #[must_use]
    pub const fn raw_tag(&self) -> u8 {
        self.tag
    }

    #[must_use]
    pub const fn class(&self) -> u8 {
        self.class
    }

    #[must_use]
    pub const fn link(&self) -> *mut u8 {
        self.link
    }

    pub fn set_link(&mut self, link: *mut u8) {
        self.link = link;
    }

    /// Header in front of a caller pointer.
    ///
    /// # Safety
    ///
    /// `user` must have been returned by a pool engine and not released.
    #[must_use]
    pub unsafe fn from_user(user: NonNull<u8>) -> NonNull<PieceHeader> {
        // SAFETY: the caller guarantees a header precedes `user`.
        unsafe { user.sub(HEADER_SIZE).cast::<PieceHeader>() }
    }

    /// Caller pointer for the piece starting at `header`.
    #[must_use]
    pub fn user_ptr(header: NonNull<PieceHeader>) -> NonNull<u8> {
        // SAFETY: every piece is at least HEADER_SIZE + 1 bytes, so the
        // caller region starts inside the same allocation.
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }
}

/// What a header records about its owner once issued.
///
/// The pool engine is generic over this; the two layouts differ only in the
/// metadata they stamp into `link` on issue.
pub trait HeaderLayout: Send + Sync + 'static {
    /// Short name used in logs and reports.
    const NAME: &'static str;

    /// Writes issue-time metadata. `owner` is the issuing pool engine.
    fn stamp_issued(header: &mut PieceHeader, owner: *const ());

    /// Owner recorded by [`stamp_issued`](Self::stamp_issued), if this
    /// layout records one.
    fn recorded_owner(header: &PieceHeader) -> Option<NonNull<()>>;
}

/// Tag and class index only. Dispatch goes through the family's class array.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedHeader;

impl HeaderLayout for IndexedHeader {
    const NAME: &'static str = "indexed";

    #[inline]
    fn stamp_issued(header: &mut PieceHeader, _owner: *const ()) {
        header.link = ptr::null_mut();
    }

    #[inline]
    fn recorded_owner(_header: &PieceHeader) -> Option<NonNull<()>> {
        None
    }
}

/// Also stamps the issuing pool's address for direct dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerHeader;

impl HeaderLayout for OwnerHeader {
    const NAME: &'static str = "owner";

    #[inline]
    fn stamp_issued(header: &mut PieceHeader, owner: *const ()) {
        header.link = owner.cast_mut().cast::<u8>();
    }

    #[inline]
    fn recorded_owner(header: &PieceHeader) -> Option<NonNull<()>> {
        NonNull::new(header.link.cast::<()>())
    }
}
