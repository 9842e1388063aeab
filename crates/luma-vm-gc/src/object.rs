//! GC object layout

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Cycle number occupies the mark word above the color byte.
const CYCLE_SHIFT: u32 = 8;
const COLOR_MASK: u64 = 0xFF;

/// GC object header (16 bytes, repr(C)).
///
/// Marks are never erased between collections. A mark carries the
/// number of the collection cycle that made it, and a mark stamped
/// under an earlier cycle simply stops counting. The owning registry
/// keeps the cycle counter and passes the current number into
/// [`GcHeader::mark`] and [`GcHeader::set_mark`]; opening a new cycle
/// is one counter increment there, regardless of heap size.
#[repr(C)]
pub struct GcHeader {
    /// Packed mark word: color in the low byte, the stamping cycle in
    /// the remaining bits. One load decides both "which color" and
    /// "does that color still count".
    mark_word: AtomicU64,
    /// 1 while a reclamation observer wants to hear about this object's
    /// death. Consulted together with the mark by
    /// [`GcHeader::awaiting_post_mortem`].
    post_mortem: AtomicU8,
    /// Object type tag
    tag: u8,
    /// Pad the header to a multiple of the mark word's alignment.
    _pad: [u8; 6],
}

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

fn color_from_raw(raw: u8) -> MarkColor {
    match raw {
        1 => MarkColor::Gray,
        2 => MarkColor::Black,
        _ => MarkColor::White,
    }
}

impl GcHeader {
    /// Create new header
    pub const fn new(tag: u8) -> Self {
        Self {
            // Stamp 0 predates every collection (registries start their
            // counters at 1), so the object begins unmarked.
            mark_word: AtomicU64::new(0),
            post_mortem: AtomicU8::new(0),
            tag,
            _pad: [0; 6],
        }
    }

    /// The object's color in collection cycle `cycle`.
    ///
    /// A color stamped under an earlier cycle no longer counts: the
    /// object reads as White until something re-marks it.
    #[inline]
    pub fn mark(&self, cycle: u64) -> MarkColor {
        let word = self.mark_word.load(Ordering::Acquire);
        if word >> CYCLE_SHIFT != cycle {
            return MarkColor::White;
        }
        color_from_raw((word & COLOR_MASK) as u8)
    }

    /// Color the object for collection cycle `cycle`.
    ///
    /// The color and the cycle stamp are published together in one
    /// store, so a reader never sees a fresh color under a stale cycle
    /// or vice versa.
    #[inline]
    pub fn set_mark(&self, cycle: u64, color: MarkColor) {
        let word = (cycle << CYCLE_SHIFT) | color as u64;
        self.mark_word.store(word, Ordering::Release);
    }

    /// Arm the post-mortem observer for this object.
    ///
    /// The next sweep that finds this object unreachable consults the
    /// registry's post-mortem hook instead of freeing it.
    #[inline]
    pub fn arm_post_mortem(&self) {
        self.post_mortem.store(1, Ordering::Release);
    }

    /// Disarm the post-mortem observer.
    #[inline]
    pub fn disarm_post_mortem(&self) {
        self.post_mortem.store(0, Ordering::Release);
    }

    /// Whether a post-mortem observer is armed for this object.
    #[inline]
    pub fn post_mortem_armed(&self) -> bool {
        self.post_mortem.load(Ordering::Acquire) != 0
    }

    /// True when this object is unreachable in cycle `cycle` and an
    /// observer still wants to hear about its death.
    ///
    /// Such objects must keep reading as White: the sweep reports each
    /// of them (instead of freeing them), and the finalizable-referent
    /// pass refuses to color them even when a reference cycle leads
    /// back to one.
    #[inline]
    pub fn awaiting_post_mortem(&self, cycle: u64) -> bool {
        self.post_mortem_armed() && self.mark(cycle) == MarkColor::White
    }

    /// Get object tag
    pub fn tag(&self) -> u8 {
        self.tag
    }
}

/// Heap layout of a GC-managed `T`: header immediately followed by the
/// value. All allocation and header-recovery math relies on this layout.
#[repr(C)]
pub struct GcAllocation<T> {
    /// The object's GC header
    pub header: GcHeader,
    /// The managed value
    pub value: T,
}

/// Object type tags
pub mod tags {
    /// Table object
    pub const TABLE: u8 = 1;
    /// Userdata object
    pub const USERDATA: u8 = 2;
}
