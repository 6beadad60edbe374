use bitflags::bitflags;

bitflags! {
    /// Segment flags.
    #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
    pub struct SegmentFlags: u32 {
        /// The corresponding memory page(s) are executable.
        const EXECUTABLE = 1 << 0;
        /// The corresponding memory page(s) are writable.
        const WRITABLE = 1 << 1;
        /// The corresponding memory page(s) are readable.
        const READABLE = 1 << 2;
    }
}
