//! # CPU Topology Types
//!
//! Processor identifiers and affinity sets. The timer core supports up to
//! [`MAX_CPUS`] processors; a [`CpuSet`] is a plain 64-bit mask over them.

use core::fmt;

/// Maximum number of processors tracked by a [`CpuSet`].
pub const MAX_CPUS: u32 = 64;

/// A processor identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// A set of processors, represented as a bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuSet(u64);

impl CpuSet {
    /// The empty set.
    pub const EMPTY: CpuSet = CpuSet(0);

    /// The set of the first `n` processors (cpu0..cpu`n-1`).
    #[inline]
    pub const fn first_n(n: u32) -> Self {
        if n == 0 {
            CpuSet(0)
        } else if n >= MAX_CPUS {
            CpuSet(u64::MAX)
        } else {
            CpuSet((1u64 << n) - 1)
        }
    }

    /// A single-CPU set.
    #[inline]
    pub const fn single(cpu: CpuId) -> Self {
        CpuSet(1u64 << (cpu.0 as u64))
    }

    /// `true` if no processor is in the set.
    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Membership test.
    #[inline(always)]
    pub const fn contains(self, cpu: CpuId) -> bool {
        cpu.0 < MAX_CPUS && (self.0 >> cpu.0) & 1 == 1
    }

    /// Add a processor to the set.
    #[inline]
    pub fn insert(&mut self, cpu: CpuId) {
        self.0 |= 1u64 << cpu.0;
    }

    /// Remove a processor from the set.
    #[inline]
    pub fn remove(&mut self, cpu: CpuId) {
        self.0 &= !(1u64 << cpu.0);
    }

    /// Set intersection.
    #[inline]
    pub const fn intersect(self, other: CpuSet) -> CpuSet {
        CpuSet(self.0 & other.0)
    }

    /// `true` if every member of `self` is also in `other`.
    #[inline]
    pub const fn is_subset_of(self, other: CpuSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Number of processors in the set.
    #[inline]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// The lowest-numbered processor in the set, the deterministic pick
    /// used when a caller leaves the affinity unspecified.
    #[inline]
    pub const fn first(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(CpuId(self.0.trailing_zeros()))
        }
    }

    /// Iterate over members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).filter_map(move |i| {
            if (self.0 >> i) & 1 == 1 {
                Some(CpuId(i))
            } else {
                None
            }
        })
    }
}

impl FromIterator<CpuId> for CpuSet {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut set = CpuSet::EMPTY;
        for cpu in iter {
            set.insert(cpu);
        }
        set
    }
}

/// A thread identifier, opaque to the timer core. Owned and interpreted by
/// the scheduler collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);
