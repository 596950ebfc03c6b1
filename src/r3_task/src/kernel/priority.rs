//! Task priorities
use core::fmt;

use super::raw::KernelBase;

/// The symbolic priority vocabulary.
///
/// Each level is resolved against the kernel's number of distinct priorities
/// (`MAX_PRIORITIES`, written `N` below) by [`PriorityLevel::resolve`]. A
/// higher resolved value is more urgent. When `N` is small, several levels
/// collapse onto the same value.
///
/// | `N`       | 1 | 2 | 3 | 4 | 5 | 6 | `N > 6`   |
/// |-----------|---|---|---|---|---|---|-----------|
/// | `Idle`    | 0 | 0 | 0 | 0 | 0 | 0 | 0         |
/// | `Low`     | 0 | 1 | 1 | 1 | 1 | 1 | 1         |
/// | `Hmi`     | 0 | 1 | 1 | 1 | 1 | 2 | 2         |
/// | `Mid`     | 0 | 1 | 1 | 2 | 2 | 3 | `N / 2`   |
/// | `High`    | 0 | 1 | 2 | 3 | 3 | 4 | `N - 2`   |
/// | `Highest` | 0 | 1 | 2 | 3 | 4 | 5 | `N - 1`   |
///
/// The resolved values never decrease along the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
    /// The kernel's idle priority.
    Idle,
    /// The lowest priority above idle.
    Low,
    /// "Human-machine interface" priority, just above `Low` when the kernel
    /// has enough levels.
    Hmi,
    /// The midpoint of the range.
    Mid,
    /// Just below `Highest` when the kernel has enough levels.
    High,
    /// The highest priority the kernel supports.
    Highest,
}

impl PriorityLevel {
    /// All levels in increasing order of urgency.
    pub const ALL: [Self; 6] = [
        Self::Idle,
        Self::Low,
        Self::Hmi,
        Self::Mid,
        Self::High,
        Self::Highest,
    ];

    /// Resolve the level against a kernel with `max_priorities` distinct
    /// priorities. The result is always less than `max_priorities`.
    ///
    /// # Panics
    ///
    /// Panics if `max_priorities` is zero. In a constant context this is a
    /// compile error.
    ///
    /// # Examples
    ///
    /// ```
    /// use r3_task::kernel::PriorityLevel;
    /// assert_eq!(PriorityLevel::Mid.resolve(32), 16);
    /// assert_eq!(PriorityLevel::High.resolve(5), 3);
    /// assert_eq!(PriorityLevel::Highest.resolve(1), 0);
    /// ```
    pub const fn resolve(self, max_priorities: usize) -> usize {
        assert!(max_priorities > 0, "`max_priorities` must be non-zero");
        let n = max_priorities;
        let low = (n > 1) as usize;
        match self {
            Self::Idle => 0,
            Self::Low => low,
            Self::Hmi => low + (n > 5) as usize,
            Self::Mid => n / 2,
            Self::High => n - 1 - (n > 4) as usize,
            Self::Highest => n - 1,
        }
    }
}

/// A raw task priority as understood by the kernel.
///
/// Use [`Priority::from_level`] to name one of the symbolic levels, or
/// [`Priority::new`] for any other value. Values at or above the kernel's
/// `MAX_PRIORITIES` are handled by the kernel (typically clamped).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(usize);

impl Priority {
    /// The idle priority, which is zero on every kernel.
    pub const IDLE: Self = Self(0);

    /// Construct a `Priority` from a raw kernel priority.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Resolve a symbolic level against `System::MAX_PRIORITIES`.
    #[inline]
    pub const fn from_level<System: KernelBase>(level: PriorityLevel) -> Self {
        Self(level.resolve(System::MAX_PRIORITIES))
    }

    /// Get the raw kernel priority.
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Priority").field(&self.0).finish()
    }
}

impl From<Priority> for usize {
    #[inline]
    fn from(x: Priority) -> Self {
        x.0
    }
}

/// Values that can be converted into a [`Priority`] for `System`.
///
/// Implemented by [`Priority`] itself and by [`PriorityLevel`], which needs
/// to know the kernel to be resolved.
pub trait IntoPriority<System: KernelBase> {
    fn into_priority(self) -> Priority;
}

impl<System: KernelBase> IntoPriority<System> for Priority {
    #[inline]
    fn into_priority(self) -> Priority {
        self
    }
}

impl<System: KernelBase> IntoPriority<System> for PriorityLevel {
    #[inline]
    fn into_priority(self) -> Priority {
        Priority::from_level::<System>(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn table_small() {
        use PriorityLevel::*;
        // (N, [Idle, Low, Hmi, Mid, High, Highest])
        let table: [(usize, [usize; 6]); 6] = [
            (1, [0, 0, 0, 0, 0, 0]),
            (2, [0, 1, 1, 1, 1, 1]),
            (3, [0, 1, 1, 1, 2, 2]),
            (4, [0, 1, 1, 2, 3, 3]),
            (5, [0, 1, 1, 2, 3, 4]),
            (6, [0, 1, 2, 3, 4, 5]),
        ];
        for (n, expected) in table {
            let actual = [Idle, Low, Hmi, Mid, High, Highest].map(|l| l.resolve(n));
            assert_eq!(actual, expected, "N = {n}");
        }
    }

    #[test]
    fn table_large() {
        use PriorityLevel::*;
        for n in 7..=64 {
            assert_eq!(Idle.resolve(n), 0);
            assert_eq!(Low.resolve(n), 1);
            assert_eq!(Hmi.resolve(n), 2);
            assert_eq!(Mid.resolve(n), n / 2);
            assert_eq!(High.resolve(n), n - 2);
            assert_eq!(Highest.resolve(n), n - 1);
        }
    }

    #[test]
    #[should_panic]
    fn zero_levels() {
        let _ = PriorityLevel::Idle.resolve(0);
    }

    #[quickcheck]
    fn monotonic(n: u16) -> bool {
        let n = n as usize + 1;
        PriorityLevel::ALL
            .windows(2)
            .all(|w| w[0].resolve(n) <= w[1].resolve(n))
    }

    #[quickcheck]
    fn in_range(n: u16) -> bool {
        let n = n as usize + 1;
        PriorityLevel::ALL.iter().all(|l| l.resolve(n) < n)
    }

    #[quickcheck]
    fn extremes(n: u16) -> bool {
        let n = n as usize + 1;
        PriorityLevel::Idle.resolve(n) == 0 && PriorityLevel::Highest.resolve(n) == n - 1
    }

    #[test]
    fn const_context() {
        const MID: usize = PriorityLevel::Mid.resolve(10);
        assert_eq!(MID, 5);
    }
}
