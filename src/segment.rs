use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::common::Idx;

/// A half-open range `[begin, end)` of loop indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RangeSegment {
    begin: Idx,
    end: Idx,
}

impl RangeSegment {
    /// Creates a range. An `end` before `begin` yields an empty range.
    pub fn new(begin: Idx, end: Idx) -> Self {
        RangeSegment {
            begin,
            end: end.max(begin),
        }
    }

    pub fn begin(&self) -> Idx {
        self.begin
    }

    pub fn end(&self) -> Idx {
        self.end
    }

    pub fn len(&self) -> Idx {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Returns the sub-range of up to `length` indices starting `begin` past
    /// this range's start. The result never extends past this range's end.
    #[must_use]
    pub fn slice(&self, begin: Idx, length: Idx) -> RangeSegment {
        let start = (self.begin + begin).min(self.end);
        let end = (start + length).min(self.end);
        RangeSegment { begin: start, end }
    }
}

impl From<std::ops::Range<Idx>> for RangeSegment {
    fn from(r: std::ops::Range<Idx>) -> Self {
        RangeSegment::new(r.start, r.end)
    }
}

impl Display for RangeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}
