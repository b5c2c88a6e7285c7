/// A packed head word.
///
/// The low half of the word is a slot reference, stored as `index + 1` so
/// that zero doubles as the empty list, and the high half is a 32-bit tag:
/// a list generation for [`RecyclingStack`](crate::RecyclingStack), or a
/// per-node push stamp for [`PackedStack`](crate::PackedStack). Packing
/// both into one `u64` makes the (reference, tag) pair atomically
/// comparable, which is what defeats the ABA problem when slots are
/// reused: a stale head can never CAS successfully, because every reuse of
/// a slot is published with a different tag.
pub(crate) struct Tagged {
    pub raw: u64,
}

impl Tagged {
    /// Packs a slot index and a tag.
    #[inline]
    pub fn new(index: u32, tag: u32) -> Tagged {
        // `u32::MAX` would wrap the `index + 1` encoding into `NIL`.
        assert!(index < u32::MAX, "slot index overflows the packed head word");
        Tagged {
            raw: ((tag as u64) << 32) | (index as u64 + 1),
        }
    }

    /// The empty list, carrying the given tag.
    #[inline]
    pub fn empty(tag: u32) -> Tagged {
        Tagged {
            raw: (tag as u64) << 32,
        }
    }

    /// Reinterprets a raw head word.
    #[inline]
    pub fn from_raw(raw: u64) -> Tagged {
        Tagged { raw }
    }

    /// Packs a raw slot reference, as returned by [`Tagged::slot_ref`],
    /// with a new tag.
    #[inline]
    pub fn from_ref(slot: u32, tag: u32) -> Tagged {
        Tagged {
            raw: ((tag as u64) << 32) | slot as u64,
        }
    }

    /// Returns the slot index, or `None` for the empty list.
    #[inline]
    pub fn index(&self) -> Option<u32> {
        (self.raw as u32).checked_sub(1)
    }

    /// The encoded slot reference (`index + 1`, or `NIL`).
    #[inline]
    pub fn slot_ref(&self) -> u32 {
        self.raw as u32
    }

    /// The tag half of the word.
    #[inline]
    pub fn tag(&self) -> u32 {
        (self.raw >> 32) as u32
    }
}

impl Copy for Tagged {}

impl Clone for Tagged {
    fn clone(&self) -> Self {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for index in [0, 1, 31, 1 << 20, u32::MAX - 1] {
            for tag in [0, 1, u32::MAX - 1, u32::MAX] {
                let word = Tagged::new(index, tag);
                assert_eq!(word.index(), Some(index));
                assert_eq!(word.tag(), tag);

                // Survives a trip through the raw representation.
                let word = Tagged::from_raw(word.raw);
                assert_eq!(word.index(), Some(index));
                assert_eq!(word.tag(), tag);
            }
        }
    }

    #[test]
    fn empty_preserves_tag() {
        for tag in [0, 1, 42, u32::MAX] {
            let word = Tagged::empty(tag);
            assert_eq!(word.index(), None);
            assert_eq!(word.slot_ref(), 0);
            assert_eq!(word.tag(), tag);
        }
    }

    #[test]
    fn ref_round_trip() {
        let word = Tagged::new(7, 3);
        let relinked = Tagged::from_ref(word.slot_ref(), 4);
        assert_eq!(relinked.index(), Some(7));
        assert_eq!(relinked.tag(), 4);

        let empty = Tagged::from_ref(Tagged::empty(9).slot_ref(), 10);
        assert_eq!(empty.index(), None);
        assert_eq!(empty.tag(), 10);
    }

    #[test]
    fn distinct_generations_compare_unequal() {
        // The same slot pushed twice must never produce the same word.
        assert_ne!(Tagged::new(3, 1).raw, Tagged::new(3, 2).raw);
        // Nor can an empty list be confused with any non-empty one.
        assert_ne!(Tagged::empty(1).raw, Tagged::new(0, 1).raw);
    }

    #[test]
    #[should_panic(expected = "overflows the packed head word")]
    fn index_overflow() {
        let _ = Tagged::new(u32::MAX, 0);
    }
}
