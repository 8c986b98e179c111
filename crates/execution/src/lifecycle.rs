//! Order lifecycle, per symbol and cycle.
//!
//! The executor drives these states and reports the last one reached; the
//! transition table makes the legal paths explicit instead of leaving them
//! implicit in conditionals on order type/flag fields.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No working entry order and no position.
    NoOrder,
    /// Entry order accepted by the exchange, not yet filled.
    EntryPlaced,
    /// A non-zero position exists (partial fills count).
    Filled,
    /// Entry order aged past its TTL and was cancelled.
    Expired,
    /// Entry order cancelled for a non-TTL reason (drift, poor reward).
    Cancelled,
    /// Stop-loss and take-profit protection verified present.
    ProtectionEnsured,
    /// Remaining protection replaced by a trailing stop.
    TrailingPromoted,
    /// Position fully closed; protection purged.
    Flat,
}

impl LifecycleState {
    /// Legal forward transitions. `Flat` is terminal for a cycle; a new
    /// cycle starts over at `NoOrder`.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use LifecycleState::{
            Cancelled, EntryPlaced, Expired, Filled, Flat, NoOrder, ProtectionEnsured,
            TrailingPromoted,
        };
        matches!(
            (self, next),
            (NoOrder, EntryPlaced)
                // positions can appear from a prior cycle's entry
                | (NoOrder, Filled)
                | (EntryPlaced, Filled | Expired | Cancelled)
                | (Filled, ProtectionEnsured)
                | (ProtectionEnsured, TrailingPromoted | Flat)
                | (TrailingPromoted, Flat)
                | (Expired | Cancelled, NoOrder)
                | (Flat, NoOrder)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::{
        Cancelled, EntryPlaced, Expired, Filled, Flat, NoOrder, ProtectionEnsured,
        TrailingPromoted,
    };

    #[test]
    fn happy_path_is_legal() {
        let path = [NoOrder, EntryPlaced, Filled, ProtectionEnsured, TrailingPromoted, Flat];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn protection_never_precedes_fill() {
        assert!(!NoOrder.can_transition(ProtectionEnsured));
        assert!(!EntryPlaced.can_transition(ProtectionEnsured));
        assert!(!EntryPlaced.can_transition(TrailingPromoted));
    }

    #[test]
    fn expiry_paths() {
        assert!(EntryPlaced.can_transition(Expired));
        assert!(EntryPlaced.can_transition(Cancelled));
        assert!(Expired.can_transition(NoOrder));
        assert!(!Expired.can_transition(Filled));
    }

    #[test]
    fn flat_restarts_only_at_no_order() {
        assert!(Flat.can_transition(NoOrder));
        assert!(!Flat.can_transition(EntryPlaced));
        assert!(!Flat.can_transition(Filled));
    }
}
