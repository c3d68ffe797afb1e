//! Collision Detector
//!
//! Pre-admission screening of a proposed trade against the unresolved set
//! for its symbol. Pure decision logic; the caller holds the per-symbol
//! admission critical section while invoking it.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Side, TradeIntent, TradeOutcome};

/// Slim view of an unresolved (admitted, not yet terminal) trade.
///
/// Entries live in the symbol's admission lane, so the symbol itself is
/// implicit.
#[derive(Debug, Clone)]
pub struct UnresolvedTrade {
    pub trade_intent_id: Uuid,
    pub side: Side,
    pub quantity: Decimal,
    pub source_bot_id: String,
}

impl UnresolvedTrade {
    pub fn of(intent: &TradeIntent) -> Self {
        Self {
            trade_intent_id: intent.id,
            side: intent.side,
            quantity: intent.quantity,
            source_bot_id: intent.source_bot_id.clone(),
        }
    }
}

/// Screening result for one proposed trade
#[derive(Debug, Clone, Default)]
pub struct ScreenVerdict {
    pub duplicate: bool,
    pub conflicting: bool,
    /// The unresolved trade that makes the proposal a duplicate, if any
    pub duplicate_of: Option<UnresolvedTrade>,
    /// The unresolved trade the proposal collides with, if any
    pub conflicting_with: Option<UnresolvedTrade>,
}

impl ScreenVerdict {
    pub fn is_clear(&self) -> bool {
        !self.duplicate && !self.conflicting
    }

    /// Rejection outcome for this verdict. Duplicate takes precedence over
    /// conflict when both rules fire.
    pub fn rejection(&self) -> Option<TradeOutcome> {
        if self.duplicate {
            Some(TradeOutcome::RejectedDuplicate)
        } else if self.conflicting {
            Some(TradeOutcome::RejectedConflict)
        } else {
            None
        }
    }

    /// Human-readable reason recorded on the rejection record
    pub fn rejection_reason(&self) -> Option<String> {
        if let Some(dup) = self.duplicate_of.as_ref().filter(|_| self.duplicate) {
            return Some(format!(
                "duplicate of unresolved trade {} ({} {} from {})",
                dup.trade_intent_id, dup.side, dup.quantity, dup.source_bot_id
            ));
        }
        if let Some(other) = self.conflicting_with.as_ref().filter(|_| self.conflicting) {
            return Some(format!(
                "conflicts with unresolved {} trade {} from {}",
                other.side, other.trade_intent_id, other.source_bot_id
            ));
        }
        None
    }
}

pub struct CollisionDetector;

impl CollisionDetector {
    /// Screen a proposed trade against the unresolved trades on its symbol.
    ///
    /// Duplicate: identical side and quantity already unresolved, regardless
    /// of source bot. Conflict: opposite side already unresolved. Same side
    /// with a different quantity is clear (bots may pyramid a direction).
    pub fn screen(intent: &TradeIntent, unresolved: &[UnresolvedTrade]) -> ScreenVerdict {
        let mut verdict = ScreenVerdict::default();

        for existing in unresolved {
            if existing.side == intent.side {
                if !verdict.duplicate && existing.quantity == intent.quantity {
                    verdict.duplicate = true;
                    verdict.duplicate_of = Some(existing.clone());
                }
            } else if !verdict.conflicting {
                verdict.conflicting = true;
                verdict.conflicting_with = Some(existing.clone());
            }
            if verdict.duplicate && verdict.conflicting {
                break;
            }
        }

        verdict
    }
}
