//! Policies turning the bids of one step into a validity mask
//!
//! An auctioneer is the only place that sees all bids of a step at once, so
//! every decision that depends on the relative priority of extensions is
//! made here. All policies are stateless and write a fresh mask on every
//! call.

use super::Bid;

/// Conflict-resolution policy over the bids of one step
pub trait Auctioneer: Send + Sync {
    /// Create a boxed clone of this auctioneer
    fn clone_box(&self) -> Box<dyn Auctioneer>;

    /// Canonical name of the policy
    fn name(&self) -> &'static str;

    /// Alternative names accepted by the registry
    fn aliases(&self) -> Vec<&'static str> {
        vec![]
    }

    /// Write the validity of every bid into `mask`.
    ///
    /// `mask` has the same length as `bids`; every entry is overwritten.
    fn auction(&self, bids: &[Bid], mask: &mut [bool]);

    /// Allocating form of [`Auctioneer::auction`].
    fn decide(&self, bids: &[Bid]) -> Vec<bool> {
        let mut mask = vec![false; bids.len()];
        self.auction(bids, &mut mask);
        mask
    }
}

impl std::fmt::Debug for dyn Auctioneer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Auctioneer").field(&self.name()).finish()
    }
}

/// Every extension with a positive bid is valid
///
/// Only sound when all extensions contribute additive, non-overlapping terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveAuctioneer;

impl Auctioneer for PermissiveAuctioneer {
    fn clone_box(&self) -> Box<dyn Auctioneer> {
        Box::new(*self)
    }

    fn name(&self) -> &'static str {
        "permissive"
    }

    fn aliases(&self) -> Vec<&'static str> {
        vec!["void"]
    }

    fn auction(&self, bids: &[Bid], mask: &mut [bool]) {
        debug_assert_eq!(bids.len(), mask.len());
        for (valid, &bid) in mask.iter_mut().zip(bids) {
            *valid = bid > 0;
        }
    }
}

/// Only the first extension, in registration order, with a positive bid is
/// valid
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAcceptableAuctioneer;

impl Auctioneer for FirstAcceptableAuctioneer {
    fn clone_box(&self) -> Box<dyn Auctioneer> {
        Box::new(*self)
    }

    fn name(&self) -> &'static str {
        "first_acceptable"
    }

    fn aliases(&self) -> Vec<&'static str> {
        vec!["first_valid", "first"]
    }

    fn auction(&self, bids: &[Bid], mask: &mut [bool]) {
        debug_assert_eq!(bids.len(), mask.len());
        mask.fill(false);
        if let Some(first) = bids.iter().position(|&bid| bid > 0) {
            mask[first] = true;
        }
    }
}

/// Exactly one extension is valid: the highest bidder, whatever the sign of
/// its bid
///
/// Ties go to the earliest registered extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestBidAuctioneer;

impl Auctioneer for HighestBidAuctioneer {
    fn clone_box(&self) -> Box<dyn Auctioneer> {
        Box::new(*self)
    }

    fn name(&self) -> &'static str {
        "highest_bid"
    }

    fn aliases(&self) -> Vec<&'static str> {
        vec!["highest_valid", "highest"]
    }

    fn auction(&self, bids: &[Bid], mask: &mut [bool]) {
        debug_assert_eq!(bids.len(), mask.len());
        mask.fill(false);
        if bids.is_empty() {
            return;
        }

        // Strict comparison keeps the first index among equal maxima
        let mut winner = 0;
        for (index, &bid) in bids.iter().enumerate().skip(1) {
            if bid > bids[winner] {
                winner = index;
            }
        }
        mask[winner] = true;
    }
}
