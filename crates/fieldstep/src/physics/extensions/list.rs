//! Ordered composition of step extensions with per-step arbitration

use super::auctioneer::{Auctioneer, PermissiveAuctioneer};
use super::{Bid, Stage, StepUpdate, StepperExtension};
use crate::physics::math::{Jacobian, Scalar, Vector, free_transport};
use crate::physics::state::{StepData, StepperState};
use std::any::TypeId;
use thiserror::Error;

/// Configuration errors detected while composing an [`ExtensionList`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositionError {
    #[error("an extension list needs at least one extension")]
    Empty,
    #[error("extension `{0}` is registered more than once")]
    Duplicate(String),
}

/// Builder collecting the extensions and the auctioneer of a list
pub struct ExtensionListBuilder {
    extensions: Vec<Box<dyn StepperExtension>>,
    auctioneer: Box<dyn Auctioneer>,
}

impl ExtensionListBuilder {
    pub fn new() -> Self {
        Self {
            extensions: Vec::new(),
            auctioneer: Box::new(PermissiveAuctioneer),
        }
    }

    /// Append an extension; registration order is bid order.
    pub fn with<E: StepperExtension>(self, extension: E) -> Self {
        self.with_boxed(Box::new(extension))
    }

    pub fn with_boxed(mut self, extension: Box<dyn StepperExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Policy resolving the bids of every step (permissive by default)
    pub fn auctioneer<A: Auctioneer + 'static>(self, auctioneer: A) -> Self {
        self.boxed_auctioneer(Box::new(auctioneer))
    }

    pub fn boxed_auctioneer(mut self, auctioneer: Box<dyn Auctioneer>) -> Self {
        self.auctioneer = auctioneer;
        self
    }

    pub fn build(self) -> Result<ExtensionList, CompositionError> {
        if self.extensions.is_empty() {
            return Err(CompositionError::Empty);
        }

        let mut seen: Vec<TypeId> = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            let type_id = extension.as_any().type_id();
            if seen.contains(&type_id) {
                return Err(CompositionError::Duplicate(extension.name().to_string()));
            }
            seen.push(type_id);
        }

        let count = self.extensions.len();
        Ok(ExtensionList {
            extensions: self.extensions,
            auctioneer: self.auctioneer,
            bids: vec![0; count],
            valid: vec![false; count],
        })
    }
}

impl Default for ExtensionListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered, fixed set of extensions evaluating the steps of a trajectory
///
/// Per step the driving stepper calls [`compute_validity`] once, then
/// [`k1`], [`k2`], [`k3`], [`k4`] and one of the finalize methods, strictly
/// in that order. The validity mask is written only by `compute_validity`
/// and is shared by every stage call of the step.
///
/// Stage and finalize calls combine the contributions of all valid
/// extensions by summation. A failing extension does not stop the others
/// from being evaluated; it only turns the returned flag to `false`. A
/// failed finalize leaves the state and the Jacobian untouched.
///
/// [`compute_validity`]: ExtensionList::compute_validity
/// [`k1`]: ExtensionList::k1
/// [`k2`]: ExtensionList::k2
/// [`k3`]: ExtensionList::k3
/// [`k4`]: ExtensionList::k4
pub struct ExtensionList {
    extensions: Vec<Box<dyn StepperExtension>>,
    auctioneer: Box<dyn Auctioneer>,
    bids: Vec<Bid>,
    valid: Vec<bool>,
}

impl std::fmt::Debug for ExtensionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionList")
            .field("extensions", &self.names().collect::<Vec<_>>())
            .field("auctioneer", &self.auctioneer.name())
            .field("bids", &self.bids)
            .field("valid", &self.valid)
            .finish()
    }
}

impl ExtensionList {
    pub fn builder() -> ExtensionListBuilder {
        ExtensionListBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn auctioneer(&self) -> &dyn Auctioneer {
        self.auctioneer.as_ref()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|extension| extension.name())
    }

    pub fn get(&self, index: usize) -> Option<&dyn StepperExtension> {
        self.extensions.get(index).map(|extension| &**extension)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn StepperExtension + 'static)> {
        self.extensions.get_mut(index).map(|extension| &mut **extension)
    }

    /// The registered extension of type `E`, if any
    pub fn extension<E: StepperExtension>(&self) -> Option<&E> {
        self.extensions
            .iter()
            .find_map(|extension| extension.as_any().downcast_ref::<E>())
    }

    /// Mutable access to the registered extension of type `E`, for tuning it
    /// between steps
    pub fn extension_mut<E: StepperExtension>(&mut self) -> Option<&mut E> {
        self.extensions
            .iter_mut()
            .find_map(|extension| extension.as_any_mut().downcast_mut::<E>())
    }

    /// Bids of the last [`compute_validity`](ExtensionList::compute_validity)
    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    /// Validity mask of the current step
    pub fn validity(&self) -> &[bool] {
        &self.valid
    }

    /// Collect a bid from every extension for a step starting at `state`
    /// and let the auctioneer decide which extensions take part.
    ///
    /// Returns `false` when no extension is valid; the stage calls of this
    /// step then fail as well.
    pub fn compute_validity(&mut self, state: &StepperState) -> bool {
        for (bid, extension) in self.bids.iter_mut().zip(&self.extensions) {
            *bid = extension.bid(state);
        }
        self.auctioneer.auction(&self.bids, &mut self.valid);
        self.valid.contains(&true)
    }

    /// First stage, from the start of the step
    pub fn k1(&mut self, state: &StepperState, field: &Vector, knew: &mut Vector) -> bool {
        self.evaluate(state, Stage::K1, field, 0.0, &Vector::zeros(), knew)
    }

    /// Second stage, `h` into the step, depending on `k1`
    pub fn k2(
        &mut self,
        state: &StepperState,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
        knew: &mut Vector,
    ) -> bool {
        self.evaluate(state, Stage::K2, field, h, k_prev, knew)
    }

    /// Third stage, `h` into the step, depending on `k2`
    pub fn k3(
        &mut self,
        state: &StepperState,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
        knew: &mut Vector,
    ) -> bool {
        self.evaluate(state, Stage::K3, field, h, k_prev, knew)
    }

    /// Fourth stage, `h` into the step, depending on `k3`
    pub fn k4(
        &mut self,
        state: &StepperState,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
        knew: &mut Vector,
    ) -> bool {
        self.evaluate(state, Stage::K4, field, h, k_prev, knew)
    }

    fn evaluate(
        &mut self,
        state: &StepperState,
        stage: Stage,
        field: &Vector,
        h: Scalar,
        k_prev: &Vector,
        knew: &mut Vector,
    ) -> bool {
        let mut combined = Vector::zeros();
        let mut evaluated = false;
        let mut succeeded = true;

        for (extension, _) in self
            .extensions
            .iter_mut()
            .zip(&self.valid)
            .filter(|(_, valid)| **valid)
        {
            evaluated = true;
            match extension.k(state, stage, field, h, k_prev) {
                Some(k) => combined += k,
                None => succeeded = false,
            }
        }

        *knew = combined;
        evaluated && succeeded
    }

    /// Advance `state` over a step of length `h` from the four combined stage
    /// derivatives in `data`, then apply the extension updates.
    ///
    /// Returns `false` without touching `state` when no extension is valid or
    /// a valid one fails.
    pub fn finalize(&mut self, state: &mut StepperState, h: Scalar, data: &StepData) -> bool {
        let mut update = StepUpdate::default();
        let mut evaluated = false;
        let mut succeeded = true;

        for (extension, _) in self
            .extensions
            .iter_mut()
            .zip(&self.valid)
            .filter(|(_, valid)| **valid)
        {
            evaluated = true;
            match extension.finalize(state, h, data) {
                Some(contribution) => update += contribution,
                None => succeeded = false,
            }
        }

        if !(evaluated && succeeded) {
            return false;
        }
        advance(state, h, data, update);
        true
    }

    /// [`finalize`](ExtensionList::finalize), additionally assembling the
    /// transport Jacobian of the step into `jacobian`.
    ///
    /// The Jacobian is the free-propagation Jacobian plus the corrections of
    /// all valid extensions, evaluated at the state before the step.
    pub fn finalize_with_jacobian(
        &mut self,
        state: &mut StepperState,
        h: Scalar,
        data: &StepData,
        jacobian: &mut Jacobian,
    ) -> bool {
        let mut correction = Jacobian::zeros();
        let mut succeeded = true;

        for (extension, _) in self
            .extensions
            .iter_mut()
            .zip(&self.valid)
            .filter(|(_, valid)| **valid)
        {
            match extension.transport(state, h, data) {
                Some(contribution) => correction += contribution,
                None => succeeded = false,
            }
        }

        if !succeeded || !self.finalize(state, h, data) {
            return false;
        }
        *jacobian = free_transport(h) + correction;
        true
    }
}

fn advance(state: &mut StepperState, h: Scalar, data: &StepData, update: StepUpdate) {
    let h2 = h * h;
    state.position += h * state.direction + h2 / 6.0 * (data.k1 + data.k2 + data.k3);

    let direction =
        state.direction + h / 6.0 * (data.k1 + 2.0 * (data.k2 + data.k3) + data.k4);
    state.direction = direction.normalize();

    state.path_length += h;
    state.momentum += update.delta_momentum;
    state.time += update.delta_time;
}
