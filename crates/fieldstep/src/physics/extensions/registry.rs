//! Registry pattern for looking up auctioneers by name
//!
//! The registry serves as a discovery and factory mechanism for auctioneers.
//! Each auctioneer is self-describing, providing its own name and aliases.
//! Configuration and the command line refer to policies by these names.

use super::Auctioneer;
use std::collections::HashMap;

/// Registry for runtime auctioneer lookup
///
/// Auctioneers are stateless, so handing one out is a `clone_box()` of the
/// stored instance.
pub struct AuctioneerRegistry {
    /// Maps names (canonical and aliases) to auctioneer instances
    auctioneers: HashMap<String, Box<dyn Auctioneer>>,
}

impl AuctioneerRegistry {
    /// Create an empty registry without any pre-registered auctioneers.
    pub fn new() -> Self {
        Self {
            auctioneers: HashMap::new(),
        }
    }

    /// Register the built-in policies.
    pub fn with_standard_auctioneers(mut self) -> Self {
        use super::{FirstAcceptableAuctioneer, HighestBidAuctioneer, PermissiveAuctioneer};

        self.register_auctioneer(Box::new(PermissiveAuctioneer));
        self.register_auctioneer(Box::new(FirstAcceptableAuctioneer));
        self.register_auctioneer(Box::new(HighestBidAuctioneer));

        self
    }

    pub fn with_auctioneer(mut self, auctioneer: Box<dyn Auctioneer>) -> Self {
        self.register_auctioneer(auctioneer);
        self
    }

    pub fn register_auctioneer(&mut self, auctioneer: Box<dyn Auctioneer>) {
        for alias in auctioneer.aliases() {
            self.auctioneers
                .insert(alias.to_string(), auctioneer.clone_box());
        }
        self.auctioneers
            .insert(auctioneer.name().to_string(), auctioneer);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Auctioneer>, String> {
        self.auctioneers
            .get(name)
            .map(|auctioneer| auctioneer.clone_box())
            .ok_or_else(|| {
                let alias_names: Vec<String> =
                    self.list_aliases().into_iter().map(|(a, _)| a).collect();
                format!(
                    "Unknown auctioneer: '{}'. Available auctioneers: {}. Aliases: {}",
                    name,
                    self.list_available().join(", "),
                    alias_names.join(", ")
                )
            })
    }

    /// Canonical name for `name`, which may be an alias
    pub fn resolve(&self, name: &str) -> Option<&'static str> {
        self.auctioneers.get(name).map(|auctioneer| auctioneer.name())
    }

    pub fn list_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .auctioneers
            .values()
            .map(|auctioneer| auctioneer.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn list_aliases(&self) -> Vec<(String, String)> {
        let mut aliases: Vec<(String, String)> = self
            .auctioneers
            .iter()
            .filter(|(key, auctioneer)| key.as_str() != auctioneer.name())
            .map(|(key, auctioneer)| (key.clone(), auctioneer.name().to_string()))
            .collect();

        aliases.sort_by(|a, b| a.0.cmp(&b.0));
        aliases
    }
}

impl Default for AuctioneerRegistry {
    fn default() -> Self {
        Self::new().with_standard_auctioneers()
    }
}
