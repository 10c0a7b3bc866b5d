//! Mechanism id → driver factory lookup, one table per role.

use std::collections::HashMap;
use std::sync::Arc;

use super::{DummyRatProver, DummyRatVerifier, RatDriver, RatDriverFactory, DUMMY_MECHANISM};
use crate::errors::RatDriverError;
use crate::fsm::event::RatRole;

#[derive(Clone, Default)]
pub struct RatRegistry {
    provers: HashMap<String, Arc<dyn RatDriverFactory>>,
    verifiers: HashMap<String, Arc<dyn RatDriverFactory>>,
}

impl RatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `Dummy` prover and verifier.
    pub fn with_dummy_drivers() -> Self {
        let mut registry = Self::new();
        registry.register_prover(DUMMY_MECHANISM, || {
            Box::new(DummyRatProver::new()) as Box<dyn RatDriver>
        });
        registry.register_verifier(DUMMY_MECHANISM, || {
            Box::new(DummyRatVerifier::new()) as Box<dyn RatDriver>
        });
        registry
    }

    pub fn register_prover(
        &mut self,
        mechanism: impl Into<String>,
        factory: impl RatDriverFactory + 'static,
    ) {
        self.provers.insert(mechanism.into(), Arc::new(factory));
    }

    pub fn register_verifier(
        &mut self,
        mechanism: impl Into<String>,
        factory: impl RatDriverFactory + 'static,
    ) {
        self.verifiers.insert(mechanism.into(), Arc::new(factory));
    }

    fn table(&self, role: RatRole) -> &HashMap<String, Arc<dyn RatDriverFactory>> {
        match role {
            RatRole::Prover => &self.provers,
            RatRole::Verifier => &self.verifiers,
        }
    }

    pub fn contains(&self, role: RatRole, mechanism: &str) -> bool {
        self.table(role).contains_key(mechanism)
    }

    /// Fresh driver instance for `mechanism`.
    pub fn create(&self, role: RatRole, mechanism: &str) -> Result<Box<dyn RatDriver>, RatDriverError> {
        self.table(role)
            .get(mechanism)
            .map(|factory| factory.create())
            .ok_or_else(|| RatDriverError::UnknownMechanism(mechanism.to_string()))
    }
}

impl std::fmt::Debug for RatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatRegistry")
            .field("provers", &self.provers.keys().collect::<Vec<_>>())
            .field("verifiers", &self.verifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}
