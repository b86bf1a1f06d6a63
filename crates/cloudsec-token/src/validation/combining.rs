use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{ValidationListener, ValidationResult, Validator};

/// Runs validators in order and stops at the first failure.
///
/// An empty chain accepts every value. Each call to
/// [`validate`](Validator::validate) notifies every registered listener
/// exactly once: `on_validation_error` with the failing result, or
/// `on_validation_success`.
///
/// Listeners can be registered and removed while other threads validate;
/// a validation in flight notifies the listeners registered when it
/// finished.
pub struct CombiningValidator<T: ?Sized> {
    validators: Vec<Box<dyn Validator<T>>>,
    listeners: RwLock<Vec<Arc<dyn ValidationListener>>>,
}

impl<T: ?Sized> CombiningValidator<T> {
    /// Chain `validators` in the given order
    pub fn new(validators: Vec<Box<dyn Validator<T>>>) -> Self {
        Self {
            validators,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Number of chained validators
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Chained validators, in execution order
    pub fn validators(&self) -> impl Iterator<Item = &dyn Validator<T>> {
        self.validators.iter().map(AsRef::as_ref)
    }

    /// Register a listener; registering the same listener twice is a no-op
    pub fn register_listener(&self, listener: Arc<dyn ValidationListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a listener; returns whether it was registered
    pub fn remove_listener(&self, listener: &Arc<dyn ValidationListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, result: &ValidationResult) {
        // snapshot so listeners may (un)register without deadlocking
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            if result.is_valid() {
                listener.on_validation_success();
            } else {
                listener.on_validation_error(result);
            }
        }
    }
}

impl<T: ?Sized> Validator<T> for CombiningValidator<T> {
    fn validate(&self, value: &T) -> ValidationResult {
        for validator in &self.validators {
            let result = validator.validate(value);
            if let Some(error) = result.error() {
                debug!(validator = validator.name(), %error, "Validation failed");
                self.notify(&result);
                return result;
            }
        }
        self.notify(&ValidationResult::VALID);
        ValidationResult::VALID
    }

    fn name(&self) -> &str {
        "CombiningValidator"
    }
}

impl<T: ?Sized> fmt::Debug for CombiningValidator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.validators.iter().map(|v| v.name()).collect();
        f.debug_struct("CombiningValidator")
            .field("validators", &names)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
