//! One-time registration of the IR's dialect vocabulary.
//!
//! Building the [`DialectRegistry`] must happen exactly once per process, and
//! concurrent first-time registration must not race. A [`Registration`] holds
//! the registry behind a mutex together with a count of how many times
//! registration has actually run, so that callers (and tests) can observe that
//! later calls skip it.
//!
//! The process-wide instance is available through [`global`]. Separate
//! instances can be created for tests that need isolation from it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dialect::DialectRegistry;

#[derive(Debug, Default)]
struct State {
    registry: Option<Arc<DialectRegistry>>,
    runs:     usize,
}

/// A guarded, idempotent registration of a [`DialectRegistry`].
#[derive(Debug)]
pub struct Registration {
    state: Mutex<State>,
}

impl Registration {
    /// Creates a registration that has not yet run.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                registry: None,
                runs:     0,
            }),
        }
    }

    // A panic inside `make_registry` poisons the mutex without completing
    // registration, so the state remains consistent and is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `make_registry` if, and only if, registration has not yet
    /// completed, and returns the registered dialects.
    ///
    /// Callers that arrive while another thread is registering block until it
    /// is done and then observe its result.
    pub fn init_once(&self, make_registry: impl FnOnce() -> DialectRegistry) -> Arc<DialectRegistry> {
        let mut state = self.lock();
        if let Some(registry) = &state.registry {
            return registry.clone();
        }

        let registry = Arc::new(make_registry());
        state.runs += 1;
        state.registry = Some(registry.clone());
        tracing::debug!(
            dialects = ?registry.namespaces(),
            runs = state.runs,
            "Registered IR dialects"
        );
        registry
    }

    /// Gets the registered dialects, if registration has completed.
    #[must_use]
    pub fn registry(&self) -> Option<Arc<DialectRegistry>> {
        self.lock().registry.clone()
    }

    /// Returns `true` if registration has completed.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.lock().registry.is_some()
    }

    /// Gets the number of times registration has actually run.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.lock().runs
    }

    /// Forgets the completed registration so that the next call to
    /// [`Self::init_once`] runs it again.
    ///
    /// This exists for test isolation only. The run counter is kept so that
    /// re-registration remains observable.
    pub fn teardown(&self) {
        self.lock().registry = None;
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Registration = Registration::new();

/// Gets the process-wide registration.
#[must_use]
pub fn global() -> &'static Registration {
    &GLOBAL
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use crate::{dialect::DialectRegistry, registration::Registration};

    #[test]
    fn registers_exactly_once() {
        let registration = Registration::new();
        assert!(!registration.is_registered());

        let first = registration.init_once(DialectRegistry::standard);
        let second = registration.init_once(|| panic!("registration ran twice"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registration.runs(), 1);
        assert!(registration.is_registered());
    }

    #[test]
    fn concurrent_callers_do_not_race() {
        let registration = Arc::new(Registration::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registration = registration.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    registration.init_once(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        DialectRegistry::standard()
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("registration thread panicked");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registration.runs(), 1);
    }

    #[test]
    fn teardown_allows_registration_again() {
        let registration = Registration::new();
        registration.init_once(DialectRegistry::standard);
        registration.teardown();

        assert!(!registration.is_registered());
        assert!(registration.registry().is_none());
        registration.init_once(DialectRegistry::standard);
        assert_eq!(registration.runs(), 2);
    }
}
