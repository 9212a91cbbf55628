//! Registry tracking.
//!
//! A [`RegistryTracker`] is the sole event source of a dependency: it
//! subscribes to the registry filtered by interface name and reflects
//! `added`/`modified`/`removed` transitions to a [`TrackerCustomizer`]. It
//! never inspects filters or interceptors; those belong to the layers above.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::BindResult;
use crate::properties::OBJECTCLASS;
use crate::reference::{ServiceId, ServiceReference};
use crate::registry::{
    ListenerId, Registry, ServiceEvent, ServiceEventKind, ServiceListener, ServiceObject,
};

/// Receiver of tracking transitions.
///
/// The customizer is consulted once per reference through the `adding` gate;
/// a `false` answer ignores the reference for its whole lifetime (until it is
/// modified, which re-runs the gate).
pub trait TrackerCustomizer: Send + Sync {
    /// Gate: should the reference be tracked at all?
    fn adding(&self, reference: &ServiceReference) -> bool;

    /// The reference passed the gate and is now tracked.
    fn added(&self, reference: &ServiceReference);

    /// A tracked reference changed its properties. `service` carries the
    /// borrowed object when one is held.
    fn modified(&self, reference: &ServiceReference, service: Option<&ServiceObject>);

    /// A tracked reference left. `service` carries the borrowed object when
    /// one was held.
    fn removed(&self, reference: &ServiceReference, service: Option<&ServiceObject>);
}

struct Borrowed {
    object: ServiceObject,
    count: usize,
}

#[derive(Default)]
struct TrackerState {
    /// Tracked references in registration order, oldest first.
    tracked: Vec<ServiceReference>,
    /// Borrowed service objects, reference-counted per registration.
    borrowed: HashMap<ServiceId, Borrowed>,
    listener: Option<ListenerId>,
    open: bool,
}

/// Tracks the registrations of one service interface.
///
/// `close()` synthesizes a `removed` transition for every tracked reference
/// and releases every outstanding borrow, so a closing dependency observes
/// the same departures it would observe if every provider left.
pub struct RegistryTracker {
    registry: Arc<dyn Registry>,
    interface: String,
    customizer: Arc<dyn TrackerCustomizer>,
    state: Mutex<TrackerState>,
}

impl RegistryTracker {
    /// Creates a tracker. Nothing happens until [`RegistryTracker::open`].
    pub fn new(
        registry: Arc<dyn Registry>,
        interface: impl Into<String>,
        customizer: Arc<dyn TrackerCustomizer>,
    ) -> Arc<Self> {
        Arc::new(RegistryTracker {
            registry,
            interface: interface.into(),
            customizer,
            state: Mutex::new(TrackerState::default()),
        })
    }

    /// The tracked interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Subscribes to the registry and seeds the tracked set from the current
    /// registrations.
    pub fn open(self: &Arc<Self>) -> BindResult<()> {
        let filter = format!("({}={})", OBJECTCLASS, self.interface);
        let listener =
            self.registry
                .add_service_listener(self.clone() as Arc<dyn ServiceListener>, Some(&filter))?;
        {
            let mut state = self.state.lock();
            state.open = true;
            state.listener = Some(listener);
        }
        for reference in self.registry.get_service_references(&self.interface, None)? {
            self.track(&reference);
        }
        Ok(())
    }

    /// Unsubscribes, reflects the departure of every tracked reference, and
    /// releases every outstanding borrow.
    pub fn close(&self) {
        let (listener, tracked, borrowed) = {
            let mut state = self.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
            (
                state.listener.take(),
                std::mem::take(&mut state.tracked),
                std::mem::take(&mut state.borrowed),
            )
        };
        if let Some(id) = listener {
            self.registry.remove_service_listener(id);
        }
        // Newest first, mirroring the registry's own shutdown order.
        for reference in tracked.iter().rev() {
            let object = borrowed.get(&reference.id()).map(|b| &b.object);
            self.customizer.removed(reference, object);
        }
        // One registry borrow is held per reference, however many times the
        // dependency borrowed it through the tracker.
        for id in borrowed.keys() {
            if let Some(reference) = tracked.iter().find(|r| r.id() == *id) {
                self.registry.unget_service(reference);
            }
        }
    }

    /// Snapshot of the tracked references, oldest first.
    pub fn current(&self) -> Vec<ServiceReference> {
        self.state.lock().tracked.clone()
    }

    /// Is the reference currently tracked?
    pub fn is_tracked(&self, reference: &ServiceReference) -> bool {
        self.state.lock().tracked.contains(reference)
    }

    /// Tracked references whose service object is currently borrowed.
    pub fn used_references(&self) -> Vec<ServiceReference> {
        let state = self.state.lock();
        state
            .tracked
            .iter()
            .filter(|r| state.borrowed.contains_key(&r.id()))
            .cloned()
            .collect()
    }

    /// Borrows the service object behind a tracked reference, counting the
    /// borrow so the registry is released exactly once per reference.
    ///
    /// The state lock is held across the registry fetch so concurrent first
    /// borrows of the same reference take exactly one registry-level borrow.
    /// The registry never calls back into the tracker from `get_service`.
    pub fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        let mut state = self.state.lock();
        if let Some(borrow) = state.borrowed.get_mut(&reference.id()) {
            borrow.count += 1;
            return Some(borrow.object.clone());
        }
        let object = self.registry.get_service(reference)?;
        state.borrowed.insert(
            reference.id(),
            Borrowed {
                object: object.clone(),
                count: 1,
            },
        );
        Some(object)
    }

    /// Releases one borrow. Returns `true` when this was the last one and the
    /// registry borrow was released with it.
    pub fn unget_service(&self, reference: &ServiceReference) -> bool {
        let released = {
            let mut state = self.state.lock();
            match state.borrowed.get_mut(&reference.id()) {
                Some(borrow) if borrow.count > 1 => {
                    borrow.count -= 1;
                    false
                }
                Some(_) => {
                    state.borrowed.remove(&reference.id());
                    true
                }
                None => false,
            }
        };
        if released {
            self.registry.unget_service(reference);
        }
        released
    }

    fn track(&self, reference: &ServiceReference) {
        {
            let state = self.state.lock();
            if !state.open || state.tracked.contains(reference) {
                return;
            }
        }
        // The gate runs outside the tracker lock: customizers read their own
        // dependency state.
        if !self.customizer.adding(reference) {
            debug!(id = %reference.id(), interface = %self.interface, "reference refused by gate");
            return;
        }
        {
            let mut state = self.state.lock();
            if !state.open || state.tracked.contains(reference) {
                return;
            }
            state.tracked.push(reference.clone());
        }
        self.customizer.added(reference);
    }

    fn untrack(&self, reference: &ServiceReference) {
        let (was_tracked, borrowed) = {
            let mut state = self.state.lock();
            let len = state.tracked.len();
            state.tracked.retain(|r| r != reference);
            (state.tracked.len() != len, state.borrowed.remove(&reference.id()))
        };
        if !was_tracked {
            return;
        }
        self.customizer
            .removed(reference, borrowed.as_ref().map(|b| &b.object));
        if borrowed.is_some() {
            self.registry.unget_service(reference);
        }
    }
}

impl ServiceListener for RegistryTracker {
    fn service_changed(&self, event: &ServiceEvent) {
        match event.kind {
            ServiceEventKind::Registered => self.track(&event.reference),
            ServiceEventKind::Modified => {
                let (tracked, borrowed) = {
                    let mut state = self.state.lock();
                    if !state.open {
                        return;
                    }
                    let position = state.tracked.iter().position(|r| r == &event.reference);
                    if let Some(idx) = position {
                        // Refresh the stored reference so `current()` reports
                        // the new properties.
                        state.tracked[idx] = event.reference.clone();
                    }
                    (
                        position.is_some(),
                        state
                            .borrowed
                            .get(&event.reference.id())
                            .map(|b| b.object.clone()),
                    )
                };
                if tracked {
                    self.customizer.modified(&event.reference, borrowed.as_ref());
                } else {
                    // A property change may bring an ignored reference in.
                    self.track(&event.reference);
                }
            }
            ServiceEventKind::Unregistering => self.untrack(&event.reference),
        }
    }
}
