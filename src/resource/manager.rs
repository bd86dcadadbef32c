use std::collections::VecDeque;

use indexmap::IndexMap;

use super::GpuResource;
use crate::backend::{GpuBackend, ResourceId};
use crate::diagnostics::Diagnostics;
use crate::error::{LifecycleError, Result};

/// Live resources of one kind plus a FIFO deletion queue.
///
/// Enqueued resources are only destroyed by [`flush`](Self::flush), which the
/// owning context runs once per frame before any draw is issued.
pub struct ResourceManager<T: GpuResource> {
    live: IndexMap<T::Id, T>,
    pending_deletion: VecDeque<T::Id>,
    diag: Diagnostics,
}

impl<T: GpuResource> ResourceManager<T> {
    pub fn new(diag: Diagnostics) -> Self {
        Self {
            live: IndexMap::new(),
            pending_deletion: VecDeque::new(),
            diag,
        }
    }

    /// Take ownership of a resource.
    pub fn register(&mut self, resource: T) -> Result<T::Id> {
        let id = resource.handle().ensure_alive()?;
        if self.live.contains_key(&id) {
            return Err(LifecycleError::AlreadyRegistered {
                kind: T::Id::KIND,
                id: id.raw(),
            });
        }
        self.live.insert(id, resource);
        Ok(id)
    }

    /// Schedule a resource for destruction at the next flush.
    pub fn enqueue_destroy(&mut self, id: T::Id) {
        self.pending_deletion.push_back(id);
    }

    /// Destroy everything queued since the last flush.
    ///
    /// Never fails: ids that are no longer live and teardown errors are
    /// reported as errors and the remaining queue is still processed. A
    /// resource whose teardown failed stays live.
    /// Returns the number of resources destroyed.
    pub fn flush(&mut self, backend: &mut dyn GpuBackend) -> usize {
        let mut destroyed = 0;
        while let Some(id) = self.pending_deletion.pop_front() {
            let Some(mut resource) = self.live.shift_remove(&id) else {
                self.diag.error(format_args!(
                    "resource to be destroyed could not be found: {id}"
                ));
                continue;
            };
            match resource.destroy(backend, &self.diag) {
                Ok(()) => destroyed += 1,
                Err(err) => {
                    self.diag
                        .error(format_args!("failed to destroy {id} '{}': {err}", resource.label()));
                    self.live.insert(id, resource);
                }
            }
        }
        if destroyed > 0 {
            self.diag.debug(format_args!(
                "flushed {destroyed} {}(s), {} live",
                T::Id::KIND,
                self.live.len()
            ));
        }
        destroyed
    }

    /// Destroy every live resource, bypassing the queue. Shutdown only.
    pub fn destroy_all(&mut self, backend: &mut dyn GpuBackend) -> usize {
        self.diag.info(format_args!(
            "destroying {} live {}(s)",
            self.live.len(),
            T::Id::KIND
        ));
        self.pending_deletion.clear();

        let mut destroyed = 0;
        let mut failed = Vec::new();
        for (id, mut resource) in self.live.drain(..) {
            match resource.destroy(backend, &self.diag) {
                Ok(()) => destroyed += 1,
                Err(err) => {
                    self.diag
                        .error(format_args!("failed to destroy {id} '{}': {err}", resource.label()));
                    failed.push((id, resource));
                }
            }
        }
        // still owned, so a later destroy_all can retry
        self.live.extend(failed);
        destroyed
    }

    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.live.get(&id)
    }

    pub fn get_mut(&mut self, id: T::Id) -> Option<&mut T> {
        self.live.get_mut(&id)
    }

    pub fn contains(&self, id: T::Id) -> bool {
        self.live.contains_key(&id)
    }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = T::Id> + '_ {
        self.live.keys().copied()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_deletion.len()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }
}

impl<T: GpuResource> Drop for ResourceManager<T> {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            self.diag.warn(format_args!(
                "{} {}(s) leaked: manager dropped without destroy_all",
                self.live.len(),
                T::Id::KIND
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::{BackendKind, BufferId, DummyBackend};
    use crate::error::{BackendError, BackendResult};
    use crate::resource::ResourceHandle;

    struct Tracked {
        handle: ResourceHandle<BufferId>,
        releases: Rc<Cell<usize>>,
        failures: usize,
    }

    impl GpuResource for Tracked {
        type Id = BufferId;

        fn handle(&self) -> &ResourceHandle<BufferId> {
            &self.handle
        }

        fn handle_mut(&mut self) -> &mut ResourceHandle<BufferId> {
            &mut self.handle
        }

        fn release(&mut self, _backend: &mut dyn GpuBackend) -> BackendResult<()> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(BackendError::InvalidState("device busy".to_string()));
            }
            self.releases.set(self.releases.get() + 1);
            Ok(())
        }
    }

    fn tracked(id: u64, releases: &Rc<Cell<usize>>) -> Tracked {
        Tracked {
            handle: ResourceHandle::new(BufferId(id), format!("buffer-{id}")),
            releases: Rc::clone(releases),
            failures: 0,
        }
    }

    fn setup() -> (DummyBackend, ResourceManager<Tracked>, Diagnostics) {
        let diag = Diagnostics::capturing("test", 64);
        let manager = ResourceManager::new(diag.child("buffers"));
        (DummyBackend::new(BackendKind::Gl), manager, diag)
    }

    #[test]
    fn test_register_twice_rejected() {
        let (mut backend, mut manager, _diag) = setup();
        let releases = Rc::new(Cell::new(0));

        manager.register(tracked(1, &releases)).unwrap();
        let err = manager.register(tracked(1, &releases)).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyRegistered { kind: "buffer", id: 1 }));
        assert_eq!(manager.live_count(), 1);
        manager.destroy_all(&mut backend);
    }

    #[test]
    fn test_register_destroyed_rejected() {
        let (mut backend, mut manager, diag) = setup();
        let releases = Rc::new(Cell::new(0));
        let mut resource = tracked(4, &releases);
        resource.destroy(&mut backend, &diag).unwrap();

        assert!(matches!(
            manager.register(resource),
            Err(LifecycleError::UseAfterDestroy { .. })
        ));
    }

    #[test]
    fn test_enqueue_defers_destruction() {
        let (mut backend, mut manager, _diag) = setup();
        let releases = Rc::new(Cell::new(0));
        let id = manager.register(tracked(1, &releases)).unwrap();

        manager.enqueue_destroy(id);
        assert_eq!(releases.get(), 0);
        assert_eq!(manager.pending_count(), 1);

        assert_eq!(manager.flush(&mut backend), 1);
        assert_eq!(releases.get(), 1);
        assert_eq!(manager.live_count(), 0);
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_double_enqueue_reports_not_found() {
        let (mut backend, mut manager, diag) = setup();
        let releases = Rc::new(Cell::new(0));
        let id = manager.register(tracked(1, &releases)).unwrap();
        manager.register(tracked(2, &releases)).unwrap();

        manager.enqueue_destroy(id);
        manager.enqueue_destroy(id);
        manager.enqueue_destroy(BufferId(99));
        assert_eq!(manager.flush(&mut backend), 1);
        assert_eq!(releases.get(), 1);
        assert_eq!(manager.live_count(), 1);

        let captured = diag.capture().unwrap().lock();
        assert_eq!(
            captured
                .matching(log::Level::Error, "could not be found")
                .count(),
            2
        );
        drop(captured);
        manager.destroy_all(&mut backend);
    }

    #[test]
    fn test_destroy_all_logs_count() {
        let (mut backend, mut manager, diag) = setup();
        let releases = Rc::new(Cell::new(0));
        let id = manager.register(tracked(1, &releases)).unwrap();
        manager.register(tracked(2, &releases)).unwrap();
        manager.enqueue_destroy(id);

        assert_eq!(manager.destroy_all(&mut backend), 2);
        assert_eq!(releases.get(), 2);
        assert_eq!(manager.pending_count(), 0);

        let captured = diag.capture().unwrap().lock();
        assert_eq!(
            captured
                .matching(log::Level::Info, "destroying 2 live")
                .count(),
            1
        );
    }

    #[test]
    fn test_failed_flush_keeps_resource_live() {
        let (mut backend, mut manager, diag) = setup();
        let releases = Rc::new(Cell::new(0));
        let id = manager
            .register(Tracked {
                failures: 1,
                ..tracked(1, &releases)
            })
            .unwrap();

        manager.enqueue_destroy(id);
        assert_eq!(manager.flush(&mut backend), 0);
        assert!(manager.contains(id));
        assert_eq!(releases.get(), 0);
        {
            let captured = diag.capture().unwrap().lock();
            assert_eq!(captured.matching(log::Level::Error, "failed to destroy").count(), 1);
        }

        assert_eq!(manager.destroy_all(&mut backend), 1);
        assert_eq!(releases.get(), 1);
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_failed_destroy_all_can_retry() {
        let (mut backend, mut manager, _diag) = setup();
        let releases = Rc::new(Cell::new(0));
        manager
            .register(Tracked {
                failures: 1,
                ..tracked(1, &releases)
            })
            .unwrap();
        manager.register(tracked(2, &releases)).unwrap();

        assert_eq!(manager.destroy_all(&mut backend), 1);
        assert_eq!(manager.live_count(), 1);
        assert_eq!(manager.destroy_all(&mut backend), 1);
        assert_eq!(releases.get(), 2);
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_drop_with_live_resources_warns() {
        let (_backend, mut manager, diag) = setup();
        let releases = Rc::new(Cell::new(0));
        manager.register(tracked(1, &releases)).unwrap();
        drop(manager);

        let captured = diag.capture().unwrap().lock();
        assert_eq!(captured.matching(log::Level::Warn, "leaked").count(), 1);
    }
}
