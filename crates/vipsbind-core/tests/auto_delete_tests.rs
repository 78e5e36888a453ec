//! Automatic deletion tests for HandleRegistry

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use vipsbind_core::handle::{
    DrainMode, DrainOutcome, Handle, HandleError, HandleRegistry, HandleResult, Image,
    Interpolate, NativeLibrary, NativePtr, PendingFlush, SimulatedLibrary, Source, Target,
};

/// Helper to create a registry over a fresh simulated library
fn setup() -> (Arc<SimulatedLibrary>, HandleRegistry) {
    let lib = Arc::new(SimulatedLibrary::new());
    let registry = HandleRegistry::new(lib.clone());
    (lib, registry)
}

fn new_image(lib: &SimulatedLibrary, registry: &HandleRegistry) -> Handle<Image> {
    registry.construct::<Image>(lib.create::<Image>())
}

#[test]
fn test_delete_twice_names_the_type() {
    let (lib, registry) = setup();
    let image = new_image(&lib, &registry);

    image.delete().unwrap();
    let err = image.delete().unwrap_err();
    assert_eq!(err, HandleError::DoubleDelete { type_name: "Image" });
    assert_eq!(err.to_string(), "Image instance already deleted");
    assert_eq!(lib.invalid_releases(), 0);
}

#[test]
fn test_every_operation_on_deleted_handle_fails() {
    let (lib, registry) = setup();
    let interp = registry.construct::<Interpolate>(lib.create::<Interpolate>());
    interp.delete().unwrap();

    let errors = vec![
        interp.delete().unwrap_err(),
        interp.duplicate().unwrap_err(),
        interp.native_ptr().unwrap_err(),
        interp.prevent_auto_delete().unwrap_err(),
        interp.delete_later().unwrap_err(),
    ];
    for err in errors {
        assert!(err.is_deleted_error(), "unexpected error: {}", err);
        assert_eq!(err.type_name(), Some("Interpolate"));
        assert!(err.to_string().contains("Interpolate instance already deleted"));
    }
}

#[test]
fn test_aliases_observe_deletion() {
    let (lib, registry) = setup();
    let image = new_image(&lib, &registry);
    let alias = image.clone();
    assert!(alias.is_alias_of(&image));

    alias.delete().unwrap();
    assert!(image.is_deleted());
    assert!(!alias.is_alias_of(&image));
    assert!(image.delete().is_err());
    assert_eq!(registry.queue_len(), 0);
}

#[test]
fn test_prevent_auto_delete_removes_exactly_one() {
    let (lib, registry) = setup();
    let a = new_image(&lib, &registry);
    let _b = new_image(&lib, &registry);
    assert_eq!(registry.queue_len(), 2);

    a.prevent_auto_delete().unwrap();
    assert_eq!(registry.queue_len(), 1);

    // Idempotent, and chains
    a.prevent_auto_delete().unwrap().prevent_auto_delete().unwrap();
    assert_eq!(registry.queue_len(), 1);
    assert!(!registry.is_queued(&a));
    assert!(!a.is_delete_scheduled());
}

#[test]
fn test_clone_of_exempted_handle_is_enrolled() {
    let (lib, registry) = setup();
    let a = new_image(&lib, &registry);
    a.prevent_auto_delete().unwrap();
    let before = registry.queue_len();

    let copy = registry.clone_handle(&a).unwrap();
    assert_eq!(registry.queue_len(), before + 1);
    assert!(copy.is_delete_scheduled());
    assert!(!copy.is_alias_of(&a));
    assert_ne!(copy.id(), a.id());
}

#[test]
fn test_drain_releases_every_queued_handle() {
    let (lib, registry) = setup();
    let handles: Vec<Handle<Image>> = (0..5).map(|_| new_image(&lib, &registry)).collect();

    let outcome = registry.drain_queue(DrainMode::Immediate).unwrap();
    assert_eq!(outcome, DrainOutcome::Released(5));
    assert_eq!(registry.queue_len(), 0);
    for handle in &handles {
        assert!(handle.is_deleted());
        assert!(handle.native_ptr().is_err());
    }
    assert_eq!(lib.live_count(), 0);
    assert_eq!(lib.invalid_releases(), 0);
}

#[test]
fn test_scenario_exempt_clone_drain() {
    let (lib, registry) = setup();

    let a = new_image(&lib, &registry);
    assert_eq!(registry.queue_len(), 1);
    let b = new_image(&lib, &registry);
    assert_eq!(registry.queue_len(), 2);

    a.prevent_auto_delete().unwrap();
    assert_eq!(registry.queue_len(), 1);
    let queued: Vec<u64> = registry.pending().iter().map(|h| h.id()).collect();
    assert_eq!(queued, vec![b.id()]);

    let c = a.duplicate().unwrap();
    assert_eq!(registry.queue_len(), 2);
    let queued: Vec<u64> = registry.pending().iter().map(|h| h.id()).collect();
    assert_eq!(queued, vec![b.id(), c.id()]);

    registry.drain_queue(DrainMode::Immediate).unwrap();
    assert_eq!(registry.queue_len(), 0);
    assert!(b.is_deleted());
    assert!(c.is_deleted());
    assert!(!a.is_deleted());

    // A is still usable and must be released by hand
    let d = a.duplicate().unwrap();
    a.delete().unwrap();
    d.delete().unwrap();
    assert_eq!(lib.live_count(), 0);
}

#[test]
fn test_delete_later_reenrolls() {
    let (lib, registry) = setup();
    let image = new_image(&lib, &registry);

    assert_eq!(
        image.delete_later().unwrap_err(),
        HandleError::AlreadyScheduled { type_name: "Image" }
    );

    image.prevent_auto_delete().unwrap();
    image.delete_later().unwrap();
    assert!(registry.is_queued(&image));
    assert_eq!(registry.queue_len(), 1);

    registry.drain().unwrap();
    assert!(image.is_deleted());
}

/// Library whose release of a `Source` constructs a `Target` in the same
/// registry, the way a native finalizer can hand back a new object.
struct SpawningLibrary {
    inner: SimulatedLibrary,
    registry: Mutex<Option<HandleRegistry>>,
    spawned: Mutex<Vec<Handle<Target>>>,
}

impl NativeLibrary for SpawningLibrary {
    fn copy(&self, type_name: &'static str, ptr: NativePtr) -> HandleResult<NativePtr> {
        self.inner.copy(type_name, ptr)
    }

    fn release(&self, type_name: &'static str, ptr: NativePtr) {
        self.inner.release(type_name, ptr);
        if type_name != "Source" {
            return;
        }
        let registry = self.registry.lock().clone();
        if let Some(registry) = registry {
            let target = registry.construct::<Target>(self.inner.create::<Target>());
            self.spawned.lock().push(target);
        }
    }
}

#[test]
fn test_handle_enrolled_during_drain_is_drained_by_same_pass() {
    let lib = Arc::new(SpawningLibrary {
        inner: SimulatedLibrary::new(),
        registry: Mutex::new(None),
        spawned: Mutex::new(Vec::new()),
    });
    let registry = HandleRegistry::new(lib.clone());
    *lib.registry.lock() = Some(registry.clone());

    let source = registry.construct::<Source>(lib.inner.create::<Source>());
    let outcome = registry.drain_queue(DrainMode::Immediate).unwrap();

    assert_eq!(outcome, DrainOutcome::Released(2));
    assert_eq!(registry.queue_len(), 0);
    assert!(source.is_deleted());
    let spawned = lib.spawned.lock();
    assert_eq!(spawned.len(), 1);
    assert!(spawned[0].is_deleted());
    assert_eq!(lib.inner.live_count(), 0);
    drop(spawned);

    // Break the registry <-> library cycle
    lib.registry.lock().take();
}

#[test]
fn test_deferred_requests_coalesce() {
    let (lib, registry) = setup();
    registry.set_drain_mode(DrainMode::Deferred);

    let tokens: Arc<Mutex<Vec<PendingFlush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = tokens.clone();
    registry.set_flush_trigger(move |flush| sink.lock().push(flush));

    let handles: Vec<Handle<Image>> = (0..3).map(|_| new_image(&lib, &registry)).collect();
    assert_eq!(registry.drain().unwrap(), DrainOutcome::Deferred);
    assert_eq!(registry.drain_queue(DrainMode::Deferred).unwrap(), DrainOutcome::Deferred);

    assert_eq!(tokens.lock().len(), 1);
    assert_eq!(registry.queue_len(), 3);
    assert!(handles.iter().all(|h| !h.is_deleted()));

    let flush = tokens.lock().pop().unwrap();
    assert_eq!(flush.run().unwrap(), 3);
    assert_eq!(registry.queue_len(), 0);
    assert!(handles.iter().all(|h| h.is_deleted()));
    assert!(!registry.has_pending_flush());

    // The next enrollment schedules a fresh flush
    let _next = new_image(&lib, &registry);
    assert_eq!(tokens.lock().len(), 1);
}

#[test]
fn test_pending_flush_after_registry_dropped() {
    let lib = Arc::new(SimulatedLibrary::new());
    let tokens: Arc<Mutex<Vec<PendingFlush>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let registry = HandleRegistry::with_mode(lib.clone(), DrainMode::Deferred);
        let sink = tokens.clone();
        registry.set_flush_trigger(move |flush| sink.lock().push(flush));
        let image = new_image(&lib, &registry);
        image.prevent_auto_delete().unwrap();
        image.delete().unwrap();
    }

    let flush = tokens.lock().pop().unwrap();
    assert_eq!(flush.run(), Err(HandleError::RegistryClosed));
}

#[test]
fn test_registries_are_independent() {
    let (lib, first) = setup();
    let second = HandleRegistry::new(lib.clone());

    let a = new_image(&lib, &first);
    let b = new_image(&lib, &second);
    first.drain().unwrap();

    assert!(a.is_deleted());
    assert!(!b.is_deleted());
    assert_eq!(second.queue_len(), 1);
    second.drain().unwrap();
}

#[test]
fn test_registry_rejects_foreign_handles() {
    let (lib, first) = setup();
    let second = HandleRegistry::new(lib.clone());
    let image = new_image(&lib, &first);

    assert_eq!(
        second.delete(&image),
        Err(HandleError::ForeignHandle { type_name: "Image" })
    );
    assert!(second.prevent_auto_delete(&image).is_err());
    assert!(second.clone_handle(&image).is_err());
    assert!(!image.is_deleted());
    assert!(first.is_queued(&image));
    assert_eq!(second.queue_len(), 0);
    assert_eq!(lib.live_count(), 1);

    // A clone of the registry shares its queue
    first.clone().delete(&image).unwrap();
    assert_eq!(lib.live_count(), 0);
}

#[test]
fn test_handles_enrolled_after_shutdown_are_reported() {
    let (lib, registry) = setup();
    let early = new_image(&lib, &registry);
    assert_eq!(registry.shutdown().len(), 1);
    assert!(!early.is_delete_scheduled());
    early.delete_later().unwrap();

    let late = new_image(&lib, &registry);
    let copy = late.duplicate().unwrap();
    assert_eq!(registry.queue_len(), 3);
    assert_eq!(registry.drain(), Err(HandleError::RegistryClosed));
    assert!(!late.is_deleted());

    let report = registry.shutdown();
    let ids: Vec<_> = report.leaked.iter().map(|leak| leak.id).collect();
    assert_eq!(ids, vec![early.id(), late.id(), copy.id()]);
    assert!([&early, &late, &copy].iter().all(|h| !h.is_delete_scheduled()));
    assert_eq!(registry.queue_len(), 0);

    for image in [early, late, copy] {
        image.delete().unwrap();
    }
    assert_eq!(lib.live_count(), 0);
}

#[test]
fn test_concurrent_construct_and_drain() {
    let (lib, registry) = setup();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let lib = &lib;
            let registry = &registry;
            scope.spawn(move || {
                for i in 0..50 {
                    let image = new_image(lib, registry);
                    // Another worker's drain may release it first
                    if i % 7 == 0 && image.prevent_auto_delete().is_ok() {
                        image.delete().unwrap();
                    }
                    if (i + worker) % 10 == 0 {
                        registry.drain().unwrap();
                    }
                }
            });
        }
    });

    registry.drain().unwrap();
    assert_eq!(registry.queue_len(), 0);
    assert_eq!(lib.live_count(), 0);
    assert_eq!(lib.releases(), 200);
    assert_eq!(lib.invalid_releases(), 0);
}
