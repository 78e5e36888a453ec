//! Bridge lifecycle tests

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use vipsbind::{Bridge, BridgeConfig, Error};
use vipsbind_core::handle::{DrainMode, DrainOutcome, Image, PendingFlush, SimulatedLibrary};
use vipsbind_core::marshal::{Destructors, MarshalError};

/// Helper to start a bridge over a fresh simulated library
fn start(config: BridgeConfig) -> (Arc<SimulatedLibrary>, Bridge) {
    let lib = Arc::new(SimulatedLibrary::new());
    let bridge = Bridge::init(config, lib.clone()).unwrap();
    (lib, bridge)
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "drain_mode": "deferred",
            "vector_types": [
                {{"name": "VectorInt", "kind": "int"}},
                {{"name": "VectorFloat", "kind": "float"}}
            ]
        }}"#
    )
    .unwrap();

    let config = BridgeConfig::from_file(file.path()).unwrap();
    let (_lib, bridge) = start(config);
    assert_eq!(bridge.registry().drain_mode(), DrainMode::Deferred);
    assert_eq!(bridge.vector_types(), vec!["VectorFloat", "VectorInt"]);
}

#[test]
fn test_config_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = BridgeConfig::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_immediate_bridge_session() {
    let (lib, bridge) = start(BridgeConfig::default());

    let kept = bridge.construct::<Image>(lib.create::<Image>());
    kept.prevent_auto_delete().unwrap();
    let temp = bridge.construct::<Image>(lib.create::<Image>());

    // Arguments of one native call
    let mut destructors = Destructors::new();
    let identity = json!([[1, 0, 0], [0, 1, 0], [0, 0, 1]]);
    let matrix = bridge
        .encode_scoped("VectorDouble", &identity, &mut destructors)
        .unwrap();
    bridge
        .with_heap(|heap| {
            use vipsbind_core::marshal::{ElementKind, NativeHeap, PackedBuffer};
            let view = PackedBuffer::new(heap.bytes(matrix)?, ElementKind::Float64)?;
            assert_eq!(view.len(), 9);
            Ok::<_, MarshalError>(())
        })
        .unwrap();
    bridge.run_destructors(destructors).unwrap();
    assert_eq!(bridge.heap_in_use(), 0);

    assert_eq!(bridge.drain().unwrap(), DrainOutcome::Released(1));
    assert!(temp.is_deleted());
    assert!(!kept.is_deleted());

    kept.delete().unwrap();
    let err: Error = kept.delete().unwrap_err().into();
    assert!(err.is_deleted_error());

    let report = bridge.shutdown();
    assert!(report.is_clean());
    assert_eq!(lib.live_count(), 0);
}

#[test]
fn test_deferred_bridge_session() {
    let (lib, bridge) = start(BridgeConfig::deferred());
    let tokens: Arc<Mutex<Vec<PendingFlush>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = tokens.clone();
    bridge.set_flush_trigger(move |flush| sink.lock().push(flush));

    let images: Vec<_> = (0..4)
        .map(|_| bridge.construct::<Image>(lib.create::<Image>()))
        .collect();
    assert_eq!(bridge.drain().unwrap(), DrainOutcome::Deferred);
    assert_eq!(tokens.lock().len(), 1);
    assert!(images.iter().all(|image| !image.is_deleted()));

    let flush = tokens.lock().pop().unwrap();
    assert_eq!(flush.run().unwrap(), 4);
    assert!(images.iter().all(|image| image.is_deleted()));
    assert!(bridge.shutdown().is_clean());
}

#[test]
fn test_second_decode_fails() {
    let (_lib, bridge) = start(BridgeConfig::default());
    let ptr = bridge.encode("VectorInt", &json!([1, 2, 3])).unwrap();
    assert_eq!(bridge.decode("VectorInt", ptr).unwrap(), json!([1, 2, 3]));

    let err = bridge.decode("VectorInt", ptr).unwrap_err();
    assert!(matches!(err, Error::Marshal(MarshalError::InvalidPointer(p)) if p == ptr));
}

#[test]
fn test_shutdown_reports_leaked_buffers() {
    let (lib, bridge) = start(BridgeConfig::default());
    let image = bridge.construct::<Image>(lib.create::<Image>());
    image.prevent_auto_delete().unwrap();
    let ptr = bridge.encode("VectorDouble", &json!(3.5)).unwrap();
    bridge.free(ptr).unwrap();
    bridge.encode("VectorDouble", &json!([1, 2])).unwrap();

    let report = bridge.shutdown();
    // Exempted handles are the caller's to release, not a queue leak
    assert!(report.handles.is_clean());
    assert_eq!(report.leaked_buffers, 1);
    assert_eq!(report.leaked_bytes, 8 + 16);
    image.delete().unwrap();
}
