use gattkit_core::{DeviceEvent, DeviceId, EventBus, EventKind, OperationKind, Proximity};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn timed_out(device: &str) -> DeviceEvent {
    DeviceEvent::TimedOut {
        device: DeviceId::new(device),
        operation: OperationKind::Get,
    }
}

fn detected(device: &str, rssi: i32) -> DeviceEvent {
    DeviceEvent::Detected {
        device: DeviceId::new(device),
        rssi,
        proximity: Proximity::from_rssi(rssi),
    }
}

#[test]
fn test_batch_is_delivered_in_order() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe_all(&EventKind::ALL, move |event| sink.lock().push(event));

    let batch = vec![timed_out("a"), detected("b", -70), timed_out("c")];
    assert_eq!(bus.report(batch.clone()), 3);
    assert_eq!(*seen.lock(), batch);
}

#[test]
fn test_handler_may_subscribe_during_dispatch() {
    let bus = Arc::new(EventBus::new());
    let late = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&bus);
    let counter = late.clone();
    bus.subscribe_all(&[EventKind::TimedOut], move |_| {
        if let Some(bus) = weak.upgrade() {
            let counter = counter.clone();
            bus.subscribe_all(&[EventKind::Detected], move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    // The new directive sees later events in the same batch
    bus.report(vec![timed_out("a"), detected("a", -50)]);
    assert_eq!(late.load(Ordering::SeqCst), 1);
    assert_eq!(bus.directive_count(EventKind::Detected), 1);
}

#[test]
fn test_reports_from_threads_never_overlap() {
    let bus = Arc::new(EventBus::new());
    let inside = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    {
        let inside = inside.clone();
        let overlaps = overlaps.clone();
        let total = total.clone();
        bus.subscribe_all(&[EventKind::Detected], move |_| {
            if inside.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::yield_now();
            total.fetch_add(1, Ordering::SeqCst);
            inside.store(false, Ordering::SeqCst);
        });
    }

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    bus.report(std::iter::once(detected(&format!("dev-{}", n), -40 - i)));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(total.load(Ordering::SeqCst), 200);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_scoped_and_unscoped_directives_coexist() {
    let bus = EventBus::new();
    let scoped = Arc::new(AtomicUsize::new(0));
    let unscoped = Arc::new(AtomicUsize::new(0));

    let counter = scoped.clone();
    let id = bus.subscribe(&[EventKind::TimedOut], Some(&DeviceId::new("a")), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = unscoped.clone();
    bus.subscribe_all(&[EventKind::TimedOut], move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    bus.report(vec![timed_out("a"), timed_out("b")]);
    assert_eq!(scoped.load(Ordering::SeqCst), 1);
    assert_eq!(unscoped.load(Ordering::SeqCst), 2);

    assert!(bus.unsubscribe(&[EventKind::TimedOut], id));
    assert!(!bus.unsubscribe(&[EventKind::TimedOut], id));
    bus.report(vec![timed_out("a")]);
    assert_eq!(scoped.load(Ordering::SeqCst), 1);
}
