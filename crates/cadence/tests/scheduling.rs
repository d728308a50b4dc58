//! Update scheduling through the public engine surface: dedup, root-first
//! flush order, deferred events and unmount races.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cadence_core::{Context, Engine, Node, WeakNode};
use cadence_testing::{TestBody, TestNode};

fn engine(body: &Arc<TestBody>) -> Engine {
    let engine = Engine::builder(body.clone()).build();
    engine.init().unwrap();
    engine
}

/// body ─ a ─ b ─ div ─ c  (a, b, c are composers)
fn nested(body: &Arc<TestBody>) -> (Arc<TestNode>, Arc<TestNode>, Arc<TestNode>) {
    let a = body.composer("a");
    let b = body.composer("b");
    let div = body.structural("div");
    let c = body.composer("c");
    div.append(&c);
    b.append(&div);
    a.append(&b);
    body.attach(&a);
    (a, b, c)
}

#[test]
fn scheduling_same_component_many_times_renders_once() {
    let body = TestBody::new();
    let app = body.composer("app");
    let button = body.structural("button");
    let label = body.structural("label");
    app.append(&button);
    app.append(&label);
    body.attach(&app);
    let engine = engine(&body);

    for _ in 0..5 {
        engine.dispatch(&button.node(), |_| {});
        engine.dispatch(&label.node(), |_| {});
    }
    engine.dispatch(&app.node(), |_| {});
    engine.consume().unwrap();

    assert_eq!(app.renders(), 1);
    assert_eq!(engine.diagnostics().updates_count, 0);
    assert_eq!(engine.diagnostics().updates_queue_len, 0);
}

#[test]
fn flush_is_root_first_regardless_of_schedule_order() {
    let body = TestBody::new();
    let (a, b, c) = nested(&body);
    let engine = engine(&body);

    engine.dispatch(&c.node(), |_| {});
    engine.dispatch(&a.node(), |_| {});
    engine.dispatch(&b.node(), |_| {});
    engine.consume().unwrap();

    assert_eq!(body.log().with_prefix("render:"), vec!["a", "b", "c"]);
}

#[test]
fn child_unmounted_by_parent_render_is_never_rendered() {
    let body = TestBody::new();
    let parent = body.composer("parent");
    let child = body.composer("child");
    parent.append(&child);
    body.attach(&parent);

    let child_id = child.id();
    parent.on_render(move |node| {
        node.remove_child(child_id);
        Ok(())
    });
    let engine = engine(&body);

    engine.dispatch(&child.node(), |_| {});
    engine.dispatch(&parent.node(), |_| {});
    engine.consume().unwrap();

    assert_eq!(parent.renders(), 1);
    assert_eq!(child.renders(), 0);
    assert_eq!(engine.diagnostics().updates_count, 0);
}

#[test]
fn events_run_in_enqueue_order() {
    let body = TestBody::new();
    let app = body.composer("app");
    body.attach(&app);
    let engine = engine(&body);
    let log = body.log();

    for i in 0..10 {
        let log = log.clone();
        engine.dispatch(&app.node(), move |_| log.record(format!("event:{i}")));
    }
    engine.consume().unwrap();

    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(log.with_prefix("event:"), expected);
}

#[test]
fn deferred_event_runs_after_the_update_flush() {
    let body = TestBody::new();
    let app = body.composer("app");
    let button = body.structural("button");
    app.append(&button);
    body.attach(&app);
    let engine = engine(&body);
    let log = body.log();

    let observed_renders = Arc::new(AtomicUsize::new(usize::MAX));
    engine.dispatch(&button.node(), {
        let log = log.clone();
        let app = app.clone();
        let observed = observed_renders.clone();
        move |ctx| {
            log.record("event:click");
            ctx.defer(move |_| {
                log.record("event:deferred");
                observed.store(app.renders(), Ordering::SeqCst);
            });
        }
    });
    engine.consume().unwrap();

    let entries = log.entries();
    let click = entries.iter().position(|e| e == "event:click").unwrap();
    let render = entries.iter().position(|e| e == "render:app").unwrap();
    let deferred = entries.iter().position(|e| e == "event:deferred").unwrap();
    assert!(click < render && render < deferred, "{entries:?}");
    assert_eq!(observed_renders.load(Ordering::SeqCst), 1);
}

#[test]
fn deferred_event_waits_for_the_next_flush_with_consume_next() {
    let body = TestBody::new();
    let app = body.composer("app");
    body.attach(&app);
    let engine = engine(&body);
    let ran = Arc::new(AtomicBool::new(false));

    engine.dispatch(&app.node(), {
        let ran = ran.clone();
        move |ctx| ctx.defer(move |_| ran.store(true, Ordering::SeqCst))
    });

    assert!(engine.consume_next().unwrap());
    assert_eq!(app.renders(), 1);
    assert!(!ran.load(Ordering::SeqCst));

    assert!(engine.consume_next().unwrap());
    assert!(ran.load(Ordering::SeqCst));
    assert!(!engine.consume_next().unwrap());
}

#[test]
fn deferred_events_do_not_schedule_updates() {
    let body = TestBody::new();
    let app = body.composer("app");
    body.attach(&app);
    let engine = engine(&body);

    engine.defer(&app.node(), |_| {});
    engine.consume().unwrap();

    assert_eq!(app.renders(), 0);
}

#[test]
fn unmounted_sources_never_run() {
    let body = TestBody::new();
    let app = body.composer("app");
    let detached = body.composer("detached");
    let leaving = body.structural("leaving");
    app.append(&leaving);
    body.attach(&app);
    let engine = engine(&body);
    let calls = Arc::new(AtomicUsize::new(0));

    let count = |calls: &Arc<AtomicUsize>| {
        let calls = calls.clone();
        move |_: &Context| {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    };

    // Never mounted: rejected at dispatch time.
    engine.dispatch(&detached.node(), count(&calls));
    engine.defer(&detached.node(), count(&calls));

    // Mounted when queued, unmounted before the loop gets to it.
    engine.dispatch(&leaving.node(), count(&calls));
    engine.defer(&leaving.node(), count(&calls));
    app.remove_child(leaving.id());

    engine.consume().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(detached.renders(), 0);
    assert_eq!(app.renders(), 0);
}

#[test]
fn structural_nodes_without_component_are_not_scheduled() {
    let body = TestBody::new();
    let div = body.structural("div");
    body.attach(&div);
    let engine = engine(&body);
    let ran = Arc::new(AtomicBool::new(false));

    engine.dispatch(&div.node(), {
        let ran = ran.clone();
        move |_| ran.store(true, Ordering::SeqCst)
    });
    engine.consume().unwrap();

    assert!(ran.load(Ordering::SeqCst));
    assert!(body.log().with_prefix("render:").is_empty());
}

#[test]
fn emit_runs_inline_and_reschedules_only_outer_components() {
    let body = TestBody::new();
    let (outer, inner, _) = nested(&body);
    let field = body.structural("field");
    inner.append(&field);
    let engine = engine(&body);
    let mutated = Arc::new(AtomicBool::new(false));

    engine.emit(&field.node(), {
        let mutated = mutated.clone();
        move || mutated.store(true, Ordering::SeqCst)
    });
    assert!(mutated.load(Ordering::SeqCst));
    assert_eq!(outer.renders(), 0);

    engine.consume().unwrap();
    assert_eq!(outer.renders(), 1);
    assert_eq!(inner.renders(), 0);
}

#[test]
fn emit_on_unmounted_node_does_nothing() {
    let body = TestBody::new();
    let (a, _, _) = nested(&body);
    let orphan = body.structural("orphan");
    let engine = engine(&body);
    let mutated = Arc::new(AtomicBool::new(false));

    engine.emit(&orphan.node(), {
        let mutated = mutated.clone();
        move || mutated.store(true, Ordering::SeqCst)
    });
    engine.consume().unwrap();

    assert!(!mutated.load(Ordering::SeqCst));
    assert_eq!(a.renders(), 0);
}

#[test]
fn rescheduling_during_render_lands_in_the_next_flush() {
    let body = TestBody::new();
    let app = body.composer("app");
    body.attach(&app);
    let engine = engine(&body);

    let again = Arc::new(AtomicBool::new(true));
    let handle: WeakNode = Arc::downgrade(&app.node());
    app.on_render({
        let engine = engine.clone();
        move |_| {
            if again.swap(false, Ordering::SeqCst) {
                if let Some(node) = handle.upgrade() {
                    engine.dispatch(&node, |_| {});
                }
            }
            Ok(())
        }
    });

    engine.dispatch(&app.node(), |_| {});
    engine.consume().unwrap();
    assert_eq!(app.renders(), 1);

    engine.consume().unwrap();
    assert_eq!(app.renders(), 2);
}
