//! Randomized scheduling: whatever the order and the producer threads, every
//! scheduled component renders once per flush, root first.

use std::sync::Arc;
use std::thread;

use cadence_core::{Engine, Node};
use cadence_testing::{TestBody, TestNode};

const DEPTH: usize = 12;

/// A chain of composers, each wrapped in a structural node.
fn chain(body: &Arc<TestBody>) -> Vec<Arc<TestNode>> {
    let mut composers = Vec::with_capacity(DEPTH);
    let mut parent: Option<Arc<TestNode>> = None;

    for level in 0..DEPTH {
        let composer = body.composer(&format!("c{level:02}"));
        let wrapper = body.structural(&format!("div{level:02}"));
        wrapper.append(&composer);
        match &parent {
            Some(parent) => parent.append(&wrapper),
            None => body.attach(&wrapper),
        }
        parent = Some(composer.clone());
        composers.push(composer);
    }
    composers
}

#[test]
fn random_schedule_orders_flush_root_first() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);

    for round in 0..20 {
        let body = TestBody::new();
        let composers = chain(&body);
        let engine = Engine::builder(body.clone()).build();
        engine.init().unwrap();

        let mut picked: Vec<usize> = (0..DEPTH).filter(|_| rng.bool()).collect();
        let repeats = rng.usize(1..4);
        let mut order: Vec<usize> = picked
            .iter()
            .copied()
            .cycle()
            .take(picked.len() * repeats)
            .collect();
        rng.shuffle(&mut order);

        for &level in &order {
            engine.dispatch(&composers[level].node(), |_| {});
        }
        engine.consume().unwrap();

        picked.sort_unstable();
        let expected: Vec<String> = picked.iter().map(|level| format!("c{level:02}")).collect();
        assert_eq!(body.log().with_prefix("render:"), expected, "round {round}");
    }
}

#[test]
fn concurrent_producers_render_each_component_once() {
    let body = TestBody::new();
    let composers = chain(&body);
    let engine = Engine::builder(body.clone()).build();
    engine.init().unwrap();

    let handles: Vec<_> = (0..4u64)
        .map(|seed| {
            let engine = engine.clone();
            let nodes: Vec<_> = composers.iter().map(|c| c.node()).collect();
            thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(seed);
                for _ in 0..200 {
                    let node = &nodes[rng.usize(..nodes.len())];
                    engine.dispatch(node, |_| {});
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    engine.consume().unwrap();

    let rendered = body.log().with_prefix("render:");
    let mut sorted = rendered.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(rendered, sorted, "renders are unique and root first");
    for composer in &composers {
        assert!(composer.renders() <= 1, "{} rendered twice", composer.name());
    }
}

#[test]
fn random_unmounts_during_flush_never_render_detached_components() {
    let mut rng = fastrand::Rng::with_seed(42);

    for _ in 0..20 {
        let body = TestBody::new();
        let composers = chain(&body);
        let engine = Engine::builder(body.clone()).build();
        engine.init().unwrap();

        // One composer drops its subtree while rendering.
        let cut = rng.usize(..DEPTH - 1);
        let wrapper = composers[cut].children()[0].id();
        composers[cut].on_render(move |node| {
            node.remove_child(wrapper);
            Ok(())
        });

        let mut order: Vec<usize> = (0..DEPTH).collect();
        rng.shuffle(&mut order);
        for &level in &order {
            engine.dispatch(&composers[level].node(), |_| {});
        }
        engine.consume().unwrap();

        for (level, composer) in composers.iter().enumerate() {
            let expected = usize::from(level <= cut);
            assert_eq!(composer.renders(), expected, "c{level:02} with cut at {cut}");
            assert_eq!(composer.mounted(), level <= cut);
        }
    }
}
