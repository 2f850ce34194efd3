mod common;

use glink::{LinkError, LinkState, StageKind, StrategyChoice};
use pretty_assertions::assert_eq;

use common::{context, stage, BROKEN_FRAGMENT, FRAGMENT, FRAGMENT_ALT, VERTEX};

#[test]
fn one_program_per_distinct_stage_tuple() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f1 = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    let f2 = stage(StageKind::Fragment, "flat.frag", FRAGMENT_ALT);

    ctx.bind(&v);
    for fragment in [&f1, &f1, &f2, &f1, &f2, &f2] {
        ctx.bind(fragment);
        assert!(ctx.activate_current_program().unwrap());
        assert!(ctx.activate_current_program().unwrap());
    }

    assert_eq!(ctx.cache().len(), 2);
    let stats = ctx.driver().stats();
    assert_eq!(stats.program_links, 2);
    assert_eq!(stats.shader_compiles, 3);
}

#[test]
fn reactivation_does_not_rebuild_references() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    ctx.bind(&v);
    ctx.bind(&f);

    ctx.activate_current_program().unwrap();
    let uniforms = ctx.current_program().unwrap().uniforms().to_vec();
    let queries = ctx.driver().stats().reflection_queries;
    assert_eq!(uniforms.len(), 3);

    for _ in 0..3 {
        ctx.activate_current_program().unwrap();
    }
    assert_eq!(ctx.current_program().unwrap().uniforms(), uniforms.as_slice());
    assert_eq!(ctx.driver().stats().reflection_queries, queries);
}

#[test]
fn rebinding_the_same_stage_keeps_the_current_program() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    ctx.bind(&v);
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();
    let key = ctx.current_program().unwrap().key();
    let links = ctx.driver().stats().program_links;

    assert!(!ctx.bind(&v));
    assert!(!ctx.bind(&f));
    assert_eq!(ctx.current_program().map(|p| p.key()), Some(key));

    ctx.activate_current_program().unwrap();
    assert_eq!(ctx.driver().stats().program_links, links);
    assert_eq!(ctx.cache().stats().misses, 1);
}

#[test]
fn swapping_a_fragment_stage_leaves_the_first_program_intact() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v1 = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f1 = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    let f2 = stage(StageKind::Fragment, "flat.frag", FRAGMENT_ALT);

    ctx.bind(&v1);
    ctx.bind(&f1);
    ctx.activate_current_program().unwrap();
    assert_eq!(ctx.cache().len(), 1);
    let first = ctx.current_program().unwrap();
    assert_eq!(first.state(), LinkState::Linked);
    let first_tuple = first.tuple().clone();
    let first_uniforms = first.uniforms().len();

    ctx.bind(&f2);
    ctx.activate_current_program().unwrap();
    assert_eq!(ctx.cache().len(), 2);
    assert_eq!(ctx.current_program().unwrap().label(), "scene.vert+flat.frag");
    assert!(ctx.cache().iter().all(|p| p.state() == LinkState::Linked));

    let first = ctx.cache().get(&first_tuple).unwrap();
    assert_eq!(first.label(), "scene.vert+lit.frag");
    assert_eq!(first.uniforms().len(), first_uniforms);
}

#[test]
fn compile_failure_is_reported_once() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let broken = stage(StageKind::Fragment, "broken.frag", BROKEN_FRAGMENT);
    ctx.bind(&v);
    ctx.bind(&broken);

    let err = ctx.activate_current_program().unwrap_err();
    match &err {
        LinkError::Compile { stage, kind, log } => {
            assert_eq!(stage, "broken.frag");
            assert_eq!(*kind, StageKind::Fragment);
            assert!(log.contains("missing output declaration"), "{log}");
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
    let stats = ctx.driver().stats();
    assert_eq!(stats.shader_compiles, 2);

    assert_eq!(ctx.activate_current_program().unwrap_err(), err);
    assert_eq!(ctx.driver().stats(), stats);
    assert_eq!(ctx.current_program().unwrap().state(), LinkState::FailedToLink);
    assert_eq!(broken.compile_count(), 1);
}

#[test]
fn failed_stage_is_not_recompiled_for_another_program() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v1 = stage(StageKind::Vertex, "a.vert", VERTEX);
    let v2 = stage(StageKind::Vertex, "b.vert", VERTEX);
    let broken = stage(StageKind::Fragment, "broken.frag", BROKEN_FRAGMENT);

    ctx.bind(&broken);
    ctx.bind(&v1);
    assert!(ctx.activate_current_program().is_err());
    ctx.bind(&v2);
    assert!(ctx.activate_current_program().is_err());

    assert_eq!(broken.compile_count(), 1);
    assert_eq!(ctx.cache().len(), 2);
}

#[test]
fn link_failure_is_sticky() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    ctx.bind(&v);
    ctx.bind(&f);

    ctx.driver_mut().set_fail_links(true);
    let err = ctx.activate_current_program().unwrap_err();
    assert!(matches!(&err, LinkError::Link { program, .. } if program == "scene.vert+lit.frag"));
    let links = ctx.driver().stats().program_links;

    ctx.driver_mut().set_fail_links(false);
    assert_eq!(ctx.activate_current_program().unwrap_err(), err);
    assert_eq!(ctx.driver().stats().program_links, links);
    assert_eq!(ctx.cache().len(), 1);
}

#[test]
fn nothing_bound_means_nothing_current() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    assert!(!ctx.activate_current_program().unwrap());

    ctx.bind(&v);
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();
    assert!(ctx.driver().current_program().is_some());

    ctx.unbind(StageKind::Vertex);
    ctx.unbind(StageKind::Fragment);
    assert!(!ctx.activate_current_program().unwrap());
    assert_eq!(ctx.driver().current_program(), None);
    assert_eq!(ctx.cache().len(), 1);
}

#[test]
fn releasing_a_stage_drops_its_programs() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f1 = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    let f2 = stage(StageKind::Fragment, "flat.frag", FRAGMENT_ALT);

    ctx.bind(&v);
    ctx.bind(&f2);
    ctx.activate_current_program().unwrap();
    ctx.bind(&f1);
    ctx.activate_current_program().unwrap();
    assert_eq!(ctx.cache().len(), 2);
    let live = ctx.driver().live_objects();

    ctx.release_stage(&f1);
    assert_eq!(ctx.cache().len(), 1);
    assert!(ctx.cache().iter().all(|p| !p.uses_stage(&f1)));
    assert!(ctx.active().get(StageKind::Fragment).is_none());
    assert!(ctx.current_program().is_none());
    assert!(!f1.is_compiled());
    // One program and one shader.
    assert_eq!(ctx.driver().live_objects(), live - 2);

    ctx.activate_current_program().unwrap();
    assert_eq!(ctx.current_program().unwrap().label(), "scene.vert");
}

#[test]
fn clear_forgets_every_driver_object() {
    let mut ctx = context(StrategyChoice::Monolithic);
    let v = stage(StageKind::Vertex, "scene.vert", VERTEX);
    let f = stage(StageKind::Fragment, "lit.frag", FRAGMENT);
    ctx.bind(&v);
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();

    ctx.clear();
    assert!(ctx.cache().is_empty());
    assert!(ctx.active().is_empty());
    assert_eq!(ctx.driver().live_objects(), 0);
    assert!(!v.is_compiled());

    ctx.bind(&v);
    ctx.bind(&f);
    ctx.activate_current_program().unwrap();
    assert_eq!(v.compile_count(), 2);
}
