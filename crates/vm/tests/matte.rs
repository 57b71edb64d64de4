//! End-to-end execution tests: load real bytecode text, bind a grid,
//! run, and read back the output globals.

use std::sync::Arc;
use umbra_foundation::V3;
use umbra_vm::{
    load_program, RuntimeError, ShaderInstance, ShadingContext, StandardVar, TestGrid,
};
use umbra_shadeops::ShadeopRegistry;

fn make_instance(src: &str) -> ShaderInstance {
    let registry = ShadeopRegistry::with_builtins();
    let program = load_program("test", src, &registry).expect("program loads");
    ShaderInstance::new(Arc::new(program))
}

const MATTE: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
param uniform float Kd
param uniform float Ka
varying float d
segment Init
pushif 0.8
pop Kd
pushif 0.2
pop Ka
segment Code
pushv N
normalize
pushv I
normalize
dotpp
pop d
pushv Cs
pushv d
pushv d
mulff
pushv Kd
mulff
pushv Ka
addff
setfc
mulcc
pop Ci
pushv Os
pop Oi
"#;

#[test]
fn matte_shader_on_single_point_grid() {
    let mut inst = make_instance(MATTE);
    let mut grid = TestGrid::new(1, 1);
    grid.fill_triple(StandardVar::N, V3::new(0.0, 0.0, 1.0));
    grid.fill_triple(StandardVar::I, V3::new(0.0, 0.0, 1.0));
    // Cs and Os default to white.

    let mut ctx = ShadingContext::new();
    inst.run_defaults(&mut grid, &mut ctx).unwrap();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let d = inst.local("d").unwrap();
    assert!((d.borrow().floats().unwrap().at(0) - 1.0).abs() < 1e-6);
    assert_eq!(grid.triple_at(StandardVar::Ci, 0), Some(V3::ONE));
    assert_eq!(grid.triple_at(StandardVar::Oi, 0), Some(V3::ONE));
}

#[test]
fn matte_shader_scales_with_incidence_angle() {
    let mut inst = make_instance(MATTE);
    let mut grid = TestGrid::new(1, 1);
    grid.fill_triple(StandardVar::N, V3::new(0.0, 0.0, 1.0));
    // 60 degrees off the normal: d = 0.5.
    let half = 3.0f32.sqrt() / 2.0;
    grid.fill_triple(StandardVar::I, V3::new(half, 0.0, 0.5));

    let mut ctx = ShadingContext::new();
    inst.run_defaults(&mut grid, &mut ctx).unwrap();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let ci = grid.triple_at(StandardVar::Ci, 0).unwrap();
    let expected = 0.5 * 0.5 * 0.8 + 0.2;
    assert!((ci.x - expected).abs() < 1e-5);
}

const BRANCHY: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
varying float x
segment Code
rs_push
pushv s
pushif 0.5
ltff
rs_get
pushif 1.0
pop x
rs_inverse
pushif 2.0
pop x
rs_pop
"#;

#[test]
fn divergent_branch_masks_stores_per_point() {
    let mut inst = make_instance(BRANCHY);
    let mut grid = TestGrid::new(4, 1);
    for i in 0..4 {
        grid.set_float(StandardVar::S, i, i as f32 * 0.25); // 0, .25, .5, .75
    }

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let x = inst.local("x").unwrap();
    let x = x.borrow();
    let xf = x.floats().unwrap();
    assert_eq!(
        [*xf.at(0), *xf.at(1), *xf.at(2), *xf.at(3)],
        [1.0, 1.0, 2.0, 2.0]
    );
}

#[test]
fn masked_off_points_keep_previous_contents() {
    const SEEDED: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
varying float x
segment Code
pushif 9.0
pop x
rs_push
pushv s
pushif 0.5
ltff
rs_get
pushif 1.0
pop x
rs_pop
"#;
    let mut inst = make_instance(SEEDED);
    let mut grid = TestGrid::new(2, 1);
    grid.set_float(StandardVar::S, 0, 0.0);
    grid.set_float(StandardVar::S, 1, 1.0);

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let x = inst.local("x").unwrap();
    let x = x.borrow();
    let xf = x.floats().unwrap();
    // Point 1 was inactive for the second store and keeps the seed.
    assert_eq!([*xf.at(0), *xf.at(1)], [1.0, 9.0]);
}

#[test]
fn uniform_varying_arithmetic_broadcasts() {
    const MIXED: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
param uniform float scale
varying float x
segment Init
pushif 10.0
pop scale
segment Code
pushv s
pushv scale
mulff
pop x
"#;
    let mut inst = make_instance(MIXED);
    let mut grid = TestGrid::new(3, 1);
    for i in 0..3 {
        grid.set_float(StandardVar::S, i, i as f32);
    }

    let mut ctx = ShadingContext::new();
    inst.run_defaults(&mut grid, &mut ctx).unwrap();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let x = inst.local("x").unwrap();
    let x = x.borrow();
    assert!(x.is_varying());
    let xf = x.floats().unwrap();
    assert_eq!([*xf.at(0), *xf.at(1), *xf.at(2)], [0.0, 10.0, 20.0]);
}

const ILLUM_LOOP: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
varying color sum
varying float visits
segment Code
pushv P
init_illuminance
jz : 1
: 0
rs_push
pushv P
illuminance
pushv sum
pushv Cl
addcc
pop sum
pushv visits
pushif 1.0
addff
pop visits
rs_pop
advance_illuminance
jnz : 0
: 1
"#;

#[test]
fn illuminance_loop_visits_each_light_once() {
    let mut inst = make_instance(ILLUM_LOOP);
    let mut grid = TestGrid::new(2, 1);
    grid.add_point_light(V3::new(0.0, 0.0, 5.0), V3::splat(0.5));
    grid.add_point_light(V3::new(5.0, 0.0, 0.0), V3::splat(0.25));

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let visits = inst.local("visits").unwrap();
    let visits = visits.borrow();
    let vf = visits.floats().unwrap();
    assert_eq!(*vf.at(0), 2.0);
    assert_eq!(*vf.at(1), 2.0);

    let sum = inst.local("sum").unwrap();
    let sum = sum.borrow();
    let st = sum.triples().unwrap();
    assert!((st.at(0).x - 0.75).abs() < 1e-6);
}

#[test]
fn illuminance_loop_with_no_lights_skips_body() {
    let mut inst = make_instance(ILLUM_LOOP);
    let mut grid = TestGrid::new(1, 1);

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let visits = inst.local("visits").unwrap();
    let visits = visits.borrow();
    let vf = visits.floats().unwrap();
    assert_eq!(*vf.at(0), 0.0);
}

#[test]
fn unbalanced_program_reports_stack_imbalance() {
    const LEAKY: &str = "surface\nAQSIS_V 1.2.0\nsegment Code\npushif 1.0\n";
    let mut inst = make_instance(LEAKY);
    let mut grid = TestGrid::new(1, 1);
    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    let err = inst.run(&mut grid, &mut ctx).unwrap_err();
    assert!(matches!(err, RuntimeError::StackImbalance(1)));
}

#[test]
fn array_access_round_trip_and_out_of_range_recovery() {
    const ARRAYS: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
uniform float ramp [ 3 ]
uniform float x
segment Code
pushif 7.0
pushif 1.0
ipop ramp
pushif 42.0
pushif 9.0
ipop ramp
pushif 1.0
ipushv ramp
pop x
"#;
    let mut inst = make_instance(ARRAYS);
    let mut grid = TestGrid::new(1, 1);
    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    // The out-of-range write is skipped and logged, never fatal.
    inst.run(&mut grid, &mut ctx).unwrap();

    let x = inst.local("x").unwrap();
    assert_eq!(*x.borrow().floats().unwrap().at(0), 7.0);
}

#[test]
fn external_shadeop_called_through_program() {
    const EXTERNAL: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
varying float luma
segment Code
pushv Cs
external luminance f 1 c
pop luma
"#;
    let mut inst = make_instance(EXTERNAL);
    let mut grid = TestGrid::new(1, 1);
    grid.fill_triple(StandardVar::Cs, V3::new(1.0, 1.0, 1.0));

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let luma = inst.local("luma").unwrap();
    let v = *luma.borrow().floats().unwrap().at(0);
    assert!((v - 1.0).abs() < 1e-3);
}

#[test]
fn cancelled_environment_short_circuits_texture_lookup() {
    const TEXTURED: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
varying color c
segment Code
pushis "wood"
pushv s
pushv t
texturec
pop c
"#;
    let mut inst = make_instance(TEXTURED);
    let mut grid = TestGrid::new(1, 1);
    grid.define_texture("wood", V3::new(0.6, 0.4, 0.2));
    grid.cancel();

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    // The lookup was skipped; the output is zeroed, not the texel.
    let c = inst.local("c").unwrap();
    assert_eq!(*c.borrow().triples().unwrap().at(0), V3::ZERO);
}

#[test]
fn texture_lookup_reads_registered_map() {
    const TEXTURED: &str = r#"
surface
AQSIS_V 1.2.0
segment Data
varying color c
segment Code
pushis "wood"
pushv s
pushv t
texturec
pop c
"#;
    let mut inst = make_instance(TEXTURED);
    let mut grid = TestGrid::new(1, 1);
    grid.define_texture("wood", V3::new(0.6, 0.4, 0.2));

    let mut ctx = ShadingContext::new();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();

    let c = inst.local("c").unwrap();
    assert_eq!(*c.borrow().triples().unwrap().at(0), V3::new(0.6, 0.4, 0.2));
}

#[test]
fn context_pool_reuses_temporaries_across_runs() {
    let mut inst = make_instance(MATTE);
    let mut grid = TestGrid::new(2, 2);
    grid.fill_triple(StandardVar::N, V3::new(0.0, 0.0, 1.0));
    grid.fill_triple(StandardVar::I, V3::new(0.0, 0.0, 1.0));

    let mut ctx = ShadingContext::new();
    inst.run_defaults(&mut grid, &mut ctx).unwrap();
    inst.prepare(&grid);
    inst.run(&mut grid, &mut ctx).unwrap();
    let (_, misses_first) = ctx.pool.stats();
    inst.run(&mut grid, &mut ctx).unwrap();
    let (hits, misses_second) = ctx.pool.stats();

    // The second run allocates nothing new.
    assert_eq!(misses_first, misses_second);
    assert!(hits > 0);
}
