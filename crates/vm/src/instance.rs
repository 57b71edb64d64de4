//! Shader instances.
//!
//! A [`ShaderInstance`] is the unit the renderer manipulates: one loaded
//! program (shared, immutable) plus this instance's local variables,
//! stored arguments, and external-call initialization state. Lifecycle:
//!
//! 1. create from a program; run the Init segment once at width 1 to
//!    seed parameter defaults;
//! 2. store arguments as the scene binds them (deferred — each carries
//!    its declared coordinate space);
//! 3. prepare for a grid: promote varying locals to the grid's point
//!    count and re-apply stored arguments under the current transform;
//! 4. run the Code segment;
//! 5. clone for the next primitive sharing the shader, or drop.

use crate::env::{ShadingEnv, StandardVar};
use crate::error::RunResult;
use crate::machine::{Machine, Segment};
use crate::pool::ValuePool;
use crate::program::Program;
use crate::value::{value_ref, ArrayValue, ShadingValue, ValueRef};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use umbra_foundation::{ShaderKind, StorageClass, VarType};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Execution context owned by one shading worker: the temporary pool
/// shared by every run that worker performs. Workers must not share a
/// context; each brings its own.
#[derive(Default)]
pub struct ShadingContext {
    pub pool: ValuePool,
}

impl ShadingContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A deferred parameter binding, applied at prepare time.
#[derive(Debug, Clone)]
pub struct StoredArg {
    pub name: String,
    pub vtype: VarType,
    /// Coordinate space the raw value was expressed in.
    pub space: String,
    pub value: ShadingValue,
}

/// One instantiation of a shader declaration.
pub struct ShaderInstance {
    program: Arc<Program>,
    locals: Vec<ValueRef>,
    stored_args: Vec<StoredArg>,
    instance_id: u64,
    initialized_externs: HashSet<u16>,
    npoints: usize,
}

impl ShaderInstance {
    /// Build an instance with default-initialized locals. The caller runs
    /// [`run_defaults`](Self::run_defaults) once before first use.
    pub fn new(program: Arc<Program>) -> Self {
        let locals = program
            .symbols
            .iter()
            .map(|sym| {
                let value = match sym.array_len {
                    Some(len) => {
                        ShadingValue::Array(ArrayValue::new(sym.vtype, sym.class, len, 1))
                    }
                    None => ShadingValue::new(sym.vtype, sym.class, 1),
                };
                value_ref(value)
            })
            .collect();
        Self {
            program,
            locals,
            stored_args: Vec::new(),
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            initialized_externs: HashSet::new(),
            npoints: 1,
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn name(&self) -> &str {
        &self.program.name
    }

    pub fn kind(&self) -> ShaderKind {
        self.program.kind
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Whether the program references a standard variable — the renderer
    /// uses this to skip filling globals the shader never reads.
    pub fn uses(&self, var: StandardVar) -> bool {
        self.program.uses_standard(var)
    }

    /// Storage handle for a local variable, by name.
    pub fn local(&self, name: &str) -> Option<ValueRef> {
        self.program
            .slot(name)
            .and_then(|slot| self.locals.get(slot as usize).cloned())
    }

    /// Record a deferred parameter value. Validation happens at prepare
    /// time so a bad argument costs a log line, not a failed bind.
    pub fn store_argument(
        &mut self,
        name: impl Into<String>,
        vtype: VarType,
        space: impl Into<String>,
        value: ShadingValue,
    ) {
        self.stored_args.push(StoredArg {
            name: name.into(),
            vtype,
            space: space.into(),
            value,
        });
    }

    /// Run the Init segment once, at width 1, to seed parameter defaults.
    pub fn run_defaults(
        &mut self,
        env: &mut dyn ShadingEnv,
        ctx: &mut ShadingContext,
    ) -> RunResult<()> {
        let program = Arc::clone(&self.program);
        let mut machine = Machine::new(
            program.as_ref(),
            Segment::Init,
            env,
            &mut ctx.pool,
            &self.locals,
            1,
            self.instance_id,
            &mut self.initialized_externs,
        );
        machine.run()
    }

    /// Bind to a grid: promote varying locals to the grid's point count
    /// and re-apply stored arguments under the current transform.
    pub fn prepare(&mut self, env: &dyn ShadingEnv) {
        let npoints = env.point_count().max(1);
        self.npoints = npoints;
        for (sym, local) in self.program.symbols.iter().zip(&self.locals) {
            if sym.class == StorageClass::Varying {
                local.borrow_mut().promote(npoints);
            }
        }
        for arg in &self.stored_args {
            apply_argument(&self.program, &self.locals, arg, env, npoints);
        }
        debug!(
            shader = %self.program.name,
            npoints,
            args = self.stored_args.len(),
            "prepared shader instance"
        );
    }

    /// Run the Code segment over the bound grid.
    pub fn run(&mut self, env: &mut dyn ShadingEnv, ctx: &mut ShadingContext) -> RunResult<()> {
        let npoints = env.point_count().max(1);
        let program = Arc::clone(&self.program);
        let mut machine = Machine::new(
            program.as_ref(),
            Segment::Code,
            env,
            &mut ctx.pool,
            &self.locals,
            npoints,
            self.instance_id,
            &mut self.initialized_externs,
        );
        machine.run()
    }

    /// Independent copy: deep-copied locals and arguments, shared
    /// program, fresh instance identity.
    pub fn clone_instance(&self) -> Self {
        Self {
            program: Arc::clone(&self.program),
            locals: self
                .locals
                .iter()
                .map(|v| value_ref(v.borrow().deep_clone()))
                .collect(),
            stored_args: self.stored_args.clone(),
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            initialized_externs: HashSet::new(),
            npoints: self.npoints,
        }
    }
}

/// Apply one stored argument. Failures recover locally: the parameter
/// keeps its default and the problem is logged.
fn apply_argument(
    program: &Program,
    locals: &[ValueRef],
    arg: &StoredArg,
    env: &dyn ShadingEnv,
    npoints: usize,
) {
    let Some(slot) = program.slot(&arg.name) else {
        warn!(shader = %program.name, arg = %arg.name, "argument names no parameter, ignored");
        return;
    };
    let sym = &program.symbols[slot as usize];
    if !sym.param {
        warn!(shader = %program.name, arg = %arg.name, "argument targets a non-parameter, ignored");
        return;
    }
    let compatible =
        sym.vtype == arg.vtype || (sym.vtype.is_point_like() && arg.vtype.is_point_like());
    if !compatible {
        warn!(
            shader = %program.name,
            arg = %arg.name,
            declared = %arg.vtype,
            expected = %sym.vtype,
            "argument type mismatch, parameter keeps its default"
        );
        return;
    }

    let coerced = coerce_space(&arg.value, arg.vtype, &arg.space, env);
    let local = &locals[slot as usize];
    let mut dst = local.borrow_mut();
    if coerced.is_varying() && !dst.is_varying() {
        dst.promote(npoints);
    }
    if let Err(err) = dst.set_from(&coerced) {
        warn!(
            shader = %program.name,
            arg = %arg.name,
            %err,
            "argument rejected, parameter keeps its default"
        );
    }
}

/// Convert a stored value from its declared space into "current".
fn coerce_space(
    value: &ShadingValue,
    vtype: VarType,
    space: &str,
    env: &dyn ShadingEnv,
) -> ShadingValue {
    if space.is_empty() || space == "current" {
        return value.deep_clone();
    }
    let Some(matrix) = env.space_matrix(space, "current") else {
        warn!(space, "unknown argument space, value used untransformed");
        return value.deep_clone();
    };
    let mut out = value.deep_clone();
    let transformed = match vtype {
        VarType::Point => out.triples_mut().map(|d| {
            for i in 0..d.len() {
                let v = matrix.transform_point(*d.at(i));
                d.set_at(i, v);
            }
        }),
        VarType::Vector => out.triples_mut().map(|d| {
            for i in 0..d.len() {
                let v = matrix.transform_vector(*d.at(i));
                d.set_at(i, v);
            }
        }),
        VarType::Normal => out.triples_mut().map(|d| {
            for i in 0..d.len() {
                let v = matrix.transform_normal(*d.at(i));
                d.set_at(i, v);
            }
        }),
        VarType::Matrix => out.matrices_mut().map(|d| {
            for i in 0..d.len() {
                let v = matrix.mul(d.at(i));
                d.set_at(i, v);
            }
        }),
        // Floats, strings, and colors carry no spatial meaning here.
        _ => Ok(()),
    };
    if let Err(err) = transformed {
        warn!(%err, "argument space coercion skipped");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::TestGrid;
    use crate::loader::load_program;
    use umbra_foundation::{Mat4, V3};
    use umbra_shadeops::ShadeopRegistry;

    fn instance(src: &str) -> ShaderInstance {
        let registry = ShadeopRegistry::with_builtins();
        let program = load_program("test", src, &registry).unwrap();
        ShaderInstance::new(Arc::new(program))
    }

    const PARAM_SHADER: &str = "\
surface
AQSIS_V 1.2.0
segment Data
param uniform float Kd
param uniform point center
segment Init
pushif 0.8
pop Kd
segment Code
pushv Kd
drop
";

    #[test]
    fn test_defaults_seeded_once() {
        let mut inst = instance(PARAM_SHADER);
        let mut grid = TestGrid::new(1, 1);
        let mut ctx = ShadingContext::new();
        inst.run_defaults(&mut grid, &mut ctx).unwrap();
        let kd = inst.local("Kd").unwrap();
        assert_eq!(*kd.borrow().floats().unwrap().at(0), 0.8);
    }

    #[test]
    fn test_argument_applied_with_space() {
        let mut inst = instance(PARAM_SHADER);
        let mut grid = TestGrid::new(1, 1);
        grid.define_space("object", Mat4::translation(V3::new(5.0, 0.0, 0.0)));
        let mut ctx = ShadingContext::new();
        inst.run_defaults(&mut grid, &mut ctx).unwrap();

        inst.store_argument(
            "center",
            VarType::Point,
            "object",
            ShadingValue::uniform_triple(VarType::Point, V3::new(1.0, 0.0, 0.0)),
        );
        inst.prepare(&grid);
        let center = inst.local("center").unwrap();
        assert_eq!(
            *center.borrow().triples().unwrap().at(0),
            V3::new(6.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_bad_argument_keeps_default() {
        let mut inst = instance(PARAM_SHADER);
        let mut grid = TestGrid::new(1, 1);
        let mut ctx = ShadingContext::new();
        inst.run_defaults(&mut grid, &mut ctx).unwrap();

        // Wrong type for Kd, unknown parameter name: both recovered.
        inst.store_argument("Kd", VarType::Color, "", ShadingValue::uniform_triple(VarType::Color, V3::ONE));
        inst.store_argument("missing", VarType::Float, "", ShadingValue::uniform_float(3.0));
        inst.prepare(&grid);
        let kd = inst.local("Kd").unwrap();
        assert_eq!(*kd.borrow().floats().unwrap().at(0), 0.8);
    }

    #[test]
    fn test_varying_argument_promotes_uniform_param() {
        let mut inst = instance(PARAM_SHADER);
        let grid = TestGrid::new(2, 2);
        let mut varying = ShadingValue::uniform_float(0.25);
        varying.promote(4);
        inst.store_argument("Kd", VarType::Float, "", varying);
        inst.prepare(&grid);
        let kd = inst.local("Kd").unwrap();
        assert!(kd.borrow().is_varying());
        assert_eq!(*kd.borrow().floats().unwrap().at(3), 0.25);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut inst = instance(PARAM_SHADER);
        let mut grid = TestGrid::new(1, 1);
        let mut ctx = ShadingContext::new();
        inst.run_defaults(&mut grid, &mut ctx).unwrap();

        let copy = inst.clone_instance();
        assert_ne!(copy.instance_id(), inst.instance_id());
        assert!(Arc::ptr_eq(copy.program(), inst.program()));

        let kd = inst.local("Kd").unwrap();
        kd.borrow_mut().floats_mut().unwrap().set_at(0, 0.1);
        let copy_kd = copy.local("Kd").unwrap();
        assert_eq!(*copy_kd.borrow().floats().unwrap().at(0), 0.8);
    }

    #[test]
    fn test_uses_reporting() {
        let inst = instance(
            "surface\nAQSIS_V 1.2.0\nsegment Code\npushv N\ndrop\n",
        );
        assert!(inst.uses(StandardVar::N));
        assert!(!inst.uses(StandardVar::Alpha));
    }
}
