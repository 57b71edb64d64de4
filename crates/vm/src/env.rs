//! Execution environment.
//!
//! The VM does not own geometry, lights, or textures. Everything it needs
//! from the renderer at run time comes through [`ShadingEnv`]: the
//! standard global variables at grid resolution, texture and shadow
//! lookups, coordinate-space transforms, renderer option queries, the
//! illumination/gather iteration primitives, and the cancelled flag.
//!
//! [`TestGrid`] is a concrete environment used by the unit tests and the
//! CLI runner: a rectangular grid with explicit storage for every
//! standard variable, named coordinate spaces, constant-color textures,
//! and point lights.

use crate::value::{value_ref, ShadingValue, ValueRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use umbra_foundation::rng::RandomStream;
use umbra_foundation::{Mat4, StorageClass, V3, VarType};

/// The standard global variables a shader may reference.
///
/// The discriminant order is the bit assignment of the `USES` bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StandardVar {
    P,
    Ng,
    N,
    I,
    E,
    L,
    Cl,
    Ol,
    Cs,
    Os,
    Ci,
    Oi,
    S,
    T,
    U,
    V,
    Du,
    Dv,
    DPdu,
    DPdv,
    Ncomps,
    Time,
    Alpha,
}

impl StandardVar {
    pub const ALL: [StandardVar; 23] = [
        StandardVar::P,
        StandardVar::Ng,
        StandardVar::N,
        StandardVar::I,
        StandardVar::E,
        StandardVar::L,
        StandardVar::Cl,
        StandardVar::Ol,
        StandardVar::Cs,
        StandardVar::Os,
        StandardVar::Ci,
        StandardVar::Oi,
        StandardVar::S,
        StandardVar::T,
        StandardVar::U,
        StandardVar::V,
        StandardVar::Du,
        StandardVar::Dv,
        StandardVar::DPdu,
        StandardVar::DPdv,
        StandardVar::Ncomps,
        StandardVar::Time,
        StandardVar::Alpha,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let var = match name {
            "P" => StandardVar::P,
            "Ng" => StandardVar::Ng,
            "N" => StandardVar::N,
            "I" => StandardVar::I,
            "E" => StandardVar::E,
            "L" => StandardVar::L,
            "Cl" => StandardVar::Cl,
            "Ol" => StandardVar::Ol,
            "Cs" => StandardVar::Cs,
            "Os" => StandardVar::Os,
            "Ci" => StandardVar::Ci,
            "Oi" => StandardVar::Oi,
            "s" => StandardVar::S,
            "t" => StandardVar::T,
            "u" => StandardVar::U,
            "v" => StandardVar::V,
            "du" => StandardVar::Du,
            "dv" => StandardVar::Dv,
            "dPdu" => StandardVar::DPdu,
            "dPdv" => StandardVar::DPdv,
            "ncomps" => StandardVar::Ncomps,
            "time" => StandardVar::Time,
            "alpha" => StandardVar::Alpha,
            _ => return None,
        };
        Some(var)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StandardVar::P => "P",
            StandardVar::Ng => "Ng",
            StandardVar::N => "N",
            StandardVar::I => "I",
            StandardVar::E => "E",
            StandardVar::L => "L",
            StandardVar::Cl => "Cl",
            StandardVar::Ol => "Ol",
            StandardVar::Cs => "Cs",
            StandardVar::Os => "Os",
            StandardVar::Ci => "Ci",
            StandardVar::Oi => "Oi",
            StandardVar::S => "s",
            StandardVar::T => "t",
            StandardVar::U => "u",
            StandardVar::V => "v",
            StandardVar::Du => "du",
            StandardVar::Dv => "dv",
            StandardVar::DPdu => "dPdu",
            StandardVar::DPdv => "dPdv",
            StandardVar::Ncomps => "ncomps",
            StandardVar::Time => "time",
            StandardVar::Alpha => "alpha",
        }
    }

    fn index(&self) -> u32 {
        Self::ALL.iter().position(|v| v == self).unwrap_or(0) as u32
    }

    /// Bit in the `USES` bitmask.
    pub fn bit(&self) -> u64 {
        1u64 << self.index()
    }

    /// Declared value kind of this global.
    pub fn vtype(&self) -> VarType {
        match self {
            StandardVar::P | StandardVar::E | StandardVar::DPdu | StandardVar::DPdv => {
                VarType::Point
            }
            StandardVar::Ng | StandardVar::N => VarType::Normal,
            StandardVar::I | StandardVar::L => VarType::Vector,
            StandardVar::Cl
            | StandardVar::Ol
            | StandardVar::Cs
            | StandardVar::Os
            | StandardVar::Ci
            | StandardVar::Oi => VarType::Color,
            _ => VarType::Float,
        }
    }

    /// Declared cardinality of this global.
    pub fn class(&self) -> StorageClass {
        match self {
            StandardVar::E
            | StandardVar::Du
            | StandardVar::Dv
            | StandardVar::Ncomps
            | StandardVar::Time
            | StandardVar::Alpha => StorageClass::Uniform,
            _ => StorageClass::Varying,
        }
    }
}

/// Renderer-supplied execution environment for one grid.
pub trait ShadingEnv {
    /// Grid width in points (one row of the dicing rectangle).
    fn grid_width(&self) -> usize;

    /// Grid height in points.
    fn grid_height(&self) -> usize;

    /// Total shading points; always `width * height`.
    fn point_count(&self) -> usize {
        self.grid_width() * self.grid_height()
    }

    /// Handle to a standard variable's storage at grid resolution.
    fn standard(&self, var: StandardVar) -> Option<ValueRef>;

    /// Cancelled flag: expensive opcodes consult this before doing work.
    fn is_running(&self) -> bool {
        true
    }

    /// Matrix converting `from` space to `to` space. Space names include
    /// "current", "world", "shader", "object", and renderer-defined ones.
    fn space_matrix(&self, from: &str, to: &str) -> Option<Mat4>;

    /// Renderer option query.
    fn option(&self, name: &str) -> Option<f32>;

    /// Attribute-state query.
    fn attribute(&self, name: &str) -> Option<f32>;

    /// Filtered texture lookup at (s, t).
    fn texture(&self, name: &str, s: f32, t: f32) -> Option<V3>;

    /// Environment-map lookup along a direction.
    fn environment(&self, name: &str, dir: V3) -> Option<V3>;

    /// Shadow-map occlusion lookup at a point, in [0, 1].
    fn shadow(&self, name: &str, p: V3) -> Option<f32>;

    /// Metadata query against a texture file.
    fn texture_info(&self, name: &str, field: &str) -> Option<f32>;

    /// Sink for `printf` output.
    fn message(&self, text: &str);

    /// Next value of the deterministic random sequence.
    fn random(&mut self) -> f32;

    /// Ambient (non-directional) light arriving everywhere.
    fn ambient_light(&self) -> V3 {
        V3::ZERO
    }

    /// Build/validate the light cache for the bound grid and position the
    /// iterator on the first light. Returns the number of contributing
    /// lights (possibly filtered by `category`).
    fn init_illuminance(&mut self, category: Option<&str>) -> usize;

    /// Advance to the next light. True while positioned on a valid light.
    fn advance_illuminance(&mut self) -> bool;

    /// Current light's contribution at a surface point: the direction
    /// from the point toward the light and the light color.
    fn light_contribution(&self, point_index: usize, p: V3) -> Option<(V3, V3)>;

    /// Prepare a ray-sample loop of `samples` iterations; returns the
    /// iteration count and positions on the first sample.
    fn init_gather(&mut self, samples: usize) -> usize;

    /// Advance to the next gather sample. True while one remains.
    fn advance_gather(&mut self) -> bool;
}

/// A point light in a [`TestGrid`].
#[derive(Debug, Clone)]
pub struct TestLight {
    pub position: V3,
    pub color: V3,
}

/// Concrete environment backing unit tests and the CLI runner.
pub struct TestGrid {
    width: usize,
    height: usize,
    vars: IndexMap<StandardVar, ValueRef>,
    spaces: IndexMap<String, Mat4>,
    options: IndexMap<String, f32>,
    attributes: IndexMap<String, f32>,
    textures: IndexMap<String, V3>,
    pub lights: Vec<TestLight>,
    pub ambient: V3,
    light_cursor: usize,
    light_count: usize,
    gather_cursor: usize,
    gather_count: usize,
    random: RandomStream,
    running: bool,
}

impl TestGrid {
    /// A grid with every standard variable allocated at its declared
    /// type and cardinality. Surface color and opacity default to white.
    pub fn new(width: usize, height: usize) -> Self {
        let npoints = (width * height).max(1);
        let mut vars = IndexMap::new();
        for var in StandardVar::ALL {
            let mut value = ShadingValue::new(var.vtype(), var.class(), npoints);
            match var {
                StandardVar::Cs | StandardVar::Os => {
                    let d = value.triples_mut().expect("color storage");
                    for i in 0..d.len() {
                        d.set_at(i, V3::ONE);
                    }
                }
                StandardVar::Ncomps => {
                    value.floats_mut().expect("float storage").set_at(0, 3.0);
                }
                StandardVar::Alpha => {
                    value.floats_mut().expect("float storage").set_at(0, 1.0);
                }
                _ => {}
            }
            vars.insert(var, value_ref(value));
        }
        Self {
            width,
            height,
            vars,
            spaces: IndexMap::new(),
            options: IndexMap::new(),
            attributes: IndexMap::new(),
            textures: IndexMap::new(),
            lights: Vec::new(),
            ambient: V3::ZERO,
            light_cursor: 0,
            light_count: 0,
            gather_cursor: 0,
            gather_count: 0,
            random: RandomStream::from_label("testgrid"),
            running: true,
        }
    }

    /// Fill a triple-valued variable with the same value at every point.
    pub fn fill_triple(&mut self, var: StandardVar, v: V3) {
        if let Some(handle) = self.vars.get(&var) {
            let mut value = handle.borrow_mut();
            if let Ok(d) = value.triples_mut() {
                for i in 0..d.len() {
                    d.set_at(i, v);
                }
            }
        }
    }

    /// Set a triple-valued variable at one point.
    pub fn set_triple(&mut self, var: StandardVar, i: usize, v: V3) {
        if let Some(handle) = self.vars.get(&var) {
            let mut value = handle.borrow_mut();
            if let Ok(d) = value.triples_mut() {
                d.set_at(i, v);
            }
        }
    }

    /// Set a float-valued variable at one point.
    pub fn set_float(&mut self, var: StandardVar, i: usize, v: f32) {
        if let Some(handle) = self.vars.get(&var) {
            let mut value = handle.borrow_mut();
            if let Ok(d) = value.floats_mut() {
                d.set_at(i, v);
            }
        }
    }

    /// Fill a float-valued variable.
    pub fn fill_float(&mut self, var: StandardVar, v: f32) {
        if let Some(handle) = self.vars.get(&var) {
            let mut value = handle.borrow_mut();
            if let Ok(d) = value.floats_mut() {
                for i in 0..d.len() {
                    d.set_at(i, v);
                }
            }
        }
    }

    /// Read back a triple at one point.
    pub fn triple_at(&self, var: StandardVar, i: usize) -> Option<V3> {
        let handle = self.vars.get(&var)?;
        let value = handle.borrow();
        value.triples().ok().map(|d| *d.at(i))
    }

    /// Read back a float at one point.
    pub fn float_at(&self, var: StandardVar, i: usize) -> Option<f32> {
        let handle = self.vars.get(&var)?;
        let value = handle.borrow();
        value.floats().ok().map(|d| *d.at(i))
    }

    /// Register a named coordinate space by its to-current matrix.
    pub fn define_space(&mut self, name: impl Into<String>, to_current: Mat4) {
        self.spaces.insert(name.into(), to_current);
    }

    pub fn set_option(&mut self, name: impl Into<String>, v: f32) {
        self.options.insert(name.into(), v);
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, v: f32) {
        self.attributes.insert(name.into(), v);
    }

    /// Register a constant-color stand-in texture.
    pub fn define_texture(&mut self, name: impl Into<String>, color: V3) {
        self.textures.insert(name.into(), color);
    }

    pub fn add_point_light(&mut self, position: V3, color: V3) {
        self.lights.push(TestLight { position, color });
    }

    pub fn cancel(&mut self) {
        self.running = false;
    }

    fn to_current(&self, space: &str) -> Option<Mat4> {
        match space {
            "" | "current" => Some(Mat4::IDENTITY),
            name => self.spaces.get(name).copied(),
        }
    }
}

impl ShadingEnv for TestGrid {
    fn grid_width(&self) -> usize {
        self.width
    }

    fn grid_height(&self) -> usize {
        self.height
    }

    fn standard(&self, var: StandardVar) -> Option<ValueRef> {
        self.vars.get(&var).cloned()
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn space_matrix(&self, from: &str, to: &str) -> Option<Mat4> {
        let from_current = self.to_current(from)?;
        let to_current = self.to_current(to)?;
        let current_to = to_current.inverted()?;
        Some(current_to.mul(&from_current))
    }

    fn option(&self, name: &str) -> Option<f32> {
        self.options.get(name).copied()
    }

    fn attribute(&self, name: &str) -> Option<f32> {
        self.attributes.get(name).copied()
    }

    fn texture(&self, name: &str, _s: f32, _t: f32) -> Option<V3> {
        self.textures.get(name).copied()
    }

    fn environment(&self, name: &str, _dir: V3) -> Option<V3> {
        self.textures.get(name).copied()
    }

    fn shadow(&self, name: &str, _p: V3) -> Option<f32> {
        // Registered shadow maps fully occlude; unknown maps do not.
        if self.textures.contains_key(name) {
            Some(1.0)
        } else {
            None
        }
    }

    fn texture_info(&self, name: &str, field: &str) -> Option<f32> {
        match (self.textures.contains_key(name), field) {
            (true, "resolution") => Some(1.0),
            (true, "channels") => Some(3.0),
            _ => None,
        }
    }

    fn message(&self, text: &str) {
        tracing::info!(target: "shader", "{text}");
    }

    fn random(&mut self) -> f32 {
        self.random.uniform()
    }

    fn ambient_light(&self) -> V3 {
        self.ambient
    }

    fn init_illuminance(&mut self, _category: Option<&str>) -> usize {
        self.light_cursor = 0;
        self.light_count = self.lights.len();
        self.light_count
    }

    fn advance_illuminance(&mut self) -> bool {
        self.light_cursor += 1;
        self.light_cursor < self.light_count
    }

    fn light_contribution(&self, _point_index: usize, p: V3) -> Option<(V3, V3)> {
        let light = self.lights.get(self.light_cursor)?;
        Some((light.position - p, light.color))
    }

    fn init_gather(&mut self, samples: usize) -> usize {
        self.gather_cursor = 0;
        self.gather_count = samples;
        samples
    }

    fn advance_gather(&mut self) -> bool {
        self.gather_cursor += 1;
        self.gather_cursor < self.gather_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_var_names_round_trip() {
        for var in StandardVar::ALL {
            assert_eq!(StandardVar::from_name(var.name()), Some(var));
        }
        assert_eq!(StandardVar::from_name("Q"), None);
    }

    #[test]
    fn test_uses_bits_distinct() {
        let mut seen = 0u64;
        for var in StandardVar::ALL {
            assert_eq!(seen & var.bit(), 0);
            seen |= var.bit();
        }
    }

    #[test]
    fn test_grid_allocates_declared_shapes() {
        let grid = TestGrid::new(4, 2);
        let p = grid.standard(StandardVar::P).unwrap();
        assert_eq!(p.borrow().size(), 8);
        assert!(p.borrow().is_varying());
        let time = grid.standard(StandardVar::Time).unwrap();
        assert_eq!(time.borrow().size(), 1);
    }

    #[test]
    fn test_default_surface_color_is_white() {
        let grid = TestGrid::new(2, 2);
        assert_eq!(grid.triple_at(StandardVar::Cs, 3), Some(V3::ONE));
        assert_eq!(grid.float_at(StandardVar::Ncomps, 0), Some(3.0));
    }

    #[test]
    fn test_space_matrix_round_trip() {
        let mut grid = TestGrid::new(1, 1);
        grid.define_space("shader", Mat4::translation(V3::new(1.0, 2.0, 3.0)));
        // shader -> current moves by the translation.
        let m = grid.space_matrix("shader", "current").unwrap();
        assert_eq!(m.transform_point(V3::ZERO), V3::new(1.0, 2.0, 3.0));
        // current -> shader is the inverse.
        let back = grid.space_matrix("current", "shader").unwrap();
        assert_eq!(back.transform_point(V3::new(1.0, 2.0, 3.0)), V3::ZERO);
    }

    #[test]
    fn test_light_iteration_protocol() {
        let mut grid = TestGrid::new(1, 1);
        grid.add_point_light(V3::new(0.0, 0.0, 5.0), V3::ONE);
        grid.add_point_light(V3::new(5.0, 0.0, 0.0), V3::new(0.5, 0.5, 0.5));

        let count = grid.init_illuminance(None);
        assert_eq!(count, 2);
        let mut visited = 0;
        let mut more = count > 0;
        while more {
            assert!(grid.light_contribution(0, V3::ZERO).is_some());
            visited += 1;
            more = grid.advance_illuminance();
        }
        assert_eq!(visited, 2);
    }
}
