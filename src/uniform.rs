//! Uniform buffer layouts and the handles used to write into them.
//!
//! Every shader gets exactly one uniform struct at `@group(0) @binding(0)`. Its
//! members are declared in Rust as a [`UniformBufferDescription`], compiled to
//! std140-style offsets, and emitted as WGSL with explicit `@align`/`@size`
//! attributes so both sides agree byte for byte.
//!
//! Looking a name up in a compiled layout yields a [`Uniform`]. A uniform whose
//! name was not declared is *invalid*: writing through it does nothing. That lets
//! shaders drop a feature without every call site having to know.

use glam::{Mat4, Vec2, Vec3, Vec4};
use std::fmt::Write;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Bool,
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    /// Bytes used for alignment, and for the element size when `aligned` is false.
    fn size(self, array_count: u32, aligned: bool) -> u32 {
        const N: u32 = 4;
        if array_count > 1 {
            return match self {
                UniformType::Mat4 if !aligned => N * 16,
                _ => N * 4,
            };
        }
        match self {
            UniformType::Bool | UniformType::Int | UniformType::Float => N,
            UniformType::Vec2 => N * 2,
            UniformType::Vec3 | UniformType::Vec4 => N * 4,
            UniformType::Mat4 => N * 4 * if aligned { 1 } else { 4 },
        }
    }

    fn wgsl(self, array_count: u32) -> String {
        if array_count > 1 {
            let element = match self {
                UniformType::Bool => "vec4<u32>",
                UniformType::Int => "vec4<i32>",
                UniformType::Mat4 => "mat4x4<f32>",
                _ => "vec4<f32>",
            };
            return format!("array<{element}, {array_count}>");
        }
        match self {
            UniformType::Bool => "u32",
            UniformType::Int => "i32",
            UniformType::Float => "f32",
            UniformType::Vec2 => "vec2<f32>",
            UniformType::Vec3 => "vec3<f32>",
            UniformType::Vec4 => "vec4<f32>",
            UniformType::Mat4 => "mat4x4<f32>",
        }
        .to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformDecl {
    pub ty: UniformType,
    pub name: String,
    pub array_count: u32,
}

/// Ordered member list of a uniform struct.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformBufferDescription {
    members: Vec<UniformDecl>,
}

impl UniformBufferDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, ty: UniformType, name: impl Into<String>) -> Self {
        self.with_array(ty, name, 1)
    }

    /// Adds an array member. Scalar and vector arrays are padded to a vec4 stride.
    pub fn with_array(mut self, ty: UniformType, name: impl Into<String>, count: u32) -> Self {
        assert!(count >= 1, "uniform arrays need at least one element");
        self.members.push(UniformDecl {
            ty,
            name: name.into(),
            array_count: count,
        });
        self
    }

    pub fn members(&self) -> &[UniformDecl] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Emits the WGSL struct declaration for this description.
    pub fn to_wgsl(&self, struct_name: &str) -> String {
        let compiled = compile_uniform_buffer(self);
        let mut src = format!("struct {struct_name} {{\n");
        for m in &self.members {
            let Some(prop) = compiled.find(&m.name) else {
                continue;
            };
            let _ = writeln!(
                src,
                "    @align({}) @size({}) {}: {},",
                m.ty.size(m.array_count, true),
                prop.byte_len(),
                m.name,
                m.ty.wgsl(m.array_count)
            );
        }
        src.push_str("}\n");
        src
    }
}

/// Where one member lives inside the uniform block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompiledUniformProp {
    pub offset: u32,
    pub ty: UniformType,
    pub array_count: u32,
}

impl CompiledUniformProp {
    /// Distance between consecutive array elements.
    pub fn stride(&self) -> u32 {
        self.ty.size(self.array_count, false)
    }

    pub fn byte_len(&self) -> u32 {
        self.stride() * self.array_count
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledUniformBuffer {
    props: Vec<(String, CompiledUniformProp)>,
    total_size: u32,
}

impl CompiledUniformBuffer {
    pub fn find(&self, name: &str) -> Option<CompiledUniformProp> {
        self.props
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, prop)| *prop)
    }

    /// Sum of member sizes including padding between members.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Size to allocate on the GPU, a multiple of 16 and never zero.
    pub fn buffer_size(&self) -> u32 {
        self.total_size.max(16).next_multiple_of(16)
    }
}

fn alignment_padding(current_size: u32, ty: UniformType, array_count: u32) -> u32 {
    let size = ty.size(array_count, true);
    match current_size % size {
        0 => 0,
        rem => size - rem,
    }
}

pub fn compile_uniform_buffer(desc: &UniformBufferDescription) -> CompiledUniformBuffer {
    let mut compiled = CompiledUniformBuffer::default();
    for m in &desc.members {
        compiled.total_size += alignment_padding(compiled.total_size, m.ty, m.array_count);
        let prop = CompiledUniformProp {
            offset: compiled.total_size,
            ty: m.ty,
            array_count: m.array_count,
        };
        compiled.total_size += prop.byte_len();
        compiled.props.push((m.name.clone(), prop));
    }
    compiled
}

/// A value to write into a uniform member.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Bool(_) => UniformType::Bool,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        let mut put = |bytes: &[u8]| out[..bytes.len()].copy_from_slice(bytes);
        match self {
            UniformValue::Bool(b) => put(bytemuck::bytes_of(&u32::from(*b))),
            UniformValue::Int(i) => put(bytemuck::bytes_of(i)),
            UniformValue::Float(f) => put(bytemuck::bytes_of(f)),
            UniformValue::Vec2(v) => put(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => put(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => put(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat4(m) => put(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }
}

/// Handle to a uniform member, resolved once when the shader loads.
#[derive(Clone, Debug, PartialEq)]
pub struct Uniform {
    name: String,
    prop: Option<CompiledUniformProp>,
}

impl Uniform {
    pub(crate) fn new(name: &str, prop: Option<CompiledUniformProp>) -> Self {
        Self {
            name: name.to_string(),
            prop,
        }
    }

    /// A handle that never writes anything.
    pub fn invalid(name: &str) -> Self {
        Self::new(name, None)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self) -> bool {
        self.prop.is_some()
    }

    pub fn prop(&self) -> Option<CompiledUniformProp> {
        self.prop
    }
}

/// CPU copy of one shader's uniform struct.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformBlock {
    bytes: Vec<u8>,
}

impl UniformBlock {
    pub fn new(layout: &CompiledUniformBuffer) -> Self {
        Self::with_size(layout.buffer_size())
    }

    pub(crate) fn with_size(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    /// Writes `value` into element `index` of `prop`.
    pub fn write(&mut self, prop: CompiledUniformProp, index: u32, value: &UniformValue) {
        debug_assert_eq!(prop.ty, value.ty(), "uniform type mismatch");
        debug_assert!(index < prop.array_count, "uniform array index out of range");
        let start = (prop.offset + prop.stride() * index) as usize;
        let end = start + prop.stride() as usize;
        if let Some(slot) = self.bytes.get_mut(start..end) {
            value.write_to(slot);
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_of(compiled: &CompiledUniformBuffer, name: &str) -> Option<u32> {
        compiled.find(name).map(|p| p.offset)
    }

    #[test]
    fn mixed_members_are_aligned() {
        let compiled = compile_uniform_buffer(
            &UniformBufferDescription::new()
                .with(UniformType::Float, "value")
                .with(UniformType::Vec3, "vector")
                .with(UniformType::Mat4, "matrix")
                .with_array(UniformType::Float, "values", 3)
                .with(UniformType::Bool, "boolean")
                .with(UniformType::Int, "integer"),
        );

        assert_eq!(offset_of(&compiled, "value"), Some(0));
        assert_eq!(offset_of(&compiled, "vector"), Some(16));
        assert_eq!(offset_of(&compiled, "matrix"), Some(32));
        assert_eq!(offset_of(&compiled, "values"), Some(96));
        assert_eq!(offset_of(&compiled, "boolean"), Some(144));
        assert_eq!(offset_of(&compiled, "integer"), Some(148));
        assert_eq!(compiled.total_size(), 152);
        assert_eq!(compiled.buffer_size(), 160);
        assert_eq!(offset_of(&compiled, "missing"), None);
    }

    #[test]
    fn matrices_pack_back_to_back() {
        let desc = UniformBufferDescription::new()
            .with(UniformType::Mat4, "projection")
            .with(UniformType::Mat4, "view");
        let compiled = compile_uniform_buffer(&desc);

        assert_eq!(offset_of(&compiled, "projection"), Some(0));
        assert_eq!(offset_of(&compiled, "view"), Some(64));
        assert_eq!(compiled.total_size(), 128);
        assert_eq!(
            desc.to_wgsl("D"),
            "struct D {\n    @align(16) @size(64) projection: mat4x4<f32>,\n    @align(16) @size(64) view: mat4x4<f32>,\n}\n"
        );
    }

    #[test]
    fn arrays_use_vec4_elements_in_wgsl() {
        let desc = UniformBufferDescription::new()
            .with(UniformType::Float, "factor")
            .with_array(UniformType::Vec3, "light_directions", 2);
        let src = desc.to_wgsl("U");
        assert!(src.contains("@align(4) @size(4) factor: f32,"));
        assert!(src.contains("@align(16) @size(32) light_directions: array<vec4<f32>, 2>,"));
    }

    #[test]
    fn block_writes_array_elements_at_stride() {
        let desc = UniformBufferDescription::new()
            .with(UniformType::Float, "factor")
            .with_array(UniformType::Vec4, "colors", 2);
        let compiled = compile_uniform_buffer(&desc);
        let mut block = UniformBlock::new(&compiled);

        let colors = compiled.find("colors").unwrap();
        block.write(colors, 1, &UniformValue::Vec4(Vec4::new(1.0, 2.0, 3.0, 4.0)));

        let floats: &[f32] = bytemuck::cast_slice(block.bytes());
        assert_eq!(&floats[8..12], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&floats[4..8], &[0.0; 4]);
    }

    #[test]
    fn vec3_writes_twelve_bytes() {
        let desc = UniformBufferDescription::new()
            .with(UniformType::Vec3, "a")
            .with(UniformType::Float, "b");
        let compiled = compile_uniform_buffer(&desc);
        let mut block = UniformBlock::new(&compiled);
        block.write(compiled.find("b").unwrap(), 0, &UniformValue::Float(7.0));
        block.write(compiled.find("a").unwrap(), 0, &UniformValue::Vec3(Vec3::ONE));

        let floats: &[f32] = bytemuck::cast_slice(block.bytes());
        assert_eq!(&floats[..5], &[1.0, 1.0, 1.0, 0.0, 7.0]);
    }

    #[test]
    fn invalid_uniform_has_no_prop() {
        let u = Uniform::invalid("u_time");
        assert!(!u.is_valid());
        assert_eq!(u.name(), "u_time");
    }
}
