//! Vertex attribute slot assignment shared across shader variants.
//!
//! Several shader programs (lit, unlit, transparent, instanced, depth-only) read the
//! same uploaded vertex buffer. For that to work every program must agree on which
//! `@location` each semantic attribute lives at, and the geometry extractor must know
//! which attributes to interleave into the buffer. This module is the single source
//! of truth for both sides:
//!
//! 1. [`compile_registry`] walks a base layout plus every shader's
//!    [`AttributeRequestSet`] and hands out stable slots.
//! 2. [`compile_shader_layout`] resolves one shader's request set against the registry.
//! 3. [`compile_geometry_layout`] lists every registered attribute in slot order,
//!    which is the interleaving order used by [`crate::geometry::extract`].
//!
//! # Example
//!
//! ```
//! use tessera::*;
//!
//! let lit = AttributeRequestSet::from([
//!     (AttributeKind::Position3, "position"),
//!     (AttributeKind::Normal3, "normal"),
//! ]);
//! let depth = AttributeRequestSet::from([(AttributeKind::Position3, "position")]);
//!
//! let registry = compile_registry(&[], [&lit, &depth]);
//! let depth_layout = compile_shader_layout(&registry, &depth, None);
//!
//! // the depth shader shares slot 0 with the lit shader
//! assert_eq!(depth_layout.attributes()[0].slot, 0);
//! assert_eq!(compile_geometry_layout(&registry).stride(), 24);
//! ```

use std::fmt::Write;

/// A semantic category of per-vertex (or per-instance) data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// 2D position taken from the x and y components.
    Position2xy,
    /// 2D position taken from the x and z components.
    Position2xz,
    Position3,
    Normal3,
    Color3,
    /// RGB color with alpha fixed at 1.0 during extraction.
    Color4,
    Texture2,
    /// A 4x4 world transform, only valid as a per-instance attribute.
    InstanceTransform,
}

impl AttributeKind {
    /// Number of f32 components this attribute occupies in a buffer.
    pub const fn float_count(self) -> usize {
        match self {
            AttributeKind::Position2xy | AttributeKind::Position2xz | AttributeKind::Texture2 => 2,
            AttributeKind::Position3 | AttributeKind::Normal3 | AttributeKind::Color3 => 3,
            AttributeKind::Color4 => 4,
            AttributeKind::InstanceTransform => 16,
        }
    }

    /// Size in bytes of one element.
    pub const fn byte_size(self) -> u64 {
        (self.float_count() * std::mem::size_of::<f32>()) as u64
    }

    /// Number of consecutive shader locations the attribute needs.
    ///
    /// wgpu caps a single vertex attribute at four components, so a matrix is
    /// split into one location per column.
    pub const fn location_count(self) -> u32 {
        match self {
            AttributeKind::InstanceTransform => 4,
            _ => 1,
        }
    }

    pub const fn is_instance_based(self) -> bool {
        matches!(self, AttributeKind::InstanceTransform)
    }

    const fn wgsl_type(self) -> &'static str {
        match self {
            AttributeKind::Position2xy | AttributeKind::Position2xz | AttributeKind::Texture2 => {
                "vec2<f32>"
            }
            AttributeKind::Position3 | AttributeKind::Normal3 | AttributeKind::Color3 => {
                "vec3<f32>"
            }
            AttributeKind::Color4 | AttributeKind::InstanceTransform => "vec4<f32>",
        }
    }

    const fn vertex_format(self) -> wgpu::VertexFormat {
        match self {
            AttributeKind::Position2xy | AttributeKind::Position2xz | AttributeKind::Texture2 => {
                wgpu::VertexFormat::Float32x2
            }
            AttributeKind::Position3 | AttributeKind::Normal3 | AttributeKind::Color3 => {
                wgpu::VertexFormat::Float32x3
            }
            AttributeKind::Color4 | AttributeKind::InstanceTransform => {
                wgpu::VertexFormat::Float32x4
            }
        }
    }
}

/// One attribute a shader asks for, together with the name it is bound to in WGSL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeRequest {
    pub kind: AttributeKind,
    pub name: String,
}

/// The ordered attribute list one shader declares it needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeRequestSet {
    requests: Vec<AttributeRequest>,
}

impl AttributeRequestSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: AttributeKind, name: impl Into<String>) -> Self {
        self.requests.push(AttributeRequest {
            kind,
            name: name.into(),
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRequest> {
        self.requests.iter()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl<const N: usize> From<[(AttributeKind, &str); N]> for AttributeRequestSet {
    fn from(requests: [(AttributeKind, &str); N]) -> Self {
        requests
            .into_iter()
            .fold(Self::new(), |set, (kind, name)| set.with(kind, name))
    }
}

/// Slot assignment for one compilation group.
///
/// Built once by [`compile_registry`]; a kind never changes slot afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeRegistry {
    /// In assignment order, which is also ascending slot order.
    slots: Vec<(AttributeKind, u32)>,
    next_slot: u32,
}

impl AttributeRegistry {
    pub fn slot(&self, kind: AttributeKind) -> Option<u32> {
        self.slots
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, slot)| *slot)
    }

    /// First location after every registered attribute.
    pub fn next_slot(&self) -> u32 {
        self.next_slot
    }

    pub fn kinds(&self) -> impl Iterator<Item = AttributeKind> + '_ {
        self.slots.iter().map(|(kind, _)| *kind)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn assign(&mut self, kind: AttributeKind) {
        assert!(
            !kind.is_instance_based(),
            "{kind:?} is per-instance data, declare it with an InstanceAttribute"
        );
        if self.slot(kind).is_none() {
            self.slots.push((kind, self.next_slot));
            self.next_slot += 1;
        }
    }
}

/// Assigns slots for a compilation group.
///
/// Kinds from `base_layout` get the lowest slots in the order given. Every other
/// kind gets the next free slot the first time a request set mentions it.
///
/// # Panics
///
/// Panics if a per-instance kind shows up in the base layout or a request set.
pub fn compile_registry<'a>(
    base_layout: &[AttributeKind],
    request_sets: impl IntoIterator<Item = &'a AttributeRequestSet>,
) -> AttributeRegistry {
    let mut registry = AttributeRegistry {
        slots: Vec::new(),
        next_slot: 0,
    };

    for kind in base_layout {
        registry.assign(*kind);
    }

    for set in request_sets {
        for request in set.iter() {
            registry.assign(request.kind);
        }
    }

    registry
}

/// Describes the per-instance attribute of an instanced shader variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceAttribute {
    pub kind: AttributeKind,
    pub name: String,
}

impl InstanceAttribute {
    pub fn transform(name: impl Into<String>) -> Self {
        Self {
            kind: AttributeKind::InstanceTransform,
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledAttribute {
    pub kind: AttributeKind,
    pub name: String,
    pub slot: u32,
}

/// One shader's attributes with their registry slots, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledShaderLayout {
    attributes: Vec<CompiledAttribute>,
    instance: Option<CompiledAttribute>,
}

impl CompiledShaderLayout {
    /// Per-vertex attributes in the order the shader declared them.
    pub fn attributes(&self) -> &[CompiledAttribute] {
        &self.attributes
    }

    /// The per-instance attribute, if this is an instanced variant.
    pub fn instance(&self) -> Option<&CompiledAttribute> {
        self.instance.as_ref()
    }

    /// Per-vertex attributes followed by the instance attribute.
    pub fn all(&self) -> impl Iterator<Item = &CompiledAttribute> {
        self.attributes.iter().chain(self.instance.iter())
    }

    /// Generates the `VertexInput` struct the shader body reads from.
    ///
    /// A matrix attribute is split into `{name}_c0..c3` columns and a
    /// `load_{name}` helper rebuilds it.
    pub fn wgsl_vertex_input(&self) -> String {
        let mut src = String::from("struct VertexInput {\n");
        for a in self.all() {
            if a.kind.location_count() == 1 {
                let _ = writeln!(
                    src,
                    "    @location({}) {}: {},",
                    a.slot,
                    a.name,
                    a.kind.wgsl_type()
                );
            } else {
                for column in 0..a.kind.location_count() {
                    let _ = writeln!(
                        src,
                        "    @location({}) {}_c{}: {},",
                        a.slot + column,
                        a.name,
                        column,
                        a.kind.wgsl_type()
                    );
                }
            }
        }
        src.push_str("}\n");

        for a in self.all().filter(|a| a.kind.location_count() > 1) {
            let _ = writeln!(
                src,
                "fn load_{0}(v: VertexInput) -> mat4x4<f32> {{\n    return mat4x4<f32>(v.{0}_c0, v.{0}_c1, v.{0}_c2, v.{0}_c3);\n}}",
                a.name
            );
        }
        src
    }

    /// wgpu attributes for the instance buffer, if any.
    pub fn instance_attributes(&self) -> Vec<wgpu::VertexAttribute> {
        self.instance
            .iter()
            .flat_map(|a| {
                (0..a.kind.location_count()).map(move |column| wgpu::VertexAttribute {
                    format: a.kind.vertex_format(),
                    offset: column as u64 * 16,
                    shader_location: a.slot + column,
                })
            })
            .collect()
    }
}

/// Resolves a shader's request set against the registry of its compilation group.
///
/// # Panics
///
/// Panics if the set requests a kind the registry never saw; that shader was
/// left out of the group when the registry was compiled.
pub fn compile_shader_layout(
    registry: &AttributeRegistry,
    request_set: &AttributeRequestSet,
    instance: Option<InstanceAttribute>,
) -> CompiledShaderLayout {
    let attributes = request_set
        .iter()
        .map(|request| {
            let Some(slot) = registry.slot(request.kind) else {
                panic!(
                    "layout wasn't added to the compilation list: {:?} ({})",
                    request.kind, request.name
                );
            };
            CompiledAttribute {
                kind: request.kind,
                name: request.name.clone(),
                slot,
            }
        })
        .collect();

    let instance = instance.map(|prop| CompiledAttribute {
        kind: prop.kind,
        name: prop.name,
        slot: registry.next_slot(),
    });

    CompiledShaderLayout {
        attributes,
        instance,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GeometryElement {
    pub kind: AttributeKind,
    pub slot: u32,
}

/// Every attribute of a compilation group in slot order: the vertex buffer layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledGeometryLayout {
    elements: Vec<GeometryElement>,
}

impl CompiledGeometryLayout {
    #[cfg(test)]
    pub(crate) fn from_elements(elements: Vec<GeometryElement>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[GeometryElement] {
        &self.elements
    }

    /// Bytes per interleaved vertex.
    pub fn stride(&self) -> u64 {
        self.elements.iter().map(|e| e.kind.byte_size()).sum()
    }

    /// Byte offset of `kind` within one vertex.
    pub fn offset_of(&self, kind: AttributeKind) -> Option<u64> {
        let mut offset = 0;
        for e in &self.elements {
            if e.kind == kind {
                return Some(offset);
            }
            offset += e.kind.byte_size();
        }
        None
    }

    /// wgpu attributes for the subset of the buffer `shader` reads.
    ///
    /// The buffer is always laid out with every element of the group; a shader
    /// that only needs a few attributes still uses the full stride.
    pub fn vertex_attributes_for(&self, shader: &CompiledShaderLayout) -> Vec<wgpu::VertexAttribute> {
        shader
            .attributes()
            .iter()
            .filter_map(|a| {
                self.offset_of(a.kind).map(|offset| wgpu::VertexAttribute {
                    format: a.kind.vertex_format(),
                    offset,
                    shader_location: a.slot,
                })
            })
            .collect()
    }
}

/// Lists every registered attribute, sorted ascending by slot.
pub fn compile_geometry_layout(registry: &AttributeRegistry) -> CompiledGeometryLayout {
    let mut elements: Vec<GeometryElement> = registry
        .slots
        .iter()
        .map(|(kind, slot)| GeometryElement {
            kind: *kind,
            slot: *slot,
        })
        .collect();
    elements.sort_by_key(|e| e.slot);
    CompiledGeometryLayout { elements }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttributeKind::*;

    fn material() -> AttributeRequestSet {
        AttributeRequestSet::from([
            (Position3, "a_position"),
            (Normal3, "a_normal"),
            (Color4, "a_color"),
            (Texture2, "a_tex_coord"),
        ])
    }

    fn slots(layout: &CompiledShaderLayout) -> Vec<(AttributeKind, u32)> {
        layout.attributes().iter().map(|a| (a.kind, a.slot)).collect()
    }

    fn geometry(layout: &CompiledGeometryLayout) -> Vec<(AttributeKind, u32)> {
        layout.elements().iter().map(|e| (e.kind, e.slot)).collect()
    }

    #[test]
    fn single_request_set_gets_slots_in_declared_order() {
        let set = material();
        let registry = compile_registry(&[], [&set]);
        let layout = compile_shader_layout(&registry, &set, None);

        assert_eq!(
            slots(&layout),
            vec![(Position3, 0), (Normal3, 1), (Color4, 2), (Texture2, 3)]
        );
        assert_eq!(layout.attributes()[0].name, "a_position");
        assert_eq!(
            geometry(&compile_geometry_layout(&registry)),
            vec![(Position3, 0), (Normal3, 1), (Color4, 2), (Texture2, 3)]
        );
    }

    #[test]
    fn base_layout_takes_the_lowest_slots() {
        let set = material();
        let registry = compile_registry(&[Color4, Texture2], [&set]);
        let layout = compile_shader_layout(&registry, &set, None);

        assert_eq!(
            slots(&layout),
            vec![(Position3, 2), (Normal3, 3), (Color4, 0), (Texture2, 1)]
        );
        assert_eq!(
            geometry(&compile_geometry_layout(&registry)),
            vec![(Color4, 0), (Texture2, 1), (Position3, 2), (Normal3, 3)]
        );
    }

    #[test]
    fn depth_shader_shares_position_slot() {
        let set = material();
        let depth = AttributeRequestSet::from([(Position3, "a_position")]);
        let registry = compile_registry(&[], [&set, &depth]);

        let depth_layout = compile_shader_layout(&registry, &depth, None);
        assert_eq!(slots(&depth_layout), vec![(Position3, 0)]);
        assert_eq!(compile_geometry_layout(&registry).elements().len(), 4);
    }

    #[test]
    fn shader_layout_keeps_request_order() {
        let set = material();
        let different = AttributeRequestSet::from([
            (Color4, "a_color"),
            (Texture2, "a_tex_coord"),
            (Position3, "a_position"),
            (Normal3, "a_normal"),
        ]);
        let registry = compile_registry(&[], [&set, &different]);
        let layout = compile_shader_layout(&registry, &different, None);

        assert_eq!(
            slots(&layout),
            vec![(Color4, 2), (Texture2, 3), (Position3, 0), (Normal3, 1)]
        );
    }

    #[test]
    fn first_seen_order_across_sets() {
        let a = AttributeRequestSet::from([(Color4, "rgb")]);
        let b = AttributeRequestSet::from([(Texture2, "uv")]);
        let registry = compile_registry(&[], [&a, &b]);

        assert_eq!(slots(&compile_shader_layout(&registry, &a, None)), vec![(Color4, 0)]);
        assert_eq!(slots(&compile_shader_layout(&registry, &b, None)), vec![(Texture2, 1)]);
        assert_eq!(
            geometry(&compile_geometry_layout(&registry)),
            vec![(Color4, 0), (Texture2, 1)]
        );
    }

    #[test]
    fn recompiling_is_idempotent() {
        let set = material();
        let depth = AttributeRequestSet::from([(Position3, "a_position")]);
        let first = compile_registry(&[Normal3], [&set, &depth]);
        let second = compile_registry(&[Normal3], [&set, &depth]);
        assert_eq!(first, second);
    }

    #[test]
    fn no_two_kinds_share_a_slot() {
        let set = material();
        let extra = AttributeRequestSet::from([(Color3, "c"), (Position2xz, "p")]);
        let registry = compile_registry(&[Texture2, Normal3], [&set, &extra]);
        let mut seen: Vec<u32> = registry.slots.iter().map(|(_, s)| *s).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), registry.len());
    }

    #[test]
    #[should_panic(expected = "layout wasn't added to the compilation list")]
    fn requesting_an_unregistered_kind_is_fatal() {
        let position = AttributeRequestSet::from([(Position3, "pos")]);
        let registry = compile_registry(&[], [&position]);
        let not_requested = AttributeRequestSet::from([(Normal3, "not_requested")]);
        compile_shader_layout(&registry, &not_requested, None);
    }

    #[test]
    fn base_layout_fills_slots_in_order() {
        let position = AttributeRequestSet::from([(Position3, "pos")]);
        let registry = compile_registry(&[Color3, Position3, Normal3], [&position]);
        assert_eq!(
            geometry(&compile_geometry_layout(&registry)),
            vec![(Color3, 0), (Position3, 1), (Normal3, 2)]
        );
        assert_eq!(registry.next_slot(), 3);
    }

    #[test]
    #[should_panic(expected = "declare it with an InstanceAttribute")]
    fn instance_transform_in_base_layout_is_fatal() {
        let position = AttributeRequestSet::from([(Position3, "pos")]);
        compile_registry(&[InstanceTransform, Position3, Normal3], [&position]);
    }

    #[test]
    #[should_panic(expected = "declare it with an InstanceAttribute")]
    fn instance_transform_in_request_set_is_fatal() {
        let set = AttributeRequestSet::from([(Position3, "pos"), (InstanceTransform, "model")]);
        compile_registry(&[], [&set]);
    }

    #[test]
    fn instance_attribute_goes_after_registry() {
        let set = material();
        let registry = compile_registry(&[], [&set]);
        let layout = compile_shader_layout(
            &registry,
            &set,
            Some(InstanceAttribute::transform("a_world_from_local")),
        );

        let instance = layout.instance().unwrap();
        assert_eq!(instance.slot, 4);
        let attributes = layout.instance_attributes();
        assert_eq!(attributes.len(), 4);
        assert_eq!(attributes[3].shader_location, 7);
        assert_eq!(attributes[3].offset, 48);
    }

    #[test]
    fn wgsl_input_lists_every_location() {
        let set = AttributeRequestSet::from([(Position3, "position"), (Texture2, "uv")]);
        let registry = compile_registry(&[], [&set]);
        let layout =
            compile_shader_layout(&registry, &set, Some(InstanceAttribute::transform("model")));
        let src = layout.wgsl_vertex_input();

        assert!(src.contains("@location(0) position: vec3<f32>,"));
        assert!(src.contains("@location(1) uv: vec2<f32>,"));
        assert!(src.contains("@location(5) model_c3: vec4<f32>,"));
        assert!(src.contains("fn load_model(v: VertexInput) -> mat4x4<f32>"));
    }

    #[test]
    fn subset_shader_reads_with_geometry_offsets() {
        let set = material();
        let uv_only = AttributeRequestSet::from([(Texture2, "uv")]);
        let registry = compile_registry(&[], [&set, &uv_only]);
        let geometry = compile_geometry_layout(&registry);
        let layout = compile_shader_layout(&registry, &uv_only, None);

        let attributes = geometry.vertex_attributes_for(&layout);
        assert_eq!(geometry.stride(), 48);
        assert_eq!(attributes[0].offset, 40);
        assert_eq!(attributes[0].shader_location, 3);
    }
}
