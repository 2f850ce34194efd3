//! Named-constant discovery, before and after linking.
//!
//! [`scan_source`] reads declarations straight from expanded stage source so
//! parameters can be written before any program exists. After a link,
//! [`build_references`] asks the driver which of those survived and where
//! they live, tagging each with the stage whose parameter store owns it.

use std::rc::Rc;

use glink_core::{ConstantDefinition, ConstantType, NamedConstants, PerStage, ProgramHandle, StageKind, StageMask};
use glink_driver::{BlockKind, BlockMember, Driver};
use tracing::{debug, trace, warn};

use crate::blocks::BlockBindings;
use crate::error::LinkError;
use crate::program::ProgramHandles;
use crate::stage::Stage;

const QUALIFIERS: &[&str] = &[
    "lowp", "mediump", "highp", "coherent", "volatile", "restrict", "readonly", "writeonly",
];

/// A default-block uniform resolved to a driver location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformReference {
    pub name: String,
    /// Stage whose parameter store supplies the value.
    pub stage: StageKind,
    /// Program the location belongs to.
    pub program: ProgramHandle,
    pub location: i32,
    pub const_type: ConstantType,
    /// Active elements; may be fewer than declared.
    pub array_size: usize,
    pub def: ConstantDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicCounterReference {
    pub name: String,
    pub stage: StageKind,
    pub binding: u32,
    /// Byte offset inside the counter buffer.
    pub offset: u32,
    pub def: ConstantDefinition,
}

/// A uniform or storage block and the binding point it was assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReference {
    pub kind: BlockKind,
    pub name: String,
    pub binding: u32,
    /// Stages that declare the block.
    pub stages: StageMask,
    pub data_size: usize,
    pub members: Vec<BlockMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReferences {
    pub uniforms: Vec<UniformReference>,
    pub atomic_counters: Vec<AtomicCounterReference>,
    pub blocks: Vec<BlockReference>,
}

// ---------------------------------------------------------------------------
// Source scan
// ---------------------------------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// Next occurrence of `word` at or after `from` that is a whole identifier.
fn find_word(text: &str, word: &str, mut from: usize) -> Option<usize> {
    while let Some(offset) = text.get(from..)?.find(word) {
        let at = from + offset;
        let end = at + word.len();
        let before = text[..at].chars().next_back();
        let after = text[end..].chars().next();
        if !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char) {
            return Some(at);
        }
        from = end;
    }
    None
}

/// Split on `separator` outside parentheses.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// `name[2][3]` → `("name", 6)`.
fn parse_declarator(declarator: &str) -> (&str, usize) {
    let declarator = declarator.trim();
    let Some(open) = declarator.find('[') else {
        return (declarator, 1);
    };
    let size = declarator[open..]
        .split(['[', ']'])
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse::<usize>().unwrap_or(1))
        .product();
    (declarator[..open].trim(), size)
}

fn strip_qualifiers(mut decl: &str) -> &str {
    loop {
        decl = decl.trim_start();
        if let Some(rest) = decl.strip_prefix("layout") {
            if let Some(close) = rest.find(')') {
                decl = &rest[close + 1..];
                continue;
            }
        }
        let word_len = decl.find(char::is_whitespace).unwrap_or(decl.len());
        if QUALIFIERS.contains(&&decl[..word_len]) {
            decl = &decl[word_len..];
            continue;
        }
        return decl;
    }
}

fn scan_declaration(decl: &str, constants: &mut NamedConstants) {
    let decl = strip_qualifiers(decl);
    let Some((type_name, declarators)) = decl.split_once(char::is_whitespace) else {
        return;
    };
    let Some(const_type) = ConstantType::from_glsl(type_name) else {
        debug!(type_name, "skipping uniform of unsupported type");
        return;
    };

    for declarator in split_top_level(declarators, ',') {
        let declarator = match declarator.split_once('=') {
            Some((declarator, _)) => {
                warn!(
                    declarator = declarator.trim(),
                    "uniform default values are ignored; set the value through the parameter store"
                );
                declarator
            }
            None => declarator,
        };
        let (name, array_size) = parse_declarator(declarator);
        if !name.is_empty() {
            constants.add(name, const_type, array_size);
        }
    }
}

/// Declared uniforms and block names of an expanded stage source.
///
/// Numeric constants are packed per storage type in declaration order;
/// samplers take int slots. `uniform Name { ... }` and `buffer Name { ... }`
/// record a block name instead of constants.
pub fn scan_source(source: &str) -> NamedConstants {
    let mut constants = NamedConstants::new();

    let mut from = 0;
    while let Some(at) = find_word(source, "uniform", from) {
        let body = at + "uniform".len();
        let Some(end) = source[body..].find([';', '{']).map(|e| body + e) else {
            break;
        };
        if source[end..].starts_with('{') {
            let name = strip_qualifiers(&source[body..end]).trim();
            if !name.is_empty() {
                constants.declare_block(name);
            }
            from = source[end..].find('}').map_or(source.len(), |close| end + close + 1);
            continue;
        }
        scan_declaration(&source[body..end], &mut constants);
        from = end + 1;
    }

    let mut from = 0;
    while let Some(at) = find_word(source, "buffer", from) {
        from = at + "buffer".len();
        let rest = source[from..].trim_start();
        let name_len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        if name_len > 0 && rest[name_len..].trim_start().starts_with('{') {
            constants.declare_block(&rest[..name_len]);
        }
    }

    constants
}

// ---------------------------------------------------------------------------
// Post-link reflection
// ---------------------------------------------------------------------------

/// `foo[0]` → `foo`; later array elements are not separate constants.
fn base_name(name: &str) -> Option<&str> {
    match name.strip_suffix("[0]") {
        Some(base) => Some(base),
        None if name.ends_with(']') => None,
        None => Some(name),
    }
}

/// Resolve the driver's active uniforms, counters and blocks against each
/// stage's declarations.
///
/// A uniform declared in several stages gets one reference per stage. Block
/// binding points come from `bindings`, shared by every program, and are
/// applied to the program here.
pub(crate) fn build_references(
    driver: &mut dyn Driver,
    bindings: &mut BlockBindings,
    handles: &ProgramHandles,
    stages: &PerStage<Option<Rc<Stage>>>,
) -> Result<ProgramReferences, LinkError> {
    let mut tables: PerStage<Option<Rc<NamedConstants>>> = PerStage::default();
    for (kind, stage) in stages.present() {
        tables[kind] = Some(stage.named_constants()?);
    }
    let present: StageMask = stages.present().map(|(kind, _)| kind).collect();
    let caps = driver.capabilities();
    let block_kinds = [
        (BlockKind::Uniform, caps.uniform_blocks),
        (BlockKind::Storage, caps.shader_storage_blocks),
    ];

    let mut references = ProgramReferences::default();
    for (program, mask) in handles.reflection_units(present) {
        for uniform in driver.active_uniforms(program) {
            let Some(name) = base_name(&uniform.name) else {
                continue;
            };

            let mut matched = false;
            for kind in mask.iter() {
                let Some(def) = tables[kind].as_ref().and_then(|t| t.get(name)) else {
                    continue;
                };
                matched = true;
                match uniform.atomic {
                    Some(slot) => references.atomic_counters.push(AtomicCounterReference {
                        name: name.to_owned(),
                        stage: kind,
                        binding: slot.binding,
                        offset: slot.offset,
                        def: def.clone(),
                    }),
                    None if uniform.location >= 0 => references.uniforms.push(UniformReference {
                        name: name.to_owned(),
                        stage: kind,
                        program,
                        location: uniform.location,
                        const_type: def.const_type,
                        array_size: uniform.array_size.min(def.array_size).max(1),
                        def: def.clone(),
                    }),
                    None => {}
                }
            }
            if !matched {
                trace!(uniform = %uniform.name, ?program, "active uniform matches no declared constant");
            }
        }

        for (kind, supported) in block_kinds {
            if !supported {
                continue;
            }
            for block in driver.active_blocks(program, kind) {
                let binding = bindings.binding_for(kind, &block.name);
                driver.set_block_binding(program, kind, block.index, binding);

                let declaring: StageMask = mask
                    .iter()
                    .filter(|stage| tables[*stage].as_ref().is_some_and(|t| t.declares_block(&block.name)))
                    .collect();
                let declaring = if declaring.is_empty() { mask } else { declaring };

                match references
                    .blocks
                    .iter_mut()
                    .find(|b| b.kind == kind && b.name == block.name)
                {
                    Some(existing) => declaring.iter().for_each(|stage| existing.stages.insert(stage)),
                    None => references.blocks.push(BlockReference {
                        kind,
                        name: block.name,
                        binding,
                        stages: declaring,
                        data_size: block.data_size,
                        members: block.members,
                    }),
                }
            }
        }
    }

    debug!(
        uniforms = references.uniforms.len(),
        atomic_counters = references.atomic_counters.len(),
        blocks = references.blocks.len(),
        "built program references"
    );
    Ok(references)
}

#[cfg(test)]
mod tests {
    use glink_core::Storage;
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(constants: &NamedConstants) -> Vec<(&str, ConstantType, usize)> {
        constants
            .iter()
            .map(|(name, def)| (name, def.const_type, def.array_size))
            .collect()
    }

    #[test]
    fn scans_plain_and_qualified_declarations() {
        let constants = scan_source(
            "#version 450\n\
             uniform highp vec4 tint;\n\
             layout(location = 3) uniform mat4 world, view;\n\
             uniform float weights[2][4];\n\
             uniform sampler2D albedo;\n\
             uniformity_is_not_a_keyword x;\n\
             void main() {}\n",
        );
        assert_eq!(
            names(&constants),
            vec![
                ("tint", ConstantType::Float4, 1),
                ("world", ConstantType::Matrix4x4, 1),
                ("view", ConstantType::Matrix4x4, 1),
                ("weights", ConstantType::Float1, 8),
                ("albedo", ConstantType::Sampler2D, 1),
            ]
        );
        assert_eq!(constants.buffer_len(Storage::Float), 4 + 16 + 16 + 8);
        assert_eq!(constants.buffer_len(Storage::Int), 1);
    }

    #[test]
    fn blocks_are_recorded_not_scanned() {
        let constants = scan_source(
            "layout(std140) uniform Lights { vec4 colors[4]; float count; } lights;\n\
             buffer Particles { vec4 positions[]; };\n\
             uniform float exposure;\n",
        );
        assert_eq!(names(&constants), vec![("exposure", ConstantType::Float1, 1)]);
        assert_eq!(constants.blocks(), &["Lights".to_owned(), "Particles".to_owned()]);
    }

    #[test]
    fn defaults_and_unknown_types_are_tolerated() {
        let constants = scan_source(
            "uniform vec3 offset = vec3(0.0, 1.0, 0.0), scale;\nuniform MyStruct light;\n",
        );
        assert_eq!(
            names(&constants),
            vec![("offset", ConstantType::Float3, 1), ("scale", ConstantType::Float3, 1)]
        );
    }

    #[test]
    fn array_element_names() {
        assert_eq!(base_name("bones[0]"), Some("bones"));
        assert_eq!(base_name("bones[3]"), None);
        assert_eq!(base_name("tint"), Some("tint"));
    }
}
