//! GLSL source helpers: version detection and separable-stage fixups.

use std::borrow::Cow;

use glink_core::StageKind;

/// First GLSL version with the `gl_PerVertex` interface block.
const PER_VERTEX_MIN_VERSION: u32 = 150;

const PER_VERTEX_MEMBERS: &str = "{\n    vec4 gl_Position;\n    float gl_PointSize;\n    float gl_ClipDistance[];\n}";

/// The version number after `#version`, if the source declares one.
pub fn declared_version(source: &str) -> Option<u32> {
    source.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix('#')?.trim_start();
        let rest = rest.strip_prefix("version")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Redeclare the built-in per-vertex blocks a separable stage must match.
///
/// Separable programs only interface correctly when both sides declare
/// `gl_PerVertex`. The blocks go right after the `#version` line; stages
/// without `main`, older than GLSL 1.50, or already declaring `gl_Position`
/// are returned unchanged.
pub fn with_per_vertex_blocks(source: &str, kind: StageKind) -> Cow<'_, str> {
    let blocks = match kind {
        StageKind::Vertex => format!("out gl_PerVertex\n{PER_VERTEX_MEMBERS};\n"),
        StageKind::Geometry | StageKind::Domain => format!(
            "in gl_PerVertex\n{PER_VERTEX_MEMBERS} gl_in[];\nout gl_PerVertex\n{PER_VERTEX_MEMBERS};\n"
        ),
        StageKind::Hull => format!(
            "in gl_PerVertex\n{PER_VERTEX_MEMBERS} gl_in[];\nout gl_PerVertex\n{PER_VERTEX_MEMBERS} gl_out[];\n"
        ),
        StageKind::Fragment | StageKind::Compute => return Cow::Borrowed(source),
    };

    if source.contains("vec4 gl_Position") || !source.contains("void main") {
        return Cow::Borrowed(source);
    }
    if !declared_version(source).is_some_and(|v| v >= PER_VERTEX_MIN_VERSION) {
        return Cow::Borrowed(source);
    }

    let Some(version_at) = source.find("#version") else {
        return Cow::Borrowed(source);
    };
    let line_end = source[version_at..]
        .find('\n')
        .map_or(source.len(), |nl| version_at + nl + 1);

    let mut patched = String::with_capacity(source.len() + blocks.len() + 1);
    patched.push_str(&source[..line_end]);
    if !patched.ends_with('\n') {
        patched.push('\n');
    }
    patched.push_str(&blocks);
    patched.push_str(&source[line_end..]);
    Cow::Owned(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_read_from_directive() {
        assert_eq!(declared_version("  # version 330 core\nvoid main() {}"), Some(330));
        assert_eq!(declared_version("void main() {}"), None);
    }

    #[test]
    fn vertex_stage_gets_output_block() {
        let source = "#version 410\nin vec3 position;\nvoid main() { gl_Position = vec4(position, 1.0); }\n";
        let patched = with_per_vertex_blocks(source, StageKind::Vertex);
        let mut lines = patched.lines();
        assert_eq!(lines.next(), Some("#version 410"));
        assert_eq!(lines.next(), Some("out gl_PerVertex"));
        assert!(patched.ends_with(&source["#version 410\n".len()..]));
        assert!(!patched.contains("gl_in[]"));
    }

    #[test]
    fn hull_stage_gets_both_arrays() {
        let source = "#version 450\nlayout(vertices = 3) out;\nvoid main() {}\n";
        let patched = with_per_vertex_blocks(source, StageKind::Hull);
        assert!(patched.contains("} gl_in[];"));
        assert!(patched.contains("} gl_out[];"));
    }

    #[test]
    fn unchanged_when_not_applicable() {
        let old = "#version 120\nvoid main() {}\n";
        assert!(matches!(with_per_vertex_blocks(old, StageKind::Vertex), Cow::Borrowed(_)));

        let declared = "#version 450\nout gl_PerVertex { vec4 gl_Position; };\nvoid main() {}\n";
        assert!(matches!(with_per_vertex_blocks(declared, StageKind::Vertex), Cow::Borrowed(_)));

        let fragment = "#version 450\nvoid main() {}\n";
        assert!(matches!(with_per_vertex_blocks(fragment, StageKind::Fragment), Cow::Borrowed(_)));
    }
}
