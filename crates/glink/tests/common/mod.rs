#![allow(dead_code)]

use std::rc::Rc;

use glink::{BinaryCacheConfig, LinkConfig, LinkContext, Stage, StageKind, StrategyChoice};
use glink_driver::HeadlessDriver;

pub const VERTEX: &str = "#version 330\n\
uniform mat4 world;\n\
in vec4 position;\n\
void main() { gl_Position = world * position; }\n";

pub const FRAGMENT: &str = "#version 330\n\
uniform vec4 tint;\n\
uniform float exposure;\n\
out vec4 color;\n\
void main() { color = tint * exposure; }\n";

pub const FRAGMENT_ALT: &str = "#version 330\n\
uniform vec4 tint;\n\
out vec4 color;\n\
void main() { color = tint; }\n";

pub const BROKEN_FRAGMENT: &str = "#version 330\n\
#error missing output declaration\n\
void main() {}\n";

pub fn stage(kind: StageKind, name: &str, source: &str) -> Rc<Stage> {
    Rc::new(Stage::new(kind, name, source))
}

pub fn config(strategy: StrategyChoice, binary_cache: BinaryCacheConfig) -> LinkConfig {
    LinkConfig { strategy, binary_cache }
}

/// A headless context with the binary cache off, so counters only see source work.
pub fn context(strategy: StrategyChoice) -> LinkContext<HeadlessDriver> {
    glink::logging::init();
    let binary_cache = BinaryCacheConfig {
        enabled: false,
        ..BinaryCacheConfig::default()
    };
    LinkContext::new(HeadlessDriver::new(), config(strategy, binary_cache))
}

pub fn context_with(driver: HeadlessDriver, config: LinkConfig) -> LinkContext<HeadlessDriver> {
    glink::logging::init();
    LinkContext::new(driver, config)
}
