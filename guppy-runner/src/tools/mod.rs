//! External tool definitions and path resolution.

mod definitions;
mod locator;

pub use definitions::{ToolDefinition, ToolIo, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
pub use locator::{Environment, ResolvedTools, ToolLocator, ToolPath, ToolSource};
