pub mod clock;
pub mod tools;

pub use tools::{RegistryError, ToolDeclaration, ToolError, ToolHandler, ToolRegistry, ToolSpec};

/// The tools every bridge instance ships with.
pub fn builtin_tools() -> Vec<ToolDeclaration> {
    vec![clock::current_time_tool()]
}
