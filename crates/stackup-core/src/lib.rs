//! stackup core - resource descriptors, declarations, and dependency resolution

pub mod declaration;
pub mod error;
pub mod resolver;
pub mod store;
pub mod template;
pub mod types;

pub use declaration::{ArtifactBinding, Stack};
pub use error::{Error, Result};
pub use store::DescriptorStore;
pub use types::*;
