//! Pure data types shared by the pipeline: commands, processor vocabularies and source identity.

pub mod commands;
pub mod processors;
pub mod source;

pub use commands::{Command, CommandSet};
pub use processors::{CommandSpec, ParamKind, ProcessorSpec};
pub use source::{Fingerprint, SourceDescriptor, SourceMetadata};
