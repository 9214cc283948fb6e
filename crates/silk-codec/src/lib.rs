//! IPFIX-family flow codec: schema/template negotiation, the time
//! gauntlet, stream file-header handling, and the `FlowReader`/
//! `FlowWriter` stream abstraction.

pub mod header;
pub mod ie;
pub mod quirks;
pub mod record_mapping;
pub mod schema;
pub mod sidecar_wire;
pub mod stream;
pub mod template;
pub mod time_gauntlet;

pub use header::{CompressionMethod, FileHeader, HeaderEntry, RecordFormat};
pub use ie::Ie;
pub use quirks::{FirewallDisposition, ProbeConfig, Quirks};
pub use schema::{FieldDescriptor, Schema, SchemaBuilder};
pub use stream::{CodecError, FlowReader, FlowWriter};
pub use template::{InterestingElement, InterestingMask, Template, TemplateTable};
