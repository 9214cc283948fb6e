//! The Aggregate Bag engine: an ordered key-tuple -> counter-tuple map
//! with merge, subtraction, and schema projection, plus the single-field
//! legacy `Bag` specialization.

pub mod bag;
pub mod field;
pub mod legacy;
pub mod pool;
pub mod schema;
pub mod wire;

pub use bag::{AggregateBag, BagError, BagStats, Counter, Key};
pub use field::{FieldId, FieldValue};
pub use legacy::{Bag, LegacyBagError};
pub use pool::NodePool;
pub use schema::{AggregateBagSchema, SchemaError, MAX_KEY_WIDTH};
pub use wire::{read_bag, write_bag, WireError};
