//! Segmentation engine
//!
//! Splits one selected master row into topic-scoped extracts, one per
//! [`SegmentSchema`]. Validation is all-or-nothing across the schema set:
//! if any schema names a column the row does not have, no extract is
//! produced at all.
//!
//! # Example
//!
//! ```ignore
//! let row = store.select("ABC123")?;
//! let schemas = SchemaSet::builtin();
//! let extracts = segment(&row, &schemas)?;
//! assert_eq!(extracts["Property"].columns()[0].0, "Property Address");
//! ```

mod engine;
mod extract;
mod schema;

pub use engine::{segment, validate, SchemaViolation, SegmentError};
pub use extract::Extract;
pub use schema::{SchemaSet, SegmentSchema};
pub(crate) use schema::{ENVIRONMENTAL, GROWTH_TRENDS, OCCUPANCY, PROPERTY, SOCIO_ECONOMIC};
