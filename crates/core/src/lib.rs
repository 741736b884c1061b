pub mod clock;
pub mod coerce;
pub mod entry;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod record;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{NewOverride, OverrideEntry, Scope};
pub use error::CoreError;
pub use field_value::{FixedPoint, TypedValue};
pub use ids::*;
pub use record::BaseRecord;
pub use registry::{CoercionRule, FieldDescriptor, FieldRegistry, FieldTable, FieldType};
