//! Useful constants for use within the importer.

/// The name given to the produced module when neither the caller nor the
/// program provides one.
pub const DEFAULT_MODULE_NAME: &str = "graft_module";

/// The size in bytes at or above which tensor payloads are stored out of line
/// as module resources rather than inline in their literal's attribute.
pub const DEFAULT_RESOURCE_THRESHOLD: usize = 256;

/// The name of the attribute that records the overload of an operation, such
/// as `Tensor` for `aten::add.Tensor`.
pub const OVERLOAD_ATTRIBUTE: &str = "overload";

/// The name of the attribute holding the payload of a constant operation.
pub const VALUE_ATTRIBUTE: &str = "value";

/// The name of the attribute holding the field names of a struct construction.
pub const FIELDS_ATTRIBUTE: &str = "fields";

/// The name of the attribute naming the global slot read or written by a
/// global slot operation.
pub const SLOT_ATTRIBUTE: &str = "slot";
