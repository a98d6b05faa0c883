//! Host-object support: `struct MlogObject` sensor fields and the
//! `struct MLOG_BUILTINS` pseudo-struct of processor globals.

/// `this_x` becomes the sensor/builtin name `@this-x`.
pub fn convert_field_name(field_name: &str) -> String {
    format!("@{}", field_name.replace('_', "-"))
}
