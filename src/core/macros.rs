//! Core macros

/// Implements `Default` from a field list.
///
/// ```rust
/// # use script_bridge::impl_default;
/// struct Limits {
///     depth: u32,
///     name: String,
/// }
///
/// impl_default!(Limits {
///     depth: 8,
///     name: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
