/// Configuration macros for zero-repetition config definitions
///
/// Provides the `config_struct!` macro that defines a configuration
/// structure with embedded defaults in a single declaration.

/// Define a configuration struct with embedded defaults
///
/// Generates:
/// - The struct with public fields
/// - A Default implementation with the specified values
/// - Serde support with `#[serde(default)]`
///
/// # Example
/// ```
/// warden::config_struct! {
///     pub struct CacheConfig {
///         max_entries: usize = 500,
///         default_ttl_secs: u64 = 300,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
