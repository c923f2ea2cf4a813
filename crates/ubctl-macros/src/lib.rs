#![deny(unsafe_code)]

//! Procedural macros for ubctl.
//!
//! - `#[derive(Redact)]`: hide secret fields (API keys, key paths) in Debug output
//! - `#[derive(Validate)]`: generate a `validate()` method from field annotations,
//!   used on API payloads before they reach the daemon or a zone file

extern crate proc_macro;

mod redact;
mod validate;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derive macro for redacting sensitive fields in Debug output.
///
/// Fields annotated with `#[redact]` display as `"[REDACTED]"`. An
/// `Option<_>` field displays as `Some("[REDACTED]")` or `None`, so the
/// output still says whether the secret is configured.
///
/// # Example
///
/// ```ignore
/// use ubctl_macros::Redact;
///
/// #[derive(Redact)]
/// struct SecurityConfig {
///     #[redact]
///     pub api_key: String,
/// }
/// ```
#[proc_macro_derive(Redact, attributes(redact))]
pub fn derive_redact(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    redact::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive macro for payload validation.
///
/// Generates a `validate(&self) -> Result<(), Vec<String>>` method that
/// checks string field constraints.
///
/// Supported attributes:
/// - `#[validate(non_empty)]`: must not be empty
/// - `#[validate(no_whitespace)]`: must not contain any whitespace character
/// - `#[validate(one_of("a", "b"))]`: must equal one of the listed values
/// - `#[validate(max_len = N)]`: maximum length in bytes
///
/// # Example
///
/// ```ignore
/// use ubctl_macros::Validate;
///
/// #[derive(Validate)]
/// struct Zone {
///     #[validate(non_empty, no_whitespace)]
///     pub name: String,
///     #[validate(one_of("primary", "secondary", "stub", "forward"))]
///     pub kind: String,
/// }
/// ```
#[proc_macro_derive(Validate, attributes(validate))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    validate::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
