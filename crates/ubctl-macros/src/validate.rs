//! Implementation of `#[derive(Validate)]`.
//!
//! Parses `#[validate(...)]` attributes on struct fields and generates a
//! `validate(&self) -> Result<(), Vec<String>>` method. Error messages use
//! the serde-visible field name when a `#[serde(rename = "..")]` is present,
//! so they match what the API caller sent.

use proc_macro2::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::punctuated::Punctuated;
use syn::{DeriveInput, LitInt, LitStr, Result, Token};

/// Parsed validation rules for a single field.
struct FieldRules {
    field_name: syn::Ident,
    display_name: String,
    non_empty: bool,
    no_whitespace: bool,
    one_of: Vec<String>,
    max_len: Option<usize>,
}

impl FieldRules {
    fn parse(field: &syn::Field) -> Result<Option<Self>> {
        let Some(field_name) = field.ident.clone() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };

        let mut rules = FieldRules {
            display_name: serde_rename(field)?.unwrap_or_else(|| field_name.to_string()),
            field_name,
            non_empty: false,
            no_whitespace: false,
            one_of: Vec::new(),
            max_len: None,
        };

        let mut has_validate = false;
        for attr in &field.attrs {
            if !attr.path().is_ident("validate") {
                continue;
            }
            has_validate = true;
            attr.parse_nested_meta(|meta| rules.parse_rule(meta))?;
        }

        Ok(has_validate.then_some(rules))
    }

    fn parse_rule(&mut self, meta: ParseNestedMeta) -> Result<()> {
        if meta.path.is_ident("non_empty") {
            self.non_empty = true;
            return Ok(());
        }

        if meta.path.is_ident("no_whitespace") {
            self.no_whitespace = true;
            return Ok(());
        }

        if meta.path.is_ident("max_len") {
            let value = meta.value()?;
            let lit: LitInt = value.parse()?;
            self.max_len = Some(lit.base10_parse()?);
            return Ok(());
        }

        if meta.path.is_ident("one_of") {
            let content;
            syn::parenthesized!(content in meta.input);
            let values: Punctuated<LitStr, Token![,]> =
                content.parse_terminated(|input| input.parse::<LitStr>(), Token![,])?;
            if values.is_empty() {
                return Err(meta.error("one_of needs at least one value"));
            }
            self.one_of = values.iter().map(LitStr::value).collect();
            return Ok(());
        }

        Err(meta.error("unknown validate rule; expected non_empty, no_whitespace, one_of, or max_len"))
    }

    fn generate_checks(&self) -> TokenStream {
        let field_name = &self.field_name;
        let field_str = &self.display_name;
        let mut checks = Vec::new();

        if self.non_empty {
            checks.push(quote! {
                if self.#field_name.is_empty() {
                    errors.push(format!("{}: must not be empty", #field_str));
                }
            });
        }

        if self.no_whitespace {
            checks.push(quote! {
                if self.#field_name.chars().any(char::is_whitespace) {
                    errors.push(format!("{}: must not contain whitespace", #field_str));
                }
            });
        }

        if let Some(max) = self.max_len {
            checks.push(quote! {
                if self.#field_name.len() > #max {
                    errors.push(format!("{}: length must be at most {}", #field_str, #max));
                }
            });
        }

        if !self.one_of.is_empty() {
            let allowed = &self.one_of;
            let listing = self.one_of.join(", ");
            checks.push(quote! {
                if ![#(#allowed),*].contains(&self.#field_name.as_str()) {
                    errors.push(format!("{}: must be one of [{}]", #field_str, #listing));
                }
            });
        }

        quote! { #(#checks)* }
    }
}

/// Extract `rename = ".."` from a `#[serde(...)]` attribute, if any.
fn serde_rename(field: &syn::Field) -> Result<Option<String>> {
    let mut renamed = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let lit: LitStr = meta.value()?.parse()?;
                renamed = Some(lit.value());
            } else if meta.input.peek(Token![=]) {
                // Skip `key = value` pairs we don't care about.
                let _: syn::Expr = meta.value()?.parse()?;
            } else if meta.input.peek(syn::token::Paren) {
                let _content;
                syn::parenthesized!(_content in meta.input);
            }
            Ok(())
        })?;
    }
    Ok(renamed)
}

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Validate only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Validate can only be derived for structs",
            ));
        }
    };

    let mut all_checks = Vec::new();
    for field in fields {
        if let Some(rules) = FieldRules::parse(field)? {
            all_checks.push(rules.generate_checks());
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            /// Validate this struct according to its field-level constraints.
            ///
            /// Returns `Ok(())` if all constraints pass, or `Err(Vec<String>)`
            /// with a list of human-readable validation error messages.
            pub fn validate(&self) -> ::std::result::Result<(), ::std::vec::Vec<::std::string::String>> {
                let mut errors = ::std::vec::Vec::new();
                #(#all_checks)*
                if errors.is_empty() {
                    ::std::result::Result::Ok(())
                } else {
                    ::std::result::Result::Err(errors)
                }
            }
        }
    })
}
