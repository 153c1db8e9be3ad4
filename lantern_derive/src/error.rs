//! Derive macro for error types.
//!
//! Generates `std::fmt::Display` and `std::error::Error` implementations.
//!
//! # Usage
//!
//! ```ignore
//! use lantern_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum VMError {
//!     #[error("stack overflow (capacity {capacity})")]
//!     StackOverflow { capacity: usize },
//!
//!     #[error("{line}:{column}: {source}")]
//!     Located { line: usize, column: usize, source: Box<VMError> },
//!
//!     #[error("division by zero")]
//!     DivisionByZero,
//! }
//! ```
//!
//! Only the fields a message mentions are bound and forwarded to `write!`, so
//! a variant may carry data its message does not print.

use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use std::collections::HashSet;
use syn::{Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

/// Derives `Display` and `Error` for an enum or struct.
///
/// Each variant must have an `#[error("...")]` attribute. Positional
/// placeholders (`{0}`, `{1:?}`) refer to tuple fields and named placeholders
/// (`{field}`) to struct fields.
pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand_error_derive(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_error_derive(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let display_body = match &input.data {
        Data::Enum(data_enum) => {
            let arms = data_enum
                .variants
                .iter()
                .map(|variant| {
                    let variant_name = &variant.ident;
                    let message = extract_error_message(
                        &variant.attrs,
                        &variant.ident,
                        &format!("variant `{}`", variant.ident),
                    )?;
                    let (pattern, write) = display_fields(&variant.fields, &message);
                    Ok(quote! {
                        Self::#variant_name #pattern => #write,
                    })
                })
                .collect::<syn::Result<Vec<_>>>()?;

            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data_struct) => {
            let message = extract_error_message(
                &input.attrs,
                &input.ident,
                &format!("type `{}`", input.ident),
            )?;
            let (pattern, write) = display_fields(&data_struct.fields, &message);
            quote! {
                let Self #pattern = self;
                #write
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds the destructuring pattern and the `write!` call for one set of fields.
fn display_fields(
    fields: &Fields,
    message: &str,
) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
    match fields {
        Fields::Unit => (quote! {}, quote! { write!(f, #message) }),
        Fields::Unnamed(fields) => {
            let format_str = convert_positional_to_named(message, fields.unnamed.len());
            let used = placeholder_names(&format_str);
            let mut bound = Vec::new();
            let bindings: Vec<_> = (0..fields.unnamed.len())
                .map(|i| {
                    let ident = format_ident!("f{}", i);
                    if used.contains(&ident.to_string()) {
                        bound.push(ident.clone());
                        quote! { #ident }
                    } else {
                        quote! { _ }
                    }
                })
                .collect();
            (
                quote! { ( #(#bindings),* ) },
                quote! { write!(f, #format_str, #(#bound = #bound),*) },
            )
        }
        Fields::Named(fields) => {
            let used = placeholder_names(message);
            let bound: Vec<_> = fields
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref())
                .filter(|ident| used.contains(&ident.to_string()))
                .collect();
            (
                quote! { { #(#bound,)* .. } },
                quote! { write!(f, #message, #(#bound = #bound),*) },
            )
        }
    }
}

/// Extracts the message from an `#[error("...")]` attribute.
fn extract_error_message<T: ToTokens>(
    attrs: &[syn::Attribute],
    target: &T,
    target_desc: &str,
) -> syn::Result<String> {
    for attr in attrs {
        if !attr.path().is_ident("error") {
            continue;
        }
        let Meta::List(meta_list) = &attr.meta else {
            return Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute; use #[error(\"message\")] to describe the error",
            ));
        };
        let lit = syn::parse2::<Lit>(meta_list.tokens.clone()).map_err(|_| {
            syn::Error::new_spanned(
                &attr.meta,
                "failed to parse #[error] attribute; expected a string literal like #[error(\"stack overflow: {capacity}\")]",
            )
        })?;
        return match lit {
            Lit::Str(lit_str) => Ok(lit_str.value()),
            _ => Err(syn::Error::new_spanned(
                &attr.meta,
                "invalid #[error] attribute: message must be a string literal",
            )),
        };
    }

    Err(syn::Error::new_spanned(
        target,
        format!(
            "missing #[error(\"...\")] attribute on {}; every error variant must declare a display message",
            target_desc
        ),
    ))
}

/// Converts positional format args `{0}`, `{1:?}` to named args `{f0}`, `{f1:?}`.
fn convert_positional_to_named(format_str: &str, field_count: usize) -> String {
    let mut result = format_str.to_string();
    for i in (0..field_count).rev() {
        result = result
            .replace(&format!("{{{}}}", i), &format!("{{f{}}}", i))
            .replace(&format!("{{{}:", i), &format!("{{f{}:", i));
    }
    result
}

/// Collects the argument names referenced by `{name}` / `{name:spec}` placeholders.
///
/// Escaped braces (`{{`, `}}`) are skipped.
fn placeholder_names(format_str: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut chars = format_str.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            continue;
        }
        if chars.peek() == Some(&'{') {
            chars.next();
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next == '}' || next == ':' {
                break;
            }
            name.push(next);
            chars.next();
        }
        if !name.is_empty() {
            names.insert(name);
        }
    }
    names
}
