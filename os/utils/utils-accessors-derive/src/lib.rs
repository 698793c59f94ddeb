//! # Accessor Derive
//!
//! This crate provides a derive macro for generating setters and getters for
//! structs.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, LitBool, parse_macro_input, spanned::Spanned};

/// Derive to generate, for each **named** field:
///
/// - `.set_<field>(&mut self, value: Ty) -> &mut Self`
/// - `const .with_<field>(mut self, value: Ty) -> Self`
/// - `const .<field>(&self) -> &Ty`, or `-> Ty` for fields marked
///   `#[setters(copy)]`
///
/// Skipping a field entirely: `#[setters(skip)]`.
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Setters;
///
/// #[derive(Setters)]
/// struct Foo<T> where T: Default {
///     #[setters(copy)]
///     a: u32,
///     name: &'static str,
///     #[setters(skip)]
///     _phantom: T,
/// }
///
/// let mut f = Foo { a: 1, name: "x", _phantom: u8::default() };
/// f.set_a(10).set_a(11);
/// assert_eq!(f.a(), 11);
/// let f2 = f.with_a(42).with_name("y");
/// assert_eq!(f2.a(), 42);
/// assert_eq!(*f2.name(), "y");
/// ```
#[proc_macro_derive(Setters, attributes(setters))]
pub fn derive_generate_setters(input: TokenStream) -> TokenStream {
    let DeriveInput {
        ident,
        generics,
        data,
        ..
    } = parse_macro_input!(input as DeriveInput);

    let fields = match data {
        Data::Struct(s) => match s.fields {
            Fields::Named(n) => n.named,
            Fields::Unnamed(u) => {
                return syn::Error::new(u.span(), "Setters only supports named fields")
                    .to_compile_error()
                    .into();
            }
            Fields::Unit => {
                return syn::Error::new(ident.span(), "Setters does not apply to unit structs")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(ident.span(), "Setters can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut methods = Vec::new();

    for field in fields {
        let Some(fname) = &field.ident else { continue };
        let options = match FieldOptions::parse(&field.attrs) {
            Ok(options) => options,
            Err(e) => return e.to_compile_error().into(),
        };
        if options.skip {
            continue;
        }

        let ty = &field.ty;
        let set_name = format_ident!("set_{}", fname);
        let with_name = format_ident!("with_{}", fname);

        let getter = if options.copy {
            quote! {
                #[inline]
                #[must_use]
                pub const fn #fname(&self) -> #ty {
                    self.#fname
                }
            }
        } else {
            quote! {
                #[inline]
                #[must_use]
                pub const fn #fname(&self) -> &#ty {
                    &self.#fname
                }
            }
        };

        methods.push(quote! {
            #[inline]
            pub fn #set_name(&mut self, value: #ty) -> &mut Self {
                self.#fname = value;
                self
            }

            #[inline]
            #[must_use]
            pub const fn #with_name(mut self, value: #ty) -> Self {
                self.#fname = value;
                self
            }

            #getter
        });
    }

    let expanded = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    };

    TokenStream::from(expanded)
}

#[derive(Default)]
struct FieldOptions {
    skip: bool,
    copy: bool,
}

impl FieldOptions {
    /// Accepts `#[setters(skip)]`, `#[setters(skip = true)]` and
    /// `#[setters(copy)]`, in any combination.
    fn parse(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();
        for attr in attrs {
            if !attr.path().is_ident("setters") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                let flag = if meta.path.is_ident("skip") {
                    &mut options.skip
                } else if meta.path.is_ident("copy") {
                    &mut options.copy
                } else {
                    return Err(meta.error("expected `skip` or `copy`"));
                };

                *flag = if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse::<LitBool>()?.value
                } else {
                    true
                };
                Ok(())
            })?;
        }
        Ok(options)
    }
}
