use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Result, Type, parse_macro_input};

/// Derive macro that generates `Default` and a `validate` method for
/// configuration structs.
///
/// Every field carries a `#[default(...)]` attribute with its default value.
/// String fields accept string literals directly. Numeric fields may add
/// bounds, which are checked by the generated `validate`:
///
/// - `#[min(expr)]`: value must be `>= expr`
/// - `#[max(expr)]`: value must be `<= expr`
/// - `#[above(expr)]`: value must be `> expr`
/// - `#[validate]`: the field is itself a config struct; its `validate` is
///   called and errors are prefixed with the field name
///
/// Comparisons are written so that NaN fails every bound.
///
/// # Example
/// ```
/// use fieldstep_macros::ConfigDefaults;
///
/// #[derive(ConfigDefaults)]
/// pub struct StepperConfig {
///     #[default(1e-4)]
///     #[above(0.0)]
///     pub tolerance: f64,
///
///     #[default(10_000)]
///     #[min(1)]
///     pub max_step_trials: usize,
///
///     #[default("rkn4")]
///     pub label: String,
/// }
///
/// let mut config = StepperConfig::default();
/// assert_eq!(config.max_step_trials, 10_000);
/// assert!(config.validate().is_ok());
///
/// config.tolerance = 0.0;
/// assert!(config.validate().is_err());
/// ```
///
/// # Errors
///
/// Compilation fails if the derive is applied to anything other than a struct
/// with named fields, if a field lacks `#[default(...)]`, or if any attribute
/// is empty.
#[proc_macro_derive(ConfigDefaults, attributes(default, min, max, above, validate))]
pub fn config_defaults(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate(input: DeriveInput) -> Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(Error::new_spanned(
                    &input,
                    "ConfigDefaults only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(Error::new_spanned(
                &input,
                "ConfigDefaults can only be derived for structs",
            ));
        }
    };

    let mut field_defaults = Vec::with_capacity(fields.len());
    let mut field_checks = Vec::new();

    for field in fields {
        let Some(field_name) = field.ident.as_ref() else {
            return Err(Error::new_spanned(field, "unnamed field"));
        };
        let default_value = default_value(field)?;

        field_defaults.push(if is_string_type(&field.ty) {
            quote! { #field_name: ::std::convert::Into::into(#default_value) }
        } else {
            quote! { #field_name: #default_value }
        });

        field_checks.extend(bound_checks(field)?);
    }

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics Default for #name #ty_generics #where_clause {
            fn default() -> Self {
                Self {
                    #(#field_defaults),*
                }
            }
        }

        #[automatically_derived]
        impl #impl_generics #name #ty_generics #where_clause {
            /// Check every bounded field, returning the first violation.
            pub fn validate(&self) -> ::std::result::Result<(), ::std::string::String> {
                #(#field_checks)*
                Ok(())
            }
        }
    })
}

fn is_string_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "String";
        }
    }
    false
}

fn field_label(field: &Field) -> String {
    field
        .ident
        .as_ref()
        .map(|i| i.to_string())
        .unwrap_or_else(|| "unnamed field".to_string())
}

/// Parse the tokens of `#[name(...)]`, rejecting an empty argument list.
fn attribute_tokens(attr: &Attribute, field: &Field) -> Result<proc_macro2::TokenStream> {
    let label = field_label(field);
    let kind = attr
        .path()
        .get_ident()
        .map(|i| i.to_string())
        .unwrap_or_default();

    let tokens: proc_macro2::TokenStream = attr.parse_args().map_err(|e| {
        Error::new_spanned(
            attr,
            format!("Failed to parse #[{kind}] attribute for field '{label}': {e}"),
        )
    })?;

    if tokens.is_empty() {
        return Err(Error::new_spanned(
            attr,
            format!("Field '{label}' has an empty #[{kind}()] attribute"),
        ));
    }

    Ok(tokens)
}

fn default_value(field: &Field) -> Result<proc_macro2::TokenStream> {
    for attr in &field.attrs {
        if attr.path().is_ident("default") {
            return attribute_tokens(attr, field);
        }
    }

    Err(Error::new_spanned(
        field,
        format!(
            "Field '{}' must have a #[default(...)] attribute specifying its default value",
            field_label(field)
        ),
    ))
}

fn bound_checks(field: &Field) -> Result<Vec<proc_macro2::TokenStream>> {
    let Some(ident) = field.ident.as_ref() else {
        return Ok(Vec::new());
    };
    let label = ident.to_string();
    let mut checks = Vec::new();

    for attr in &field.attrs {
        let path = attr.path();

        if path.is_ident("validate") {
            checks.push(quote! {
                self.#ident
                    .validate()
                    .map_err(|e| ::std::format!("{}.{}", #label, e))?;
            });
            continue;
        }

        let (holds, relation) = if path.is_ident("min") {
            (quote! { >= }, "at least")
        } else if path.is_ident("max") {
            (quote! { <= }, "at most")
        } else if path.is_ident("above") {
            (quote! { > }, "greater than")
        } else {
            continue;
        };

        let bound = attribute_tokens(attr, field)?;
        let bound_text = bound.to_string();

        checks.push(quote! {
            if !(self.#ident #holds (#bound)) {
                return Err(::std::format!(
                    "{} must be {} {}, got {:?}",
                    #label,
                    #relation,
                    #bound_text,
                    self.#ident
                ));
            }
        });
    }

    Ok(checks)
}
