use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[proc_macro_derive(FormModel)]
pub fn derive_form_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(
            input.ident,
            "FormModel derive currently supports only non-generic structs",
        )
        .to_compile_error()
        .into();
    }

    let model_ident = input.ident;

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return syn::Error::new(
                    Span::call_site(),
                    "FormModel derive requires a struct with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new(
                Span::call_site(),
                "FormModel derive is only supported on structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let calmform = calmform_path();
    let mut keys = Vec::new();
    let mut inserts = Vec::new();
    let mut decodes = Vec::new();

    for field in named_fields {
        let Some(field_ident) = field.ident else {
            continue;
        };
        let field_name = field_ident.to_string();

        keys.push(quote! {
            #calmform::form::FieldKey::new(#field_name)
        });
        inserts.push(quote! {
            values.insert(
                #calmform::form::FieldKey::new(#field_name),
                #calmform::form::Value::from(::std::clone::Clone::clone(&self.#field_ident)),
            );
        });
        decodes.push(quote! {
            #field_ident: values.decode(#calmform::form::FieldKey::new(#field_name))?,
        });
    }

    quote! {
        impl #calmform::form::FormModel for #model_ident {
            fn field_keys() -> &'static [#calmform::form::FieldKey] {
                const KEYS: &[#calmform::form::FieldKey] = &[#(#keys),*];
                KEYS
            }

            fn to_values(&self) -> #calmform::form::ValueMap {
                let mut values = #calmform::form::ValueMap::new();
                #(#inserts)*
                values
            }

            fn from_values(
                values: &#calmform::form::ValueMap,
            ) -> #calmform::form::FormResult<Self> {
                ::std::result::Result::Ok(Self {
                    #(#decodes)*
                })
            }
        }
    }
    .into()
}

fn calmform_path() -> TokenStream2 {
    match crate_name("calmform") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::calmform),
    }
}
