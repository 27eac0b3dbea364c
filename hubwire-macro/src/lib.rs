//! # hubwire procedural macros
//!
//! ## `#[service]`
//!
//! Turns a trait into an RPC contract. For a trait `Calculator` it generates:
//! - the trait itself, with every `async fn` rewritten to return a `Send`
//!   future so it can be served from spawned tasks
//! - `CalculatorService<T>`, wrapping any `T: Calculator` as a
//!   `hubwire::Service` whose method table decodes arguments and encodes
//!   results
//! - `CalculatorClient<C>`, a `hubwire::Interface` that implements
//!   `Calculator` by sending requests through a router
//!
//! ```rust,ignore
//! #[hubwire::service]
//! pub trait Calculator {
//!     async fn add(&self, a: i32, b: i32) -> hubwire::Result<i32>;
//! }
//! ```
//!
//! Every method must be `async`, take `&self`, bind its parameters to plain
//! identifiers and declare a `hubwire::Result<T>` return type. Reference
//! parameters (`&str`, `&[u8]`, `&T`) are decoded into their owned form on the
//! server side.

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    FnArg, ItemTrait, Pat, ReturnType, TraitItem, TraitItemFn, Type, parse_macro_input,
    spanned::Spanned,
};

struct Param {
    ident: syn::Ident,
    ty: Type,
}

struct ParsedMethod {
    ident: syn::Ident,
    params: Vec<Param>,
    output: Type,
}

fn parse_method(method: &TraitItemFn) -> syn::Result<ParsedMethod> {
    let sig = &method.sig;
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(
            sig.fn_token.span(),
            "service methods must be `async fn`",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "service methods cannot be generic",
        ));
    }
    match sig.receiver() {
        Some(receiver) if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new(
                sig.span(),
                "service methods must take `&self`",
            ));
        }
    }
    let ReturnType::Type(_, output) = &sig.output else {
        return Err(syn::Error::new(
            sig.span(),
            "service methods must return `hubwire::Result<T>`",
        ));
    };

    let mut params = vec![];
    for input in sig.inputs.iter().skip(1) {
        let FnArg::Typed(pat_type) = input else {
            return Err(syn::Error::new(input.span(), "unexpected receiver"));
        };
        let Pat::Ident(pat) = pat_type.pat.as_ref() else {
            return Err(syn::Error::new(
                pat_type.pat.span(),
                "service parameters must be plain identifiers",
            ));
        };
        params.push(Param {
            ident: pat.ident.clone(),
            ty: pat_type.ty.as_ref().clone(),
        });
    }

    Ok(ParsedMethod {
        ident: sig.ident.clone(),
        params,
        output: output.as_ref().clone(),
    })
}

/// Rewrites `async fn f(..) -> R` into `fn f(..) -> impl Future<Output = R> + Send`.
fn desugar(method: &TraitItemFn) -> proc_macro2::TokenStream {
    let mut method = method.clone();
    let output = match &method.sig.output {
        ReturnType::Type(_, ty) => ty.as_ref().clone(),
        ReturnType::Default => syn::parse_quote!(()),
    };
    method.sig.asyncness = None;
    method.sig.output = syn::parse_quote! {
        -> impl ::std::future::Future<Output = #output> + ::std::marker::Send
    };
    if let Some(block) = method.default.take() {
        method.default = Some(syn::parse_quote!({ async move #block }));
    }
    quote! { #method }
}

/// Procedural macro for defining RPC services.
///
/// # Example
///
/// ```rust,ignore
/// #[hubwire::service]
/// pub trait Echo {
///     async fn echo(&self, text: &str) -> hubwire::Result<String>;
/// }
/// ```
#[proc_macro_attribute]
pub fn service(_attr: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as ItemTrait);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &ItemTrait) -> syn::Result<proc_macro2::TokenStream> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "service traits cannot be generic",
        ));
    }

    let krate = get_crate_name();
    let trait_ident = &input.ident;
    let trait_name = trait_ident.to_string();
    let visibility = &input.vis;
    let attrs = &input.attrs;
    let service_ident = format_ident!("{}Service", trait_ident);
    let client_ident = format_ident!("{}Client", trait_ident);
    let client_name = client_ident.to_string();

    let mut trait_items = vec![];
    let mut entries = vec![];
    let mut client_methods = vec![];

    for item in &input.items {
        let TraitItem::Fn(method) = item else {
            return Err(syn::Error::new(
                item.span(),
                "service traits may only contain methods",
            ));
        };
        let parsed = parse_method(method)?;
        trait_items.push(desugar(method));

        let method_ident = &parsed.ident;
        let method_name = method_ident.to_string();
        let arity = parsed.params.len();
        let output = &parsed.output;
        let sig_inputs = &method.sig.inputs;
        let args_mut = if parsed.params.is_empty() {
            quote! {}
        } else {
            quote! { mut }
        };

        let mut decodes = vec![];
        let mut call_args = vec![];
        let mut pushes = vec![];
        for Param { ident, ty } in &parsed.params {
            if let Type::Reference(reference) = ty {
                let elem = &reference.elem;
                decodes.push(quote! {
                    let #ident: <#elem as ::std::borrow::ToOwned>::Owned = __hubwire_args.next()?;
                });
                call_args.push(quote! { ::std::borrow::Borrow::borrow(&#ident) });
            } else {
                decodes.push(quote! { let #ident: #ty = __hubwire_args.next()?; });
                call_args.push(quote! { #ident });
            }
            pushes.push(quote! { __hubwire_args.push(&#ident)?; });
        }

        entries.push(quote! {
            {
                let __hubwire_this = self.0.clone();
                let __hubwire_method = move |#args_mut __hubwire_args: #krate::Arguments<C>| {
                    let __hubwire_this = __hubwire_this.clone();
                    async move {
                        #(#decodes)*
                        let __hubwire_result = <T as #trait_ident>::#method_ident(
                            &*__hubwire_this,
                            #(#call_args),*
                        )
                        .await?;
                        let __hubwire_value = __hubwire_args.reply(&__hubwire_result)?;
                        #krate::Result::<C::Value>::Ok(__hubwire_value)
                    }
                };
                #krate::MethodEntry::new(#method_name, #arity, __hubwire_method)
            }
        });

        client_methods.push(quote! {
            async fn #method_ident(#sig_inputs) -> #output {
                let #args_mut __hubwire_args = self.0.arguments();
                #(#pushes)*
                self.0.request(#method_name, __hubwire_args).await
            }
        });
    }

    let service_doc =
        format!("Serves any [`{trait_name}`] implementation as the `{trait_name}` hub.");
    let client_doc = format!("Calls a remote `{trait_name}` hub through a router.");

    Ok(quote! {
        #(#attrs)*
        #visibility trait #trait_ident {
            #(#trait_items)*
        }

        #[doc = #service_doc]
        #visibility struct #service_ident<T>(::std::sync::Arc<T>);

        impl<T> #service_ident<T> {
            pub fn new(inner: T) -> Self {
                Self(::std::sync::Arc::new(inner))
            }

            pub fn from_arc(inner: ::std::sync::Arc<T>) -> Self {
                Self(inner)
            }
        }

        impl<C, T> #krate::Service<C> for #service_ident<T>
        where
            C: #krate::Codec,
            T: #trait_ident + ::std::marker::Send + ::std::marker::Sync + 'static,
        {
            fn name(&self) -> &str {
                #trait_name
            }

            fn methods(&self) -> ::std::vec::Vec<#krate::MethodEntry<C>> {
                ::std::vec![#(#entries),*]
            }
        }

        #[doc = #client_doc]
        #visibility struct #client_ident<C: #krate::Codec>(#krate::Client<C>);

        impl<C: #krate::Codec> ::std::clone::Clone for #client_ident<C> {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }

        impl<C: #krate::Codec> ::std::fmt::Debug for #client_ident<C> {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_tuple(#client_name).field(&self.0).finish()
            }
        }

        impl<C: #krate::Codec> #client_ident<C> {
            pub fn client(&self) -> &#krate::Client<C> {
                &self.0
            }
        }

        impl<C: #krate::Codec> #krate::Interface<C> for #client_ident<C> {
            const NAME: &'static str = #trait_name;

            fn bind(client: #krate::Client<C>) -> Self {
                Self(client)
            }
        }

        impl<C: #krate::Codec> #trait_ident for #client_ident<C> {
            #(#client_methods)*
        }
    })
}

/// Path of the runtime crate as seen from the expansion site.
///
/// Inside the `hubwire` package itself (its unit and integration tests) the
/// crate is reachable as `::hubwire` through `extern crate self as hubwire`.
pub(crate) fn get_crate_name() -> proc_macro2::TokenStream {
    match proc_macro_crate::crate_name("hubwire") {
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote! { ::#ident }
        }
        _ => quote! { ::hubwire },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand() {
        let input: ItemTrait = syn::parse_quote! {
            pub trait Counter {
                async fn reset(&self) -> hubwire::Result<()>;
                async fn add(&self, value: i64) -> hubwire::Result<i64>;
            }
        };
        let output = expand(&input).unwrap().to_string();
        assert_eq!(output.matches("mut __hubwire_args").count(), 2);
        assert!(output.contains("Debug for CounterClient"));
        assert!(output.contains("struct CounterService"));
    }

    #[test]
    fn test_reject_sync_method() {
        let input: ItemTrait = syn::parse_quote! {
            pub trait Counter {
                fn reset(&self) -> hubwire::Result<()>;
            }
        };
        let err = expand(&input).unwrap_err();
        assert!(err.to_string().contains("async fn"));
    }
}
