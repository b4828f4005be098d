//! Attribute macros that run an `async fn` on the `core_async` runtime.
//!
//! `#[core_async::test]` turns an async test into a plain `#[test]` and
//! `#[core_async::main]` does the same for a binary entry point. Both drive
//! the body with `core_async::runtime::block_on`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, EntryKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, EntryKind::Main)
}

#[derive(Clone, Copy)]
enum EntryKind {
    Test,
    Main,
}

fn expand(attr: TokenStream, item: TokenStream, kind: EntryKind) -> TokenStream {
    if !attr.is_empty() {
        let tokens = TokenStream2::from(attr);
        return syn::Error::new_spanned(tokens, "core_async entry macros take no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async entry macros require an `async fn`",
        )
        .to_compile_error()
        .into();
    }

    if matches!(kind, EntryKind::Main) && input.sig.ident != "main" {
        return syn::Error::new_spanned(
            &input.sig.ident,
            "#[core_async::main] can only be applied to `fn main`",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = input;
    sig.asyncness = None;

    let test_attr = match kind {
        EntryKind::Test => quote!(#[test]),
        EntryKind::Main => TokenStream2::new(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sig {
            core_async::runtime::block_on(async move #block)
        }
    }
    .into()
}
