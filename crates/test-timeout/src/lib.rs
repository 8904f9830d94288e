//! Test attributes that fail a test instead of letting it hang.
//!
//! `#[test_timeout::timeout]` wraps a synchronous test body and
//! `#[test_timeout::tokio_timeout_test]` wraps an async one in a
//! current-thread runtime. Both accept an optional limit in seconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Sync,
    Tokio,
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let limit = match parse_limit(attr) {
        Ok(limit) => limit,
        Err(err) => return err.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    expand(limit, item, Flavor::Sync).into()
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let limit = match parse_limit(attr) {
        Ok(limit) => limit,
        Err(err) => return err.to_compile_error().into(),
    };
    let item = parse_macro_input!(item as ItemFn);
    expand(limit, item, Flavor::Tokio).into()
}

fn parse_limit(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn expand(limit: u64, item: ItemFn, flavor: Flavor) -> TokenStream2 {
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = item;

    match (flavor, sig.asyncness.is_some()) {
        (Flavor::Sync, true) => {
            return syn::Error::new_spanned(
                &sig.ident,
                "use tokio_timeout_test for async test functions",
            )
            .to_compile_error();
        }
        (Flavor::Tokio, false) => {
            return syn::Error::new_spanned(
                &sig.ident,
                "tokio_timeout_test can only be applied to async functions",
            )
            .to_compile_error();
        }
        _ => {}
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_marker(attr))
        .collect();

    let body = match flavor {
        Flavor::Sync => quote! { #block },
        Flavor::Tokio => quote! {{
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(limit, async move #block)
                    .await
                    .expect("test timed out");
            });
        }},
    };

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let limit = std::time::Duration::from_secs(#limit);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #body));
                let _ = sender.send(outcome);
            });
            match receiver.recv_timeout(limit) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s", #limit)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited before reporting a result")
                }
            }
        }
    }
}

/// `#[test]` and `#[tokio::test]` would otherwise register the function twice.
fn is_test_marker(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
