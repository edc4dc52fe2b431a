//! `#[tokio_timeout_test]` for peer orchestration tests.
//!
//! Runs the async body on a fresh multi-thread runtime (signaling, event
//! delivery and channel writers each need a worker to make progress), routes
//! `tracing` output to the libtest writer, and fails the test if the body
//! does not finish in time. A stuck glare exchange shows up as a failure
//! instead of a hung test binary.
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test(secs = 5, workers = 4)]
//! async fn both_sides_converge() { /* ... */ }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, ItemFn, Lit, MetaNameValue, Token};

const DEFAULT_SECS: u64 = 10;
const DEFAULT_WORKERS: usize = 2;

struct Settings {
    secs: u64,
    workers: usize,
}

fn parse_settings(attr: TokenStream) -> syn::Result<Settings> {
    let mut settings = Settings {
        secs: DEFAULT_SECS,
        workers: DEFAULT_WORKERS,
    };
    if attr.is_empty() {
        return Ok(settings);
    }
    let args = Punctuated::<MetaNameValue, Token![,]>::parse_terminated.parse(attr)?;
    for arg in args {
        let value = match &arg.value {
            Expr::Lit(ExprLit {
                lit: Lit::Int(int), ..
            }) => int.clone(),
            other => return Err(syn::Error::new_spanned(other, "expected an integer literal")),
        };
        if arg.path.is_ident("secs") {
            settings.secs = value.base10_parse()?;
            if settings.secs == 0 {
                return Err(syn::Error::new_spanned(value, "timeout must be greater than zero"));
            }
        } else if arg.path.is_ident("workers") {
            settings.workers = value.base10_parse()?;
            if settings.workers == 0 {
                return Err(syn::Error::new_spanned(value, "need at least one worker"));
            }
        } else {
            return Err(syn::Error::new_spanned(&arg.path, "expected `secs` or `workers`"));
        }
    }
    Ok(settings)
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let settings = match parse_settings(attr) {
        Ok(settings) => settings,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = match syn::parse::<ItemFn>(item) {
        Ok(item) => item,
        Err(err) => return err.to_compile_error().into(),
    };

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let secs = settings.secs;
    let workers = settings.workers;

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
            let timeout_duration = std::time::Duration::from_secs(#secs);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(#workers)
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async move {
                if tokio::time::timeout(timeout_duration, async move #block)
                    .await
                    .is_err()
                {
                    panic!("test timed out after {}s", #secs);
                }
            });
            runtime.shutdown_timeout(std::time::Duration::from_millis(100));
        }
    })
}

fn is_test_attribute(attr: &Attribute) -> bool {
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
