mod utils;

use proc_macro::{TokenStream, TokenTree};

/// Runs an `async fn main` on a fresh `eventide::EventLoop`.
///
/// Accepts `virtual_time` to build the loop with the virtual clock.
///
/// ```rust,ignore
/// #[eventide::main]
/// async fn main() {
///     eventide::time::sleep(std::time::Duration::from_millis(10)).await;
/// }
/// ```
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, "", false)
}

/// Runs an `async fn` test on a fresh `eventide::EventLoop`.
///
/// Accepts `virtual_time`, which makes timer-driven tests deterministic
/// and instantaneous.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, ";", true)
}

fn expand(attr: TokenStream, item: TokenStream, terminator: &str, is_test: bool) -> TokenStream {
    let builder = match utils::loop_builder(attr) {
        Ok(builder) => builder,
        Err(message) => return utils::compile_error(&message),
    };

    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    if utils::rewrite_body(&mut tokens, &builder, terminator).is_none() {
        return utils::compile_error("expected an `async fn` with a body");
    }

    let mut result: Vec<TokenTree> = Vec::new();

    if is_test {
        let test_attr: TokenStream = "#[test]".parse().unwrap();
        result.extend(test_attr);
    }

    result.extend(tokens);
    result.into_iter().collect()
}
