use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Each argument is returned as a `Vec<TokenTree>`.
/// Commas at the top level are used as separators.
pub(crate) fn split_args(input: TokenStream) -> Vec<Vec<TokenTree>> {
    let mut args = Vec::new();
    let mut current = Vec::new();

    for token in input {
        match &token {
            TokenTree::Punct(p) if p.as_char() == ',' => {
                if !current.is_empty() {
                    args.push(current);
                    current = Vec::new();
                }
            }
            _ => current.push(token),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Builds the `EventLoop` construction expression from the attribute
/// arguments.
///
/// The only accepted argument is `virtual_time`.
pub(crate) fn loop_builder(attr: TokenStream) -> Result<String, String> {
    let mut builder = String::from("::eventide::EventLoop::builder()");

    for arg in split_args(attr) {
        match arg.as_slice() {
            [TokenTree::Ident(id)] if id.to_string() == "virtual_time" => {
                builder.push_str(".virtual_clock()");
            }
            _ => {
                let text = arg.iter().map(|t| t.to_string()).collect::<String>();
                return Err(format!("unknown eventide attribute argument `{text}`"));
            }
        }
    }

    builder.push_str(".build()");
    Ok(builder)
}

/// Rewrites an `async fn` so that its body runs on a fresh event loop.
///
/// Returns `None` if the item has no body.
pub(crate) fn rewrite_body(
    tokens: &mut Vec<TokenTree>,
    builder: &str,
    terminator: &str,
) -> Option<()> {
    if let Some(async_pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    {
        tokens.remove(async_pos);
    }

    let pos = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))?;

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => return None,
    };

    let new_block = format!(
        "{{
            let event_loop = {builder};
            event_loop
                .block_on(async move {{
                    {block}
                }}){terminator}
        }}"
    );

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, new_block.parse().ok()?));

    Some(())
}

pub(crate) fn compile_error(message: &str) -> TokenStream {
    format!("compile_error!({message:?});").parse().unwrap()
}
