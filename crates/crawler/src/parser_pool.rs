//
// parser_pool.rs
//
// Thread-local parser pool for efficient parser reuse
//

use std::cell::RefCell;
use tree_sitter::Parser;

thread_local! {
    static PARSER: RefCell<Option<Parser>> = RefCell::new({
        let mut parser = Parser::new();
        match parser.set_language(&tree_sitter_c_sharp::LANGUAGE.into()) {
            Ok(()) => Some(parser),
            Err(e) => {
                log::error!("Failed to set C# language: {}", e);
                None
            }
        }
    });
}

/// Execute a function with a thread-local C# parser instance.
/// The parser is reused across calls on the same thread; `None` is returned
/// when the grammar could not be loaded.
pub fn with_parser<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut Parser) -> R,
{
    PARSER.with(|parser| parser.borrow_mut().as_mut().map(f))
}

/// Parse C# source with the pooled parser
pub fn parse(text: &str) -> Option<tree_sitter::Tree> {
    with_parser(|parser| parser.parse(text, None)).flatten()
}
