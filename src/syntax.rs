//! Tokenizer capability and its syntect implementation
//!
//! The rest of the crate only sees [`Token`], the [`Tokenizer`] and
//! [`IncrementalTokenizer`] traits, and [`TokenizerFactory`]. Syntect is one
//! implementation; tests plug in scripted ones.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use syntect::easy::HighlightLines;
use syntect::highlighting::{
    FontStyle, HighlightIterator, HighlightState, Highlighter, Theme, ThemeSet,
};
use syntect::parsing::{ParseState, ScopeStack, SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use tracing::debug;

use crate::error::TokenizeError;
use crate::text::trim_cr;

/// Theme used when none is configured.
pub const DEFAULT_THEME: &str = "base16-ocean.dark";

/// Language key for unhighlighted text.
pub const PLAIN_TEXT: &str = "text";

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Self = Self {
        r: 0xff,
        g: 0xff,
        b: 0xff,
        a: 0xff,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenStyle {
    pub fg: Color,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Default for TokenStyle {
    fn default() -> Self {
        Self {
            fg: Color::WHITE,
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

/// A styled run of text. A token whose text is exactly `"\n"` ends a line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub style: TokenStyle,
}

impl Token {
    pub fn new(text: impl Into<String>, style: TokenStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    #[must_use]
    pub fn newline() -> Self {
        Self::new("\n", TokenStyle::default())
    }

    #[must_use]
    pub fn is_newline(&self) -> bool {
        self.text == "\n"
    }
}

/// A language/theme pair; the unit of the scheduler's warm cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Syntax token (`rust`, `py`) or a file path to resolve by extension.
    pub language: String,
    pub theme: String,
}

impl ResourceKey {
    pub fn new(language: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            theme: theme.into(),
        }
    }
}

/// Output of an incremental tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Token(Token),
    /// Retract this many tokens from the end of the current line.
    Recall(usize),
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Whole-text tokenization. Implementations cache loaded resources.
pub trait Tokenizer: Send {
    /// Load and cache a language/theme pair.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] if the language or theme is unknown.
    fn load(&mut self, key: &ResourceKey) -> Result<(), TokenizeError>;

    fn is_loaded(&self, key: &ResourceKey) -> bool;

    /// Tokenize `text` into one token list per line, newlines stripped.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] if the resources cannot be loaded or the
    /// grammar engine fails.
    fn tokenize(&mut self, text: &str, key: &ResourceKey) -> Result<Vec<Vec<Token>>, TokenizeError>;
}

/// Tokenization of text that arrives in chunks.
pub trait IncrementalTokenizer: Send {
    /// Consume a chunk. Tokens for the unterminated tail line are
    /// provisional and may be recalled by a later call.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] if the grammar engine fails.
    fn feed(&mut self, chunk: &str) -> Result<Vec<TokenEvent>, TokenizeError>;

    /// Settle the tail line at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] if the grammar engine fails.
    fn finish(&mut self) -> Result<Vec<TokenEvent>, TokenizeError>;
}

/// Creates one tokenizer per worker, and one incremental tokenizer per
/// open stream.
pub trait TokenizerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Tokenizer>;

    /// Start an incremental tokenizer for one stream.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] if `key` cannot be streamed. Factories
    /// without an incremental mode always fail.
    fn create_stream(
        &self,
        key: &ResourceKey,
    ) -> Result<Box<dyn IncrementalTokenizer>, TokenizeError> {
        Err(TokenizeError::Failed(format!(
            "no incremental tokenizer for {}",
            key.language
        )))
    }
}

impl<F> TokenizerFactory for F
where
    F: Fn() -> Box<dyn Tokenizer> + Send + Sync,
{
    fn create(&self) -> Box<dyn Tokenizer> {
        self()
    }
}

// ---------------------------------------------------------------------------
// Syntect
// ---------------------------------------------------------------------------

/// Shared syntax and theme definitions. Cloning is cheap.
#[derive(Clone)]
pub struct SyntectFactory {
    syntaxes: Arc<SyntaxSet>,
    themes: Arc<ThemeSet>,
}

impl SyntectFactory {
    /// Load syntect's bundled syntaxes and themes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            syntaxes: Arc::new(SyntaxSet::load_defaults_newlines()),
            themes: Arc::new(ThemeSet::load_defaults()),
        }
    }

    #[must_use]
    pub fn tokenizer(&self) -> SyntectTokenizer {
        SyntectTokenizer {
            syntaxes: Arc::clone(&self.syntaxes),
            themes: Arc::clone(&self.themes),
            loaded: HashMap::new(),
        }
    }

    /// Start an incremental tokenizer for one stream.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] if the language or theme is unknown.
    pub fn stream(&self, key: &ResourceKey) -> Result<SyntectStream, TokenizeError> {
        let syntax = resolve_syntax(&self.syntaxes, &key.language)?;
        let theme = resolve_theme(&self.themes, &key.theme)?;
        let highlighter = Highlighter::new(&theme);
        let highlight = HighlightState::new(&highlighter, ScopeStack::new());
        Ok(SyntectStream {
            syntaxes: Arc::clone(&self.syntaxes),
            parse: ParseState::new(syntax),
            highlight,
            theme,
            pending: String::new(),
            provisional: Vec::new(),
        })
    }

    /// Names of the bundled themes
    #[must_use]
    pub fn available_themes(&self) -> Vec<&str> {
        self.themes.themes.keys().map(String::as_str).collect()
    }
}

impl Default for SyntectFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenizerFactory for SyntectFactory {
    fn create(&self) -> Box<dyn Tokenizer> {
        Box::new(self.tokenizer())
    }

    fn create_stream(
        &self,
        key: &ResourceKey,
    ) -> Result<Box<dyn IncrementalTokenizer>, TokenizeError> {
        Ok(Box::new(self.stream(key)?))
    }
}

struct Loaded {
    syntax_name: String,
    theme: Theme,
}

/// Whole-text syntect tokenizer with a per-instance resource cache.
pub struct SyntectTokenizer {
    syntaxes: Arc<SyntaxSet>,
    themes: Arc<ThemeSet>,
    loaded: HashMap<ResourceKey, Loaded>,
}

impl Tokenizer for SyntectTokenizer {
    fn load(&mut self, key: &ResourceKey) -> Result<(), TokenizeError> {
        if self.loaded.contains_key(key) {
            return Ok(());
        }
        let syntax_name = resolve_syntax(&self.syntaxes, &key.language)?.name.clone();
        let theme = resolve_theme(&self.themes, &key.theme)?;
        debug!(language = %key.language, theme = %key.theme, %syntax_name, "loaded resources");
        self.loaded.insert(key.clone(), Loaded { syntax_name, theme });
        Ok(())
    }

    fn is_loaded(&self, key: &ResourceKey) -> bool {
        self.loaded.contains_key(key)
    }

    fn tokenize(&mut self, text: &str, key: &ResourceKey) -> Result<Vec<Vec<Token>>, TokenizeError> {
        self.load(key)?;
        let loaded = self
            .loaded
            .get(key)
            .ok_or_else(|| TokenizeError::Failed(format!("resources for {} vanished", key.language)))?;
        let syntax = self
            .syntaxes
            .find_syntax_by_name(&loaded.syntax_name)
            .ok_or_else(|| TokenizeError::UnknownLanguage(loaded.syntax_name.clone()))?;

        let mut highlighter = HighlightLines::new(syntax, &loaded.theme);
        LinesWithEndings::from(text)
            .map(|line| -> Result<Vec<Token>, TokenizeError> {
                let ranges = highlighter
                    .highlight_line(line, &self.syntaxes)
                    .map_err(|err| TokenizeError::Failed(err.to_string()))?;
                Ok(ranges
                    .into_iter()
                    .filter_map(|(style, text)| to_token(style, text))
                    .collect())
            })
            .collect()
    }
}

/// Incremental syntect tokenizer.
///
/// Complete lines advance the committed parser state. The unterminated tail
/// is highlighted from a clone of that state; when more text arrives, the
/// tail is re-highlighted and the tokens that changed are recalled.
pub struct SyntectStream {
    syntaxes: Arc<SyntaxSet>,
    parse: ParseState,
    highlight: HighlightState,
    theme: Theme,
    pending: String,
    /// Tokens already emitted for `pending`.
    provisional: Vec<Token>,
}

impl SyntectStream {
    fn highlight_line(
        &self,
        line: &str,
        parse: &mut ParseState,
        state: &mut HighlightState,
    ) -> Result<Vec<Token>, TokenizeError> {
        let ops = parse
            .parse_line(line, &self.syntaxes)
            .map_err(|err| TokenizeError::Failed(err.to_string()))?;
        let highlighter = Highlighter::new(&self.theme);
        Ok(HighlightIterator::new(state, &ops, line, &highlighter)
            .filter_map(|(style, text)| to_token(style, text))
            .collect())
    }

    /// Emit the difference between what was shown for the tail and `tokens`.
    fn reconcile(&mut self, tokens: Vec<Token>, events: &mut Vec<TokenEvent>) {
        let common = self
            .provisional
            .iter()
            .zip(&tokens)
            .take_while(|(shown, fresh)| shown == fresh)
            .count();
        let stale = self.provisional.len() - common;
        if stale > 0 {
            events.push(TokenEvent::Recall(stale));
        }
        events.extend(tokens[common..].iter().cloned().map(TokenEvent::Token));
        self.provisional = tokens;
    }
}

impl IncrementalTokenizer for SyntectStream {
    fn feed(&mut self, chunk: &str) -> Result<Vec<TokenEvent>, TokenizeError> {
        self.pending.push_str(chunk);
        let mut events = Vec::new();

        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            let mut parse = self.parse.clone();
            let mut state = self.highlight.clone();
            let tokens = self.highlight_line(&line, &mut parse, &mut state)?;
            self.parse = parse;
            self.highlight = state;
            self.reconcile(tokens, &mut events);
            events.push(TokenEvent::Token(Token::newline()));
            self.provisional.clear();
        }

        if !self.pending.is_empty() {
            let line = self.pending.clone();
            let mut parse = self.parse.clone();
            let mut state = self.highlight.clone();
            let tokens = self.highlight_line(&line, &mut parse, &mut state)?;
            self.reconcile(tokens, &mut events);
        }
        Ok(events)
    }

    fn finish(&mut self) -> Result<Vec<TokenEvent>, TokenizeError> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let mut parse = self.parse.clone();
            let mut state = self.highlight.clone();
            let tokens = self.highlight_line(&line, &mut parse, &mut state)?;
            self.parse = parse;
            self.highlight = state;
            self.reconcile(tokens, &mut events);
        }
        self.provisional.clear();
        Ok(events)
    }
}

fn to_token(style: syntect::highlighting::Style, text: &str) -> Option<Token> {
    let text = text.strip_suffix('\n').map_or(text, trim_cr);
    if text.is_empty() {
        return None;
    }
    let fg = style.foreground;
    Some(Token::new(
        text,
        TokenStyle {
            fg: Color {
                r: fg.r,
                g: fg.g,
                b: fg.b,
                a: fg.a,
            },
            bold: style.font_style.contains(FontStyle::BOLD),
            italic: style.font_style.contains(FontStyle::ITALIC),
            underline: style.font_style.contains(FontStyle::UNDERLINE),
        },
    ))
}

fn resolve_theme(themes: &ThemeSet, name: &str) -> Result<Theme, TokenizeError> {
    themes
        .themes
        .get(name)
        .cloned()
        .ok_or_else(|| TokenizeError::UnknownTheme(name.to_string()))
}

/// Resolve a syntax by token, then by path, then the plain-text aliases.
fn resolve_syntax<'a>(
    syntaxes: &'a SyntaxSet,
    language: &str,
) -> Result<&'a SyntaxReference, TokenizeError> {
    if matches!(language, "" | PLAIN_TEXT | "plain" | "txt") {
        return Ok(syntaxes.find_syntax_plain_text());
    }
    syntaxes
        .find_syntax_by_token(language)
        .or_else(|| syntax_for_path(syntaxes, language))
        .ok_or_else(|| TokenizeError::UnknownLanguage(language.to_string()))
}

/// Get syntax reference for a file path (by extension)
fn syntax_for_path<'a>(syntaxes: &'a SyntaxSet, path: &str) -> Option<&'a SyntaxReference> {
    let path = Path::new(path);

    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if let Some(syntax) = syntaxes.find_syntax_by_extension(ext) {
            return Some(syntax);
        }
    }

    // Try by filename (for things like Makefile, Dockerfile)
    match path.file_name().and_then(|n| n.to_str())? {
        "Makefile" | "makefile" | "GNUmakefile" => syntaxes.find_syntax_by_extension("make"),
        "Dockerfile" => syntaxes.find_syntax_by_extension("dockerfile"),
        "Cargo.lock" => syntaxes.find_syntax_by_extension("toml"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rust() -> ResourceKey {
        ResourceKey::new("rs", DEFAULT_THEME)
    }

    /// Apply stream events the way a line buffer would.
    fn replay(events: &[TokenEvent]) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::new();
        for event in events {
            match event {
                TokenEvent::Token(token) => out.push(token.clone()),
                TokenEvent::Recall(n) => out.truncate(out.len() - n),
            }
        }
        out
    }

    #[test]
    fn test_tokenize_rust() {
        let mut tokenizer = SyntectFactory::new().tokenizer();
        let lines = tokenizer
            .tokenize("fn main() {\n}\n", &rust())
            .expect("rust is bundled");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].len() > 1);
        let text: String = lines[0].iter().map(|t| t.text.as_str()).collect();
        assert_eq!(text, "fn main() {");
        assert!(tokenizer.is_loaded(&rust()));
    }

    #[test]
    fn test_language_from_path() {
        let factory = SyntectFactory::new();
        assert!(factory.available_themes().contains(&DEFAULT_THEME));
        let mut tokenizer = factory.tokenizer();
        assert!(tokenizer.load(&ResourceKey::new("src/main.py", DEFAULT_THEME)).is_ok());
        assert!(tokenizer.load(&ResourceKey::new(PLAIN_TEXT, DEFAULT_THEME)).is_ok());
    }

    #[test]
    fn test_unknown_resources() {
        let mut tokenizer = SyntectFactory::new().tokenizer();
        assert_eq!(
            tokenizer.load(&ResourceKey::new("no-such-language", DEFAULT_THEME)),
            Err(TokenizeError::UnknownLanguage("no-such-language".into()))
        );
        assert_eq!(
            tokenizer.load(&ResourceKey::new("rs", "no-such-theme")),
            Err(TokenizeError::UnknownTheme("no-such-theme".into()))
        );
    }

    #[test]
    fn test_stream_matches_whole_text() {
        let factory = SyntectFactory::new();
        let text = "let s = \"hello\";\nfn main() { /* open\n still comment */ }\nlet tail = 42";
        let whole = factory.tokenizer().tokenize(text, &rust()).expect("tokenize");

        let mut expected = Vec::new();
        for (idx, line) in whole.iter().enumerate() {
            if idx > 0 {
                expected.push(Token::newline());
            }
            expected.extend(line.iter().cloned());
        }

        let mut stream = factory.stream(&rust()).expect("stream");
        let mut events = Vec::new();
        let bytes = text.as_bytes();
        for piece in bytes.chunks(5) {
            let chunk = std::str::from_utf8(piece).expect("ascii input");
            events.extend(stream.feed(chunk).expect("feed"));
        }
        events.extend(stream.finish().expect("finish"));

        assert_eq!(replay(&events), expected);
    }

    #[test]
    fn test_stream_recalls_changed_tail() {
        let factory = SyntectFactory::new();
        let mut stream = factory.stream(&rust()).expect("stream");
        let first = stream.feed("let x = 1").expect("feed");
        assert!(!first.is_empty());
        let more = stream.feed("23 // comment").expect("feed");
        assert!(
            more.iter().any(|e| matches!(e, TokenEvent::Recall(_))),
            "literal grows, so its token is recalled: {more:?}"
        );
    }
}
