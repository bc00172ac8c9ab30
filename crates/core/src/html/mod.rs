// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A streaming HTML tokenizer that emits a tagged event stream instead of
//! driving callbacks on a parser subclass. Built on html5ever's low-level
//! tokenizer so we never pay for a DOM tree we don't need.

use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use html5ever::tendril::StrTendril;

/// Tags whose character data must never be surfaced as page content.
/// Verbatim from the original crawler's disallowed-tag list: form
/// controls, frame family, image family, media family, style/link,
/// meta/base, and the programming tags.
const DISALLOWED_TAGS: &[&str] = &[
    "title", "input", "textarea", "button", "select", "optgroup", "option", "fieldset",
    "output", "keygen", "datalist", "frame", "frameset", "noframes", "iframe", "img", "map",
    "area", "canvas", "figcaption", "figure", "audio", "source", "track", "video", "style",
    "link", "meta", "base", "script", "noscript", "applet", "embed", "object", "param",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `<a href=...>`
    Url(String),
    /// `<img src=...>`, consumed only when image download is enabled.
    Image(String),
    /// `<meta name=N content=C>`, emitted only when both attributes exist.
    MetaPair(String, String),
    /// Character data with `title` as the innermost open tag.
    Title(String),
    /// Character data whose innermost open tag is not in the disallowed set.
    Content(String),
}

/// Consumes the event stream produced by [`HTMLTokenizer::run`]. Each caller
/// (`CrawlerWorker`, `IndexerWorker`) owns its own accumulator and implements
/// this trait instead of subclassing a parser.
pub trait Sink {
    fn emit(&mut self, event: Event);
}

struct InnerSink<'a, S: Sink> {
    sink: &'a mut S,
    tag_stack: Vec<String>,
}

impl<'a, S: Sink> InnerSink<'a, S> {
    fn attr(tag: &Tag, name: &str) -> Option<String> {
        tag.attrs
            .iter()
            .find(|a| a.name.local.as_ref() == name)
            .map(|a| a.value.to_string())
    }
}

impl<'a, S: Sink> TokenSink for InnerSink<'a, S> {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<Self::Handle> {
        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => {
                    let name = tag.name.as_ref().to_string();

                    match name.as_str() {
                        "a" => {
                            if let Some(href) = Self::attr(&tag, "href") {
                                self.sink.emit(Event::Url(href));
                            }
                        }
                        "img" => {
                            if let Some(src) = Self::attr(&tag, "src") {
                                self.sink.emit(Event::Image(src));
                            }
                        }
                        "meta" => {
                            if let (Some(n), Some(c)) =
                                (Self::attr(&tag, "name"), Self::attr(&tag, "content"))
                            {
                                self.sink.emit(Event::MetaPair(n, c));
                            }
                        }
                        _ => {}
                    }

                    if !tag.self_closing {
                        self.tag_stack.push(name);
                    }
                }
                TagKind::EndTag => {
                    let name = tag.name.as_ref();
                    // best-effort recovery: drop back to the last matching
                    // open tag instead of failing on unbalanced markup.
                    if let Some(pos) = self.tag_stack.iter().rposition(|t| t == name) {
                        self.tag_stack.truncate(pos);
                    }
                }
            },
            Token::CharacterTokens(text) => {
                let Some(top) = self.tag_stack.last() else {
                    return TokenSinkResult::Continue;
                };

                if top == "title" {
                    self.sink.emit(Event::Title(text.to_string()));
                } else if !DISALLOWED_TAGS.iter().any(|t| *t == top.as_str()) {
                    self.sink.emit(Event::Content(text.to_string()));
                }
            }
            _ => {}
        }

        TokenSinkResult::Continue
    }
}

pub struct HTMLTokenizer;

impl HTMLTokenizer {
    /// Decoding failure (non-UTF-8 input) is fatal to this document, not to
    /// the worker; malformed markup is recovered from by html5ever's own
    /// tokenizer-level error handling plus our tag-stack recovery above.
    pub fn run(bytes: &[u8], sink: &mut impl Sink) -> crate::Result<()> {
        let text = std::str::from_utf8(bytes).map_err(|_| crate::Error::Parse)?;

        let inner = InnerSink {
            sink,
            tag_stack: Vec::new(),
        };

        let mut tokenizer = Tokenizer::new(inner, TokenizerOpts::default());
        let mut queue = BufferQueue::default();
        queue.push_back(StrTendril::from(text));

        let _ = tokenizer.feed(&mut queue);
        tokenizer.end();

        Ok(())
    }
}
