//! Low-level markup token scanner shared by the legalizer and the codec.
//!
//! The scanner is quote-aware (tag characters inside quoted attribute values
//! are not structural) and total: input that ends mid-token yields a
//! [`Truncated`] item instead of panicking or looping.

use std::ops::Range;

/// Tags recognized as transparent document wrappers.
const WRAPPER_TAGS: [&str; 4] = ["scene", "doc", "root", "diagram"];

#[must_use]
pub(crate) fn is_wrapper(name: &str) -> bool {
    WRAPPER_TAGS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawToken<'a> {
    Open {
        name: &'a str,
        attrs: Vec<(&'a str, &'a str)>,
        self_closing: bool,
    },
    Close {
        name: &'a str,
    },
    Text {
        text: &'a str,
    },
    Comment,
    /// Processing instruction or `<!…>` declaration.
    Instruction,
}

/// Input ended inside a token starting at byte `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Truncated {
    pub at: usize,
}

pub(crate) struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn truncated(&mut self, at: usize) -> Option<Result<(RawToken<'a>, Range<usize>), Truncated>> {
        self.pos = self.src.len();
        Some(Err(Truncated { at }))
    }

    fn scan_open(&mut self, start: usize) -> Option<Result<(RawToken<'a>, Range<usize>), Truncated>> {
        let bytes = self.src.as_bytes();
        let len = bytes.len();
        let mut pos = start + 1;
        let name_start = pos;
        while pos < len && is_name_byte(bytes[pos]) {
            pos += 1;
        }
        if pos == name_start {
            // A lone '<' with no tag name following: plain text.
            self.pos = start + 1;
            return Some(Ok((
                RawToken::Text {
                    text: &self.src[start..=start],
                },
                start..start + 1,
            )));
        }
        let name = &self.src[name_start..pos];
        let mut attrs: Vec<(&'a str, &'a str)> = Vec::new();

        loop {
            while pos < len && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos >= len {
                return self.truncated(start);
            }
            match bytes[pos] {
                b'>' => {
                    let end = pos + 1;
                    self.pos = end;
                    return Some(Ok((
                        RawToken::Open {
                            name,
                            attrs,
                            self_closing: false,
                        },
                        start..end,
                    )));
                }
                b'/' => {
                    if pos + 1 < len && bytes[pos + 1] == b'>' {
                        let end = pos + 2;
                        self.pos = end;
                        return Some(Ok((
                            RawToken::Open {
                                name,
                                attrs,
                                self_closing: true,
                            },
                            start..end,
                        )));
                    }
                    if pos + 1 >= len {
                        return self.truncated(start);
                    }
                    // Stray slash inside a tag; skip it.
                    pos += 1;
                }
                _ => {
                    let attr_start = pos;
                    while pos < len
                        && !bytes[pos].is_ascii_whitespace()
                        && !matches!(bytes[pos], b'=' | b'>' | b'/')
                    {
                        pos += 1;
                    }
                    let attr_name = &self.src[attr_start..pos];
                    while pos < len && bytes[pos].is_ascii_whitespace() {
                        pos += 1;
                    }
                    if pos < len && bytes[pos] == b'=' {
                        pos += 1;
                        while pos < len && bytes[pos].is_ascii_whitespace() {
                            pos += 1;
                        }
                        if pos >= len {
                            return self.truncated(start);
                        }
                        let quote = bytes[pos];
                        if quote == b'"' || quote == b'\'' {
                            pos += 1;
                            let value_start = pos;
                            while pos < len && bytes[pos] != quote {
                                pos += 1;
                            }
                            if pos >= len {
                                return self.truncated(start);
                            }
                            attrs.push((attr_name, &self.src[value_start..pos]));
                            pos += 1;
                        } else {
                            let value_start = pos;
                            while pos < len
                                && !bytes[pos].is_ascii_whitespace()
                                && !matches!(bytes[pos], b'>' | b'/')
                            {
                                pos += 1;
                            }
                            attrs.push((attr_name, &self.src[value_start..pos]));
                        }
                    } else {
                        attrs.push((attr_name, ""));
                    }
                }
            }
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<(RawToken<'a>, Range<usize>), Truncated>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.src.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.src[start..];

        if !rest.starts_with('<') {
            let end = rest.find('<').map_or(self.src.len(), |i| start + i);
            self.pos = end;
            return Some(Ok((
                RawToken::Text {
                    text: &self.src[start..end],
                },
                start..end,
            )));
        }
        if rest.starts_with("<!--") {
            return match rest.find("-->") {
                Some(i) => {
                    let end = start + i + 3;
                    self.pos = end;
                    Some(Ok((RawToken::Comment, start..end)))
                }
                None => self.truncated(start),
            };
        }
        if rest.starts_with("<?") || rest.starts_with("<!") {
            return match rest.find('>') {
                Some(i) => {
                    let end = start + i + 1;
                    self.pos = end;
                    Some(Ok((RawToken::Instruction, start..end)))
                }
                None => self.truncated(start),
            };
        }
        if let Some(body) = rest.strip_prefix("</") {
            return match body.find('>') {
                Some(i) => {
                    let name = body[..i].trim();
                    let end = start + 2 + i + 1;
                    self.pos = end;
                    Some(Ok((RawToken::Close { name }, start..end)))
                }
                None => self.truncated(start),
            };
        }
        self.scan_open(start)
    }
}

const fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b':' | b'.')
}
