//! Hand-written scanner for the `ark_main` dialect.
//!
//! Works on byte offsets of the original text and skips `//` and `/* */`
//! comments, so braces or identifiers inside comments never count.

use anyhow::{Result, anyhow, bail};

pub const ENTRY_NAME: &str = "ark_main";
pub const ENTRY_RETURN_TYPE: &str = "vec4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    pub fn keyword(self) -> &'static str {
        match self {
            ParameterDirection::In => "in",
            ParameterDirection::Out => "out",
            ParameterDirection::InOut => "inout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub direction: ParameterDirection,
    pub ty: String,
    pub name: String,
}

/// Location of `vec4 ark_main(...) { ... }` inside a source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySpan {
    /// Offset of the `vec4` return type.
    pub start: usize,
    /// Offset one past the closing brace.
    pub end: usize,
    pub params: String,
    pub body: String,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

pub fn is_identifier(text: &str) -> bool {
    let bytes = text.as_bytes();
    !bytes.is_empty() && !bytes[0].is_ascii_digit() && bytes.iter().all(|&b| is_ident_byte(b))
}

/// Marks every byte that sits inside a comment.
fn comment_mask(source: &str) -> Vec<bool> {
    let bytes = source.as_bytes();
    let mut mask = vec![false; bytes.len()];
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                mask[i] = true;
                i += 1;
            }
        } else if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            mask[i] = true;
            mask[i + 1] = true;
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/') {
                mask[i] = true;
                i += 1;
            }
            for j in i..(i + 2).min(bytes.len()) {
                mask[j] = true;
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    mask
}

fn skip_whitespace(bytes: &[u8], mut i: usize, mask: &[bool]) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_whitespace() || mask[i]) {
        i += 1;
    }
    i
}

/// Finds the byte matching the opener at `open`, honouring nesting.
fn matching_close(bytes: &[u8], open: usize, mask: &[bool]) -> Option<usize> {
    let (opener, closer) = match bytes[open] {
        b'(' => (b'(', b')'),
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0_usize;
    for i in open..bytes.len() {
        if mask[i] {
            continue;
        }
        if bytes[i] == opener {
            depth += 1;
        } else if bytes[i] == closer {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Offsets of whole-token occurrences of `ident` outside comments.
fn identifier_offsets(source: &str, ident: &str, mask: &[bool]) -> Vec<usize> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(found) = source[from..].find(ident) {
        let at = from + found;
        let end = at + ident.len();
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok && !mask[at] {
            out.push(at);
        }
        from = end;
    }
    out
}

/// The identifier ending right before `end` (skipping whitespace), if any.
fn previous_token<'a>(source: &'a str, end: usize, mask: &[bool]) -> Option<(usize, &'a str)> {
    let bytes = source.as_bytes();
    let mut i = end;
    while i > 0 && (bytes[i - 1].is_ascii_whitespace() || mask[i - 1]) {
        i -= 1;
    }
    let token_end = i;
    while i > 0 && is_ident_byte(bytes[i - 1]) {
        i -= 1;
    }
    (i < token_end).then(|| (i, &source[i..token_end]))
}

/// Locates the `vec4 ark_main(...)` definition. Prototypes and call sites
/// are skipped. Returns `Ok(None)` when no definition exists.
pub fn find_entry(source: &str) -> Result<Option<EntrySpan>> {
    let mask = comment_mask(source);
    let bytes = source.as_bytes();
    for at in identifier_offsets(source, ENTRY_NAME, &mask) {
        let Some((start, ret)) = previous_token(source, at, &mask) else {
            continue;
        };
        if ret != ENTRY_RETURN_TYPE {
            continue;
        }
        let open_paren = skip_whitespace(bytes, at + ENTRY_NAME.len(), &mask);
        if open_paren >= bytes.len() || bytes[open_paren] != b'(' {
            continue;
        }
        let close_paren = matching_close(bytes, open_paren, &mask)
            .ok_or_else(|| anyhow!("unbalanced parentheses in {ENTRY_NAME} parameter list"))?;
        let open_brace = skip_whitespace(bytes, close_paren + 1, &mask);
        if open_brace >= bytes.len() || bytes[open_brace] != b'{' {
            // forward declaration
            continue;
        }
        let close_brace = matching_close(bytes, open_brace, &mask)
            .ok_or_else(|| anyhow!("unbalanced braces in {ENTRY_NAME} body"))?;
        return Ok(Some(EntrySpan {
            start,
            end: close_brace + 1,
            params: source[open_paren + 1..close_paren].to_string(),
            body: source[open_brace + 1..close_brace].to_string(),
        }));
    }
    Ok(None)
}

/// True when the source defines a conventional `void main()`.
pub fn has_void_main(source: &str) -> bool {
    let mask = comment_mask(source);
    let bytes = source.as_bytes();
    identifier_offsets(source, "main", &mask).into_iter().any(|at| {
        let Some((_, ret)) = previous_token(source, at, &mask) else {
            return false;
        };
        let next = skip_whitespace(bytes, at + 4, &mask);
        ret == "void" && next < bytes.len() && bytes[next] == b'('
    })
}

fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut last = 0;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&text[last..i]);
                last = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[last..]);
    parts
}

const IGNORED_PARAMETER_QUALIFIERS: &[&str] = &["const", "highp", "mediump", "lowp", "precise"];

pub fn parse_parameter(text: &str) -> Result<Parameter> {
    let mut direction = ParameterDirection::In;
    let mut rest = Vec::new();
    for token in text.split_whitespace() {
        match token {
            "in" => direction = ParameterDirection::In,
            "out" => direction = ParameterDirection::Out,
            "inout" => direction = ParameterDirection::InOut,
            t if IGNORED_PARAMETER_QUALIFIERS.contains(&t) => {}
            t => rest.push(t),
        }
    }
    let [ty, name] = rest.as_slice() else {
        bail!("cannot parse {ENTRY_NAME} parameter: '{}'", text.trim());
    };
    if !is_identifier(ty) || !is_identifier(name) {
        bail!("cannot parse {ENTRY_NAME} parameter: '{}'", text.trim());
    }
    Ok(Parameter {
        direction,
        ty: ty.to_string(),
        name: name.to_string(),
    })
}

pub fn parse_parameters(params: &str) -> Result<Vec<Parameter>> {
    let trimmed = params.trim();
    if trimmed.is_empty() || trimmed == "void" {
        return Ok(Vec::new());
    }
    split_top_level_commas(trimmed)
        .into_iter()
        .map(parse_parameter)
        .collect()
}

/// Suffixes of every `<prefix><Name>` identifier, first occurrence order.
pub fn prefixed_identifiers(text: &str, prefix: &str) -> Vec<String> {
    let mask = comment_mask(text);
    let bytes = text.as_bytes();
    let mut out: Vec<String> = Vec::new();
    let mut from = 0;
    while let Some(found) = text[from..].find(prefix) {
        let at = from + found;
        let mut end = at + prefix.len();
        while end < bytes.len() && is_ident_byte(bytes[end]) {
            end += 1;
        }
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        if before_ok && !mask[at] && end > at + prefix.len() {
            let name = &text[at + prefix.len()..end];
            if !out.iter().any(|n| n == name) {
                out.push(name.to_string());
            }
        }
        from = end.max(at + 1);
    }
    out
}

pub fn references_identifier(text: &str, ident: &str) -> bool {
    let mask = comment_mask(text);
    !identifier_offsets(text, ident, &mask).is_empty()
}

/// A `[layout(...)] [qualifiers] keyword type name[N];` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDeclaration {
    pub keyword: String,
    pub qualifiers: Vec<String>,
    pub ty: String,
    pub name: String,
    pub length: u32,
}

const DECLARATION_KEYWORDS: &[&str] = &["in", "attribute", "out", "varying", "uniform"];
const LINE_QUALIFIERS: &[&str] = &[
    "flat", "smooth", "noperspective", "highp", "mediump", "lowp", "readonly", "writeonly", "coherent",
    "restrict", "volatile",
];

/// Parses one simple declaration line; anything outside the grammar yields `None`.
pub fn parse_declaration_line(line: &str) -> Option<LineDeclaration> {
    let mut text = line.trim();
    let body = text.strip_suffix(';')?.trim_end();
    text = body;
    if let Some(after) = text.strip_prefix("layout") {
        let after = after.trim_start();
        if !after.starts_with('(') {
            return None;
        }
        let close = after.find(')')?;
        text = after[close + 1..].trim_start();
    }

    let mut qualifiers = Vec::new();
    let mut keyword = None;
    let mut rest = Vec::new();
    for token in text.split_whitespace() {
        if keyword.is_none() {
            if LINE_QUALIFIERS.contains(&token) {
                qualifiers.push(token.to_string());
                continue;
            }
            if DECLARATION_KEYWORDS.contains(&token) {
                keyword = Some(token.to_string());
                continue;
            }
            return None;
        }
        if rest.is_empty() && LINE_QUALIFIERS.contains(&token) {
            qualifiers.push(token.to_string());
            continue;
        }
        rest.push(token);
    }
    let keyword = keyword?;
    let [ty, declarator] = rest.as_slice() else {
        return None;
    };
    let (name, length) = match declarator.find('[') {
        Some(open) => {
            let len_text = declarator[open + 1..].strip_suffix(']')?;
            (&declarator[..open], len_text.trim().parse::<u32>().ok()?)
        }
        None => (*declarator, 1),
    };
    if !is_identifier(ty) || !is_identifier(name) {
        return None;
    }
    Some(LineDeclaration {
        keyword,
        qualifiers,
        ty: ty.to_string(),
        name: name.to_string(),
        length,
    })
}

/// A braced block such as `struct Light { ... };` or `buffer Particles { ... } particles;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDeclaration {
    pub start: usize,
    pub end: usize,
    /// Words preceding the block name, e.g. `["layout(std430)", "readonly", "buffer"]`.
    pub qualifiers: Vec<String>,
    pub name: String,
    pub members: String,
    pub instance: Option<String>,
}

/// Finds every block introduced by `keyword` (`struct` or `buffer`).
pub fn find_blocks(source: &str, keyword: &str) -> Result<Vec<BlockDeclaration>> {
    let mask = comment_mask(source);
    let bytes = source.as_bytes();
    let mut blocks = Vec::new();
    for at in identifier_offsets(source, keyword, &mask) {
        let name_start = skip_whitespace(bytes, at + keyword.len(), &mask);
        let mut name_end = name_start;
        while name_end < bytes.len() && is_ident_byte(bytes[name_end]) {
            name_end += 1;
        }
        if name_end == name_start {
            continue;
        }
        let open = skip_whitespace(bytes, name_end, &mask);
        if open >= bytes.len() || bytes[open] != b'{' {
            continue;
        }
        let close = matching_close(bytes, open, &mask)
            .ok_or_else(|| anyhow!("unbalanced braces in {keyword} {}", &source[name_start..name_end]))?;
        let semicolon = source[close..]
            .find(';')
            .map(|i| close + i)
            .ok_or_else(|| anyhow!("missing ';' after {keyword} {}", &source[name_start..name_end]))?;
        let instance = source[close + 1..semicolon].trim();

        // qualifiers live on the same line, before the keyword
        let line_start = source[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let mut qualifiers: Vec<String> = source[line_start..at].split_whitespace().map(str::to_string).collect();
        qualifiers.push(keyword.to_string());

        blocks.push(BlockDeclaration {
            start: line_start,
            end: semicolon + 1,
            qualifiers,
            name: source[name_start..name_end].to_string(),
            members: source[open + 1..close].to_string(),
            instance: (!instance.is_empty()).then(|| instance.to_string()),
        });
    }
    Ok(blocks)
}
