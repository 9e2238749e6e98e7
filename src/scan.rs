//! Single-pass scanner extracting module declarations from C++ sources.
//!
//! This is not a preprocessor: conditional compilation directives are skipped
//! as opaque lines (a guarded `import` is always seen as active), and string
//! or comment context is not tracked. Both limitations are deliberate — the
//! toolchain rejects genuinely malformed input on its own — and pinned by
//! tests below.

use crate::{
    error::{BuildError, Result},
    utils,
};
use std::path::Path;

/// Trailing sentinel whitespace appended to the scan buffer so fixed-width
/// keyword lookaheads never read out of bounds.
const SCAN_PADDING: usize = 16;

/// What a scanned module statement refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// A `#include` directive (informational only).
    Header,
    /// An `import "header";` or `import <header>;` statement.
    HeaderUnit,
    /// A named module or partition.
    Interface,
}

/// One recognized statement of a translation unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    /// Logical name; partitions are spelled `primary:partition`.
    pub name: String,
    pub kind: ComponentKind,
    /// Preceded by `export` at a word boundary.
    pub exported: bool,
    /// An `import` statement rather than a declaration.
    pub imported: bool,
    /// `<...>` rather than `"..."` spelling.
    pub angled: bool,
}

/// Summary of one scanned translation unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanResult {
    /// Size of the input in bytes.
    pub size: usize,
    /// 64-bit content digest, deterministic across platforms.
    pub hash: u64,
    /// `"{filename}.{hash:016x}"`
    pub unique_name: String,
}

fn ws(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

fn nl(c: u8) -> bool {
    c == b'\n' || c == b'\r'
}

fn wsnl(c: u8) -> bool {
    ws(c) || nl(c)
}

fn ident(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'.' || c == b'_'
}

enum Statement {
    None { next: usize },
    Component { component: Component, next: usize },
}

/// Scans a translation unit's bytes, delivering every recognized
/// [`Component`] to `sink` in source order.
///
/// Malformed statements (missing `;`, unterminated delimiters) are skipped
/// silently. The only fatal condition is a partition import that names a
/// different primary module than the translation unit's own.
pub fn scan_file<F>(path: &Path, data: &[u8], mut sink: F) -> Result<ScanResult>
where
    F: FnMut(Component),
{
    let len = data.len();
    let mut padded = Vec::with_capacity(len + SCAN_PADDING);
    padded.extend_from_slice(data);
    padded.resize(len + SCAN_PADDING, b' ');
    let buf = padded.as_slice();

    let mut primary_module_name = String::new();
    let mut pos = 0;

    while pos < len {
        match buf[pos] {
            b'#' => {
                pos = scan_directive(buf, len, pos, &mut sink);
            }
            b'm' => match scan_module_statement(path, buf, len, pos, &mut primary_module_name)? {
                Statement::None { next } => pos = next,
                Statement::Component { component, next } => {
                    sink(component);
                    pos = next;
                }
            },
            _ => pos += 1,
        }
    }

    let hash = utils::content_hash(data);
    trace!("scanned {} ({len} bytes, hash {hash:016x})", path.display());

    Ok(ScanResult { size: len, hash, unique_name: utils::unique_name(path, data) })
}

/// Convenience wrapper collecting the components into a `Vec`.
///
/// # Examples
///
/// ```
/// use harmony::scan::{scan, ComponentKind};
/// use std::path::Path;
///
/// let (components, result) = scan(Path::new("a.ixx"), b"export module a;")?;
/// assert_eq!(components[0].name, "a");
/// assert_eq!(components[0].kind, ComponentKind::Interface);
/// assert!(result.unique_name.starts_with("a.ixx."));
/// # Ok::<(), harmony::BuildError>(())
/// ```
pub fn scan(path: &Path, data: &[u8]) -> Result<(Vec<Component>, ScanResult)> {
    let mut components = Vec::new();
    let result = scan_file(path, data, |component| components.push(component))?;
    Ok((components, result))
}

/// Handles a `#` directive at `pos`. `#include` emits a [`ComponentKind::Header`]
/// component; every other directive is skipped through its (possibly
/// backslash-continued) logical line.
fn scan_directive<F>(buf: &[u8], len: usize, pos: usize, sink: &mut F) -> usize
where
    F: FnMut(Component),
{
    let plen = buf.len();
    let mut cur = pos + 1;
    while cur < plen && ws(buf[cur]) {
        cur += 1;
    }

    if cur + 7 > plen || &buf[cur..cur + 7] != b"include" {
        // Skip any preprocessor directive other than #include.
        loop {
            while cur < len && !nl(buf[cur]) {
                cur += 1;
            }
            if cur >= len {
                return len;
            }
            let escaped = buf[cur - 1] == b'\\';
            cur += 1;
            if !escaped {
                return cur;
            }
            // fully consume an escaped CRLF pair
            if buf[cur - 1] == b'\r' && cur < len && buf[cur] == b'\n' {
                cur += 1;
            }
        }
    }

    cur += 7;
    while cur < plen && ws(buf[cur]) {
        cur += 1;
    }
    if cur >= len || (buf[cur] != b'<' && buf[cur] != b'"') {
        return cur.min(len);
    }

    let angled = buf[cur] == b'<';
    let close = if angled { b'>' } else { b'"' };
    let start = cur + 1;
    let mut end = start;
    while end < len && buf[end] != close {
        end += 1;
    }
    if end >= len {
        // unterminated spelling at end of input
        return len;
    }

    let name = String::from_utf8_lossy(&buf[start..end]).into_owned();
    trace!(
        "#include {}{name}{}",
        if angled { '<' } else { '"' },
        if angled { '>' } else { '"' }
    );
    sink(Component { name, kind: ComponentKind::Header, exported: false, imported: false, angled });
    end + 1
}

/// Handles a potential `module` / `import` statement whose keyword contains
/// the `m` at `pos`. Both keywords must sit at a word boundary.
fn scan_module_statement(
    path: &Path,
    buf: &[u8],
    len: usize,
    pos: usize,
    primary_module_name: &mut String,
) -> Result<Statement> {
    let plen = buf.len();
    let mut imported = false;
    let kw_start;
    let mut cur;

    if (pos == 0 || wsnl(buf[pos - 1])) && &buf[pos + 1..pos + 6] == b"odule" {
        kw_start = pos;
        cur = pos + 6;
    } else if pos >= 1
        && buf[pos - 1] == b'i'
        && (pos == 1 || wsnl(buf[pos - 2]))
        && &buf[pos - 1..pos + 5] == b"import"
    {
        imported = true;
        kw_start = pos - 1;
        cur = pos + 5;
    } else {
        return Ok(Statement::None { next: pos + 1 });
    }

    while cur < plen && wsnl(buf[cur]) {
        cur += 1;
    }
    if cur >= len {
        return Ok(Statement::None { next: len });
    }

    if buf[cur] == b';' {
        // global module fragment opener, ignore
        return Ok(Statement::None { next: cur + 1 });
    }

    let mut header_unit = false;
    let mut angled = false;
    let name: (usize, usize);
    let mut part: (usize, usize) = (0, 0);

    if buf[cur] == b'"' || buf[cur] == b'<' {
        header_unit = true;
        angled = buf[cur] == b'<';
        let close = if angled { b'>' } else { b'"' };
        let start = cur + 1;
        let mut end = start;
        while end < len && buf[end] != close {
            end += 1;
        }
        if end >= len {
            return Ok(Statement::None { next: len });
        }
        name = (start, end);
        cur = end + 1;
        while cur < plen && wsnl(buf[cur]) {
            cur += 1;
        }
        if cur >= len || buf[cur] != b';' {
            return Ok(Statement::None { next: cur.min(len) });
        }
    } else if !wsnl(buf[cur - 1]) {
        // keyword ran straight into an identifier ("importable", ..)
        return Ok(Statement::None { next: cur });
    } else {
        let start = cur;
        while cur < plen && ident(buf[cur]) {
            cur += 1;
        }
        name = (start, cur);
        while cur < plen && wsnl(buf[cur]) {
            cur += 1;
        }
        if cur < len && buf[cur] == b':' {
            cur += 1;
            while cur < plen && wsnl(buf[cur]) {
                cur += 1;
            }
            let part_start = cur;
            while cur < plen && ident(buf[cur]) {
                cur += 1;
            }
            part = (part_start, cur);
        }
        if name.0 == name.1 && &buf[part.0..part.1] == b"private" {
            // private module fragment opener, ignore
            return Ok(Statement::None { next: cur });
        }
        while cur < plen && wsnl(buf[cur]) {
            cur += 1;
        }
        if cur >= len || buf[cur] != b';' {
            // not a semicolon terminated module statement, ignore
            return Ok(Statement::None { next: cur.min(len) });
        }
    }

    // `export` must directly precede the keyword, also at a word boundary.
    let mut exported = false;
    let mut back = kw_start as isize - 2;
    while back >= 0 && wsnl(buf[back as usize]) {
        back -= 1;
    }
    if back >= 5 && &buf[back as usize - 5..=back as usize] == b"export" {
        exported = true;
    }

    let mut name_s = String::from_utf8_lossy(&buf[name.0..name.1]).into_owned();
    let part_s = String::from_utf8_lossy(&buf[part.0..part.1]).into_owned();

    if imported {
        // a bare `import :part;` inherits the translation unit's primary
        if !part_s.is_empty() && name_s.is_empty() {
            name_s = primary_module_name.clone();
        }
    } else {
        primary_module_name.clone_from(&name_s);
    }

    if imported && !part_s.is_empty() && name_s != *primary_module_name {
        return Err(BuildError::PartitionMismatch {
            file: path.to_path_buf(),
            partition: part_s,
            primary: primary_module_name.clone(),
        });
    }

    let comp_name = if part_s.is_empty() { name_s } else { format!("{name_s}:{part_s}") };
    let kind = if header_unit { ComponentKind::HeaderUnit } else { ComponentKind::Interface };
    trace!(
        "{}{} {comp_name}",
        if exported { "export " } else { "" },
        if imported { "import" } else { "module" }
    );

    Ok(Statement::Component {
        component: Component { name: comp_name, kind, exported, imported, angled },
        next: cur + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_src(src: &str) -> Vec<Component> {
        scan(Path::new("test.cpp"), src.as_bytes()).unwrap().0
    }

    fn interface(name: &str, exported: bool, imported: bool) -> Component {
        Component {
            name: name.to_string(),
            kind: ComponentKind::Interface,
            exported,
            imported,
            angled: false,
        }
    }

    #[test]
    fn scans_module_declarations() {
        assert_eq!(scan_src("module a;"), vec![interface("a", false, false)]);
        assert_eq!(scan_src("export module a;"), vec![interface("a", true, false)]);
        assert_eq!(scan_src("export  module a.b_c;"), vec![interface("a.b_c", true, false)]);
    }

    #[test]
    fn scans_imports() {
        assert_eq!(scan_src("import a;"), vec![interface("a", false, true)]);
        assert_eq!(scan_src("export import a;"), vec![interface("a", true, true)]);
        assert_eq!(scan_src("import std.compat;"), vec![interface("std.compat", false, true)]);
    }

    #[test]
    fn scans_header_units() {
        let comps = scan_src("import <vector>;\nimport \"local.hpp\";");
        assert_eq!(
            comps,
            vec![
                Component {
                    name: "vector".into(),
                    kind: ComponentKind::HeaderUnit,
                    exported: false,
                    imported: true,
                    angled: true,
                },
                Component {
                    name: "local.hpp".into(),
                    kind: ComponentKind::HeaderUnit,
                    exported: false,
                    imported: true,
                    angled: false,
                },
            ]
        );
    }

    #[test]
    fn header_unit_without_space_after_keyword() {
        let comps = scan_src("import<vector>;");
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].kind, ComponentKind::HeaderUnit);
        assert_eq!(comps[0].name, "vector");
    }

    #[test]
    fn ignores_fragment_openers() {
        assert!(scan_src("module;").is_empty());
        assert!(scan_src("module : private;").is_empty());
        assert!(scan_src("module :private;").is_empty());
    }

    #[test]
    fn full_interface_unit() {
        let src = "module;\n#include <cstdio>\nexport module app;\nimport util;\nexport import :part;\n";
        let comps = scan_src(src);
        assert_eq!(
            comps,
            vec![
                Component {
                    name: "cstdio".into(),
                    kind: ComponentKind::Header,
                    exported: false,
                    imported: false,
                    angled: true,
                },
                interface("app", true, false),
                Component {
                    name: "app:part".into(),
                    kind: ComponentKind::Interface,
                    exported: true,
                    imported: true,
                    angled: false,
                },
            ]
        );
    }

    #[test]
    fn partition_declaration_and_import() {
        assert_eq!(scan_src("module a:p;"), vec![interface("a:p", false, false)]);
        // bare partition import inherits the primary module name
        let comps = scan_src("module a;\nimport :p;");
        assert_eq!(comps, vec![interface("a", false, false), interface("a:p", false, true)]);
    }

    #[test]
    fn partition_import_of_foreign_primary_is_fatal() {
        let err = scan(Path::new("c.cpp"), b"module a;\nimport b:p;").unwrap_err();
        assert!(matches!(err, BuildError::PartitionMismatch { .. }), "{err:?}");
        // a matching primary is fine
        assert!(scan(Path::new("c.cpp"), b"module a;\nimport a:p;").is_ok());
    }

    #[test]
    fn skips_non_include_directives() {
        assert!(scan_src("#define FOO module bad;\n").is_empty());
        assert!(scan_src("#pragma once\n").is_empty());
    }

    #[test]
    fn directive_continuation_lines_are_opaque() {
        let comps = scan_src("#define X \\\n module y;\nimport z;\n");
        assert_eq!(comps, vec![interface("z", false, true)]);
        // the same with CRLF continuations
        let comps = scan_src("#define X \\\r\n module y;\r\nimport z;\r\n");
        assert_eq!(comps, vec![interface("z", false, true)]);
    }

    #[test]
    fn conditional_imports_are_always_seen() {
        // no preprocessor evaluation: the guarded import is reported
        let comps = scan_src("#ifdef NEVER\nimport a;\n#endif\n");
        assert_eq!(comps, vec![interface("a", false, true)]);
    }

    #[test]
    fn includes_are_reported() {
        let comps = scan_src("#include <vector>\n#include \"util.hpp\"\n");
        assert_eq!(comps.len(), 2);
        assert!(comps[0].angled && comps[0].kind == ComponentKind::Header);
        assert!(!comps[1].angled && comps[1].name == "util.hpp");
    }

    #[test]
    fn keyword_must_sit_at_word_boundary() {
        assert!(scan_src("importable;").is_empty());
        assert!(scan_src("no_module a;").is_empty());
        assert!(scan_src("remodule a;").is_empty());
        // "modulex" is not a module statement either
        assert!(scan_src("modulex a;").is_empty());
    }

    #[test]
    fn malformed_statements_are_skipped() {
        assert!(scan_src("import a").is_empty());
        assert!(scan_src("import \"unterminated").is_empty());
        assert!(scan_src("import <unterminated").is_empty());
        assert!(scan_src("module a:").is_empty());
    }

    // Known limitation, upheld deliberately: string context is not tracked,
    // so a module statement alone on a line inside a string literal is
    // still reported.
    #[test]
    fn string_context_is_not_tracked() {
        let comps = scan_src("const char* s = \"\nmodule x;\n\";");
        assert_eq!(comps, vec![interface("x", false, false)]);
    }

    #[test]
    fn unique_name_is_stable_across_scans() {
        let (_, first) = scan(Path::new("dir/a.ixx"), b"export module a;").unwrap();
        let (_, second) = scan(Path::new("elsewhere/a.ixx"), b"export module a;").unwrap();
        assert_eq!(first.unique_name, second.unique_name);
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.size, "export module a;".len());
        let digest = first.unique_name.rsplit('.').next().unwrap();
        assert_eq!(digest.len(), 16);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
