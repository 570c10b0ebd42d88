//! Directive parser.
//!
//! A snippet is native code interleaved with line-oriented directives:
//!
//! ```text
//! IMPORT int &count          variable binding, `&` = by reference
//! IMPORT double[] samples    array binding, length passed as `samples_len`
//! DEF double round1 double   callback into a host function
//! GLOBAL static int calls;   file-scope code
//! RETURN double mean         result type and expression
//! POST free(scratch);        cleanup before write-back
//! CC g++ -shared -fPIC       compiler command override
//! IMPORTALL                  also import every visible variable
//! ```
//!
//! Everything else is body code. Preprocessor lines (`#include ...`) are
//! hoisted to file scope with the globals.

use std::path::{Path, PathBuf};

use crate::error::{DirectiveError, Error, Result};
use crate::types::NativeType;

/// Whether a host variable's native-side mutation is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingMode {
    ByValue,
    ByReference,
}

/// A host variable exposed to the snippet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableBinding {
    pub name: String,
    pub ty: NativeType,
    pub mode: BindingMode,
}

impl VariableBinding {
    pub fn new(name: impl Into<String>, ty: NativeType, mode: BindingMode) -> Self {
        Self {
            name: name.into(),
            ty,
            mode,
        }
    }

    pub fn is_by_ref(&self) -> bool {
        self.mode == BindingMode::ByReference
    }
}

/// A host function callable from native code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionBinding {
    pub name: String,
    pub ret: NativeType,
    pub params: Vec<NativeType>,
}

/// Declared result of the wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReturnSpec {
    pub ty: NativeType,
    pub expr: String,
    /// Snippet line of the RETURN directive.
    pub line: usize,
}

/// A piece of verbatim code with the snippet line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fragment {
    pub line: usize,
    pub code: String,
}

impl Fragment {
    fn new(line: usize, code: impl Into<String>) -> Self {
        Self {
            line,
            code: code.into(),
        }
    }
}

/// Where the variable bindings of a call come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportMode {
    /// No IMPORT lines: every supported host variable is bound.
    Automatic,
    /// Only the IMPORT lines are bound.
    Explicit,
    /// IMPORT lines plus IMPORTALL.
    ExplicitWithAutomatic,
}

impl ImportMode {
    pub fn imports_automatically(self) -> bool {
        !matches!(self, ImportMode::Explicit)
    }
}

/// Parsed directive data of one snippet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Manifest {
    pub variables: Vec<VariableBinding>,
    pub functions: Vec<FunctionBinding>,
    pub globals: Vec<Fragment>,
    pub return_spec: Option<ReturnSpec>,
    pub post: Vec<Fragment>,
    pub compiler_override: Option<String>,
    pub import_mode: ImportMode,
}

impl Manifest {
    /// Look up a variable binding by name.
    pub fn variable(&self, name: &str) -> Option<&VariableBinding> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Return type of the wrapper (`int` unless RETURN says otherwise).
    pub fn return_type(&self) -> NativeType {
        self.return_spec
            .as_ref()
            .map(|r| r.ty)
            .unwrap_or(NativeType::Scalar(crate::types::ScalarType::Int))
    }

    /// Names that a binding may not shadow.
    pub fn is_bound(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
            || self.functions.iter().any(|f| f.name == name)
    }

    /// Produce the manifest for one call by appending inferred bindings.
    ///
    /// Bindings whose names are already bound are dropped.
    pub fn with_imports(&self, extra: impl IntoIterator<Item = VariableBinding>) -> Manifest {
        let mut manifest = self.clone();
        for binding in extra {
            if !manifest.is_bound(&binding.name) {
                manifest.variables.push(binding);
            }
        }
        manifest
    }

    /// Whether any directive other than GLOBAL/CC was used.
    pub fn has_call_directives(&self) -> bool {
        !self.variables.is_empty()
            || !self.functions.is_empty()
            || self.return_spec.is_some()
            || !self.post.is_empty()
            || self.import_mode == ImportMode::ExplicitWithAutomatic
    }
}

/// One line of residual body code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BodyLine {
    pub line: usize,
    pub text: String,
}

/// Where a snippet's first line sits in a host source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SourceOrigin {
    pub file: Option<PathBuf>,
    /// Host line of snippet line 1.
    pub first_line: usize,
}

impl SourceOrigin {
    pub fn new(file: impl AsRef<Path>, first_line: usize) -> Self {
        Self {
            file: Some(file.as_ref().to_path_buf()),
            first_line,
        }
    }

    /// Host line of a 1-based snippet line.
    pub fn host_line(&self, snippet_line: usize) -> usize {
        if self.file.is_some() {
            self.first_line + snippet_line - 1
        } else {
            snippet_line
        }
    }

    /// File name as it should appear in a `#line` marker.
    pub fn display_name(&self) -> String {
        match &self.file {
            Some(path) => path.display().to_string().replace('\\', "\\\\").replace('"', "\\\""),
            None => "<snippet>".to_string(),
        }
    }
}

/// A parsed snippet: manifest plus residual body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Snippet {
    pub manifest: Manifest,
    pub body: Vec<BodyLine>,
    pub origin: SourceOrigin,
}

impl Snippet {
    /// Parse a snippet with no host file attached.
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_origin(source, SourceOrigin::default())
    }

    /// Parse a snippet whose lines start at `origin`.
    pub fn parse_with_origin(source: &str, origin: SourceOrigin) -> Result<Self> {
        let mut parser = DirectiveParser::default();
        for (index, raw) in source.lines().enumerate() {
            parser.parse_line(index + 1, raw)?;
        }
        Ok(parser.finish(origin))
    }
}

#[derive(Default)]
struct DirectiveParser {
    variables: Vec<VariableBinding>,
    functions: Vec<FunctionBinding>,
    globals: Vec<Fragment>,
    return_spec: Option<ReturnSpec>,
    post: Vec<Fragment>,
    compiler_override: Option<String>,
    import_all: bool,
    body: Vec<BodyLine>,
}

impl DirectiveParser {
    fn parse_line(&mut self, line: usize, raw: &str) -> Result<()> {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') {
            self.globals.push(Fragment::new(line, trimmed));
            return Ok(());
        }

        let (keyword, rest) = match trimmed.find(char::is_whitespace) {
            Some(pos) => (&trimmed[..pos], trimmed[pos..].trim()),
            None => (trimmed, ""),
        };

        match keyword {
            "IMPORT" => self.parse_import(line, rest),
            "IMPORTALL" => {
                if !rest.is_empty() {
                    return Err(malformed(line, "IMPORTALL", "takes no arguments"));
                }
                self.import_all = true;
                Ok(())
            }
            "DEF" => self.parse_def(line, rest),
            "GLOBAL" => {
                self.globals.push(Fragment::new(line, rest));
                Ok(())
            }
            "RETURN" => self.parse_return(line, rest),
            "POST" => {
                self.post.push(Fragment::new(line, rest));
                Ok(())
            }
            "CC" => {
                if rest.is_empty() {
                    return Err(malformed(line, "CC", "missing compiler command"));
                }
                if self.compiler_override.is_some() {
                    tracing::debug!("CC on line {} replaces an earlier CC", line);
                }
                self.compiler_override = Some(rest.to_string());
                Ok(())
            }
            _ if looks_like_directive(keyword, rest) => Err(Error::directive(
                line,
                DirectiveError::Unknown {
                    keyword: keyword.to_string(),
                },
            )),
            _ => {
                self.body.push(BodyLine {
                    line,
                    text: raw.to_string(),
                });
                Ok(())
            }
        }
    }

    fn parse_import(&mut self, line: usize, rest: &str) -> Result<()> {
        let spec = rest.trim_end_matches(';').trim();
        let name_start = spec
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
            .last()
            .map(|(i, _)| i)
            .ok_or_else(|| malformed(line, "IMPORT", "expected `IMPORT <type> [&]<name>`"))?;

        let name = &spec[name_start..];
        let mut ty_part = spec[..name_start].trim_end();
        let mode = match ty_part.strip_suffix('&') {
            Some(stripped) => {
                ty_part = stripped;
                BindingMode::ByReference
            }
            None => BindingMode::ByValue,
        };
        let ty_token: String = ty_part.chars().filter(|c| !c.is_whitespace()).collect();

        if ty_token.is_empty() || !is_identifier(name) {
            return Err(malformed(line, "IMPORT", "expected `IMPORT <type> [&]<name>`"));
        }

        let ty = match NativeType::parse(&ty_token) {
            Some(NativeType::Void) | None => {
                return Err(Error::type_resolution(name, ty_token, "not an importable type"));
            }
            Some(ty) => ty,
        };

        if self.variables.iter().any(|v| v.name == name) {
            return Err(malformed(line, "IMPORT", format!("`{}` is imported twice", name)));
        }

        self.variables.push(VariableBinding::new(name, ty, mode));
        Ok(())
    }

    fn parse_def(&mut self, line: usize, rest: &str) -> Result<()> {
        let tokens: Vec<&str> = rest.trim_end_matches(';').split_whitespace().collect();
        if tokens.len() < 2 {
            return Err(malformed(line, "DEF", "expected `DEF <return-type> <name> [<type>...]`"));
        }

        let name = tokens[1];
        if !is_identifier(name) {
            return Err(malformed(line, "DEF", format!("`{}` is not a valid function name", name)));
        }
        if self.functions.iter().any(|f| f.name == name) {
            return Err(malformed(line, "DEF", format!("`{}` is defined twice", name)));
        }

        let ret = NativeType::parse(tokens[0]).ok_or_else(|| {
            Error::type_resolution(name, tokens[0], "unknown callback return type")
        })?;

        let params = tokens[2..]
            .iter()
            .map(|token| match NativeType::parse(token) {
                Some(ty @ (NativeType::Scalar(_) | NativeType::Str)) => Ok(ty),
                Some(NativeType::Array(_)) => Err(Error::type_resolution(
                    name,
                    *token,
                    "array callback parameters carry no length",
                )),
                _ => Err(Error::type_resolution(name, *token, "not a callback parameter type")),
            })
            .collect::<Result<Vec<_>>>()?;

        self.functions.push(FunctionBinding {
            name: name.to_string(),
            ret,
            params,
        });
        Ok(())
    }

    fn parse_return(&mut self, line: usize, rest: &str) -> Result<()> {
        let (ty_token, expr) = match rest.find(char::is_whitespace) {
            Some(pos) => (&rest[..pos], rest[pos..].trim()),
            None => (rest, ""),
        };
        let expr = expr.trim_end_matches(';').trim();
        if ty_token.is_empty() || expr.is_empty() {
            return Err(malformed(line, "RETURN", "expected `RETURN <type> <expr>`"));
        }

        let ty = match NativeType::parse(ty_token) {
            Some(ty @ (NativeType::Scalar(_) | NativeType::Str)) => ty,
            Some(_) => {
                return Err(Error::type_resolution(
                    "RETURN",
                    ty_token,
                    "only scalars and strings can be returned",
                ));
            }
            None => return Err(Error::type_resolution("RETURN", ty_token, "unknown return type")),
        };

        if self.return_spec.is_some() {
            tracing::debug!("RETURN on line {} replaces an earlier RETURN", line);
        }
        self.return_spec = Some(ReturnSpec {
            ty,
            expr: expr.to_string(),
            line,
        });
        Ok(())
    }

    fn finish(self, origin: SourceOrigin) -> Snippet {
        let import_mode = match (self.variables.is_empty(), self.import_all) {
            (true, _) => ImportMode::Automatic,
            (false, false) => ImportMode::Explicit,
            (false, true) => ImportMode::ExplicitWithAutomatic,
        };

        Snippet {
            manifest: Manifest {
                variables: self.variables,
                functions: self.functions,
                globals: self.globals,
                return_spec: self.return_spec,
                post: self.post,
                compiler_override: self.compiler_override,
                import_mode,
            },
            body: self.body,
            origin,
        }
    }
}

fn malformed(line: usize, directive: &'static str, reason: impl Into<String>) -> Error {
    Error::directive(
        line,
        DirectiveError::Malformed {
            directive,
            reason: reason.into(),
        },
    )
}

/// An upper-case word followed by a word-like argument (or nothing) reads as
/// a directive, unless the line reads as a statement: it ends in `;`, `{`,
/// `}` or `,`, or the argument holds `=` or `(`. `MAX(a, b);`, `NULL;`,
/// `LIMIT = 3;` and `COUNT n = 2;` stay code.
fn looks_like_directive(keyword: &str, rest: &str) -> bool {
    let upper = keyword.len() >= 2 && keyword.chars().all(|c| c.is_ascii_uppercase());
    if !upper {
        return false;
    }
    if rest.ends_with([';', '{', '}', ',']) || rest.contains(['=', '(']) {
        return false;
    }
    match rest.chars().next() {
        None => true,
        Some(c) => c.is_ascii_alphanumeric() || matches!(c, '_' | '&' | '"' | '<'),
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn parse(source: &str) -> Snippet {
        Snippet::parse(source).expect("snippet should parse")
    }

    #[test]
    fn test_import_modes() {
        let snippet = parse("IMPORT int &x\nIMPORT double[] data\nIMPORT string name\nx += 1;");
        let vars = &snippet.manifest.variables;
        assert_eq!(vars.len(), 3);
        assert_eq!(
            vars[0],
            VariableBinding::new("x", NativeType::Scalar(ScalarType::Int), BindingMode::ByReference)
        );
        assert_eq!(vars[1].ty, NativeType::Array(ScalarType::Double));
        assert_eq!(vars[1].mode, BindingMode::ByValue);
        assert_eq!(vars[2].ty, NativeType::Str);
        assert_eq!(snippet.manifest.import_mode, ImportMode::Explicit);
        assert_eq!(snippet.body.len(), 1);
        assert_eq!(snippet.body[0].line, 4);
    }

    #[test]
    fn test_lenient_import_spelling() {
        let snippet = parse("IMPORT int & x;\nIMPORT int []&data");
        let vars = &snippet.manifest.variables;
        assert_eq!(vars[0].name, "x");
        assert!(vars[0].is_by_ref());
        assert_eq!(vars[1].ty, NativeType::Array(ScalarType::Int));
        assert!(vars[1].is_by_ref());
    }

    #[test]
    fn test_no_import_means_automatic() {
        let snippet = parse("v = v * 10;");
        assert_eq!(snippet.manifest.import_mode, ImportMode::Automatic);

        let snippet = parse("IMPORT int x\nIMPORTALL");
        assert_eq!(snippet.manifest.import_mode, ImportMode::ExplicitWithAutomatic);
    }

    #[test]
    fn test_def() {
        let snippet = parse("DEF int square int\nDEF double mix double int");
        let funcs = &snippet.manifest.functions;
        assert_eq!(funcs[0].name, "square");
        assert_eq!(funcs[0].ret, NativeType::Scalar(ScalarType::Int));
        assert_eq!(funcs[0].params, vec![NativeType::Scalar(ScalarType::Int)]);
        assert_eq!(funcs[1].params.len(), 2);
    }

    #[test]
    fn test_def_array_return_parses() {
        // Rejected later, when the unit is generated.
        let snippet = parse("DEF int[] f");
        assert_eq!(
            snippet.manifest.functions[0].ret,
            NativeType::Array(ScalarType::Int)
        );
    }

    #[test]
    fn test_def_array_param_rejected() {
        let err = Snippet::parse("DEF int f int[]").unwrap_err();
        assert!(matches!(err, Error::TypeResolution { .. }));
    }

    #[test]
    fn test_unknown_directive() {
        let err = Snippet::parse("int y = 1;\nFOO bar").unwrap_err();
        match err {
            Error::Directive {
                line,
                source: DirectiveError::Unknown { keyword },
            } => {
                assert_eq!(line, 2);
                assert_eq!(keyword, "FOO");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_upper_case_code_is_not_a_directive() {
        let snippet = parse("MAX(a, b);\nLIMIT = 3;\nNULL;");
        assert_eq!(snippet.body.len(), 3);
    }

    #[test]
    fn test_upper_case_type_names_are_code() {
        let snippet = parse(
            "GLOBAL typedef int COUNT;\nIMPORT int &x\nCOUNT n = 2;\nDWORD m = 0;\n\
             BOOL ok = 1;\nSTRUCT_BEGIN {\nx += n;",
        );
        let body: Vec<&str> = snippet.body.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(
            body,
            vec!["COUNT n = 2;", "DWORD m = 0;", "BOOL ok = 1;", "STRUCT_BEGIN {", "x += n;"]
        );
        assert_eq!(snippet.body[0].line, 3);

        // A bare upper-case pair is still a typo'd directive.
        let err = Snippet::parse("COUNT n").unwrap_err();
        assert!(matches!(
            err,
            Error::Directive { source: DirectiveError::Unknown { .. }, .. }
        ));
    }

    #[test]
    fn test_return_last_wins() {
        let snippet = parse("RETURN int 1\nRETURN double 2.5");
        let ret = snippet.manifest.return_spec.unwrap();
        assert_eq!(ret.ty, NativeType::Scalar(ScalarType::Double));
        assert_eq!(ret.expr, "2.5");
        assert_eq!(ret.line, 2);
    }

    #[test]
    fn test_cc_last_wins() {
        let snippet = parse("CC gcc -shared\nCC clang -shared -fPIC");
        assert_eq!(
            snippet.manifest.compiler_override.as_deref(),
            Some("clang -shared -fPIC")
        );
    }

    #[test]
    fn test_return_rejects_arrays() {
        let err = Snippet::parse("RETURN int[] data").unwrap_err();
        assert!(matches!(err, Error::TypeResolution { .. }));
    }

    #[test]
    fn test_malformed_import() {
        let err = Snippet::parse("IMPORT x").unwrap_err();
        assert!(matches!(
            err,
            Error::Directive {
                source: DirectiveError::Malformed { directive: "IMPORT", .. },
                ..
            }
        ));

        let err = Snippet::parse("IMPORT widget w").unwrap_err();
        assert!(matches!(err, Error::TypeResolution { .. }));
    }

    #[test]
    fn test_duplicate_import_rejected() {
        let err = Snippet::parse("IMPORT int x\nIMPORT double x").unwrap_err();
        assert!(matches!(err, Error::Directive { line: 2, .. }));
    }

    #[test]
    fn test_globals_post_and_preprocessor() {
        let snippet = parse(
            "#include <math.h>\nGLOBAL static int n = 0;\nPOST n++;\nPOST n--;\ny = sqrt(y);",
        );
        let globals: Vec<_> = snippet.manifest.globals.iter().map(|g| g.code.as_str()).collect();
        assert_eq!(globals, vec!["#include <math.h>", "static int n = 0;"]);
        let post: Vec<_> = snippet.manifest.post.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(post, vec!["n++;", "n--;"]);
        assert_eq!(snippet.body.len(), 1);
        assert_eq!(snippet.body[0].line, 5);
    }

    #[test]
    fn test_with_imports_skips_bound_names() {
        let snippet = parse("IMPORT int x\nDEF int f int");
        let manifest = snippet.manifest.with_imports(vec![
            VariableBinding::new("x", NativeType::Scalar(ScalarType::Double), BindingMode::ByValue),
            VariableBinding::new("f", NativeType::Scalar(ScalarType::Int), BindingMode::ByValue),
            VariableBinding::new("y", NativeType::Str, BindingMode::ByReference),
        ]);
        let names: Vec<_> = manifest.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_origin_host_lines() {
        let origin = SourceOrigin::new("/src/app.py", 10);
        assert_eq!(origin.host_line(1), 10);
        assert_eq!(origin.host_line(4), 13);
        assert_eq!(SourceOrigin::default().host_line(4), 4);
        assert_eq!(SourceOrigin::default().display_name(), "<snippet>");
    }
}
