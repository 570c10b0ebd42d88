//! Code generator: manifest + body → one native translation unit.
//!
//! # Unit layout
//!
//! ```text
//! /* embedc provenance comment */
//! #include <stdint.h> ...          fixed marshaling includes
//! #define EMBEDC_EXPORT ...
//! <GLOBAL fragments, hoisted #lines>
//! extern "C" {                      (C++ only, via __cplusplus guard)
//! EMBEDC_EXPORT <ret> embedc_entry_<fp>(<params>) {
//!     <ret> embedc_result = 0;
//!     <by-reference locals>
//!     { <body, returns rewritten> embedc_result = (<RETURN expr>); }
//! embedc_exit: ;
//!     <POST fragments>
//!     <write-back>
//!     return embedc_result;
//! }
//! }
//! ```

mod returns;
mod unit;

use std::fmt::Write as _;

use crate::directive::{
    BindingMode, BodyLine, FunctionBinding, Manifest, Snippet, SourceOrigin, VariableBinding,
};
use crate::error::{Error, Result};
use crate::types::NativeType;

pub use returns::{EXIT_LABEL, RESULT_VAR, Rewritten, rewrite_returns};
pub use unit::{Fingerprint, GeneratedUnit, UnitKind};

/// Bumped whenever the emitted layout changes, so old artifacts are not reused.
pub const GENERATOR_VERSION: u32 = 1;

/// Prefix of every wrapper symbol.
pub const ENTRY_PREFIX: &str = "embedc_entry";

const STANDARD_INCLUDES: &[&str] = &[
    "#include <stdint.h>",
    "#include <stddef.h>",
    "#include <stdbool.h>",
    "#include <string.h>",
    "#include <stdio.h>",
    "#include <stdlib.h>",
];

const EXPORT_MACRO: &str = "\
#if defined(_WIN32)
#define EMBEDC_EXPORT __declspec(dllexport)
#else
#define EMBEDC_EXPORT __attribute__((visibility(\"default\")))
#endif";

const STORE_STRING_HELPER: &str = "\
static void embedc_store_string(char *dst, const char *src, size_t cap) {
    size_t n = 0;
    if (cap == 0) return;
    if (src == NULL) { dst[0] = '\\0'; return; }
    while (n + 1 < cap && src[n] != '\\0') n++;
    memmove(dst, src, n);
    dst[n] = '\\0';
}";

/// Generates translation units.
///
/// The provenance string (compiler command, toolchain version) is written
/// into a header comment so it takes part in the fingerprint.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    default_command: String,
    toolchain: String,
}

impl CodeGenerator {
    pub fn new(default_command: impl Into<String>, toolchain: impl Into<String>) -> Self {
        Self {
            default_command: default_command.into(),
            toolchain: toolchain.into(),
        }
    }

    /// Generate the wrapper unit for one call.
    ///
    /// `manifest` is the snippet's manifest, possibly extended with
    /// automatically imported bindings.
    pub fn generate(&self, snippet: &Snippet, manifest: &Manifest) -> Result<GeneratedUnit> {
        validate_callbacks(&manifest.functions)?;

        // The fingerprint covers the unit rendered with a neutral symbol; the
        // final symbol is derived from it.
        let neutral = self.render_wrapper(snippet, manifest, ENTRY_PREFIX);
        let fingerprint = Fingerprint::of(&neutral);
        let symbol = format!("{}_{}", ENTRY_PREFIX, fingerprint.short());
        let source = self.render_wrapper(snippet, manifest, &symbol);

        Ok(GeneratedUnit {
            source,
            fingerprint,
            symbol: Some(symbol),
            kind: UnitKind::Wrapper,
            compiler_override: manifest.compiler_override.clone(),
        })
    }

    /// Generate a library unit: globals and body at file scope, no wrapper.
    pub fn generate_library(&self, snippet: &Snippet) -> Result<GeneratedUnit> {
        if snippet.manifest.has_call_directives() {
            return Err(Error::directive(
                first_call_directive_line(snippet),
                crate::error::DirectiveError::Malformed {
                    directive: "library snippet",
                    reason: "IMPORT, DEF, RETURN and POST need a wrapper; use an inline call"
                        .to_string(),
                },
            ));
        }

        let mut out = String::new();
        self.write_prelude(&mut out, &snippet.manifest, &snippet.origin);
        out.push_str("#ifdef __cplusplus\nextern \"C\" {\n#endif\n");
        write_lines(&mut out, &snippet.body, &snippet.origin);
        out.push_str("#ifdef __cplusplus\n}\n#endif\n");

        Ok(GeneratedUnit {
            fingerprint: Fingerprint::of(&out),
            source: out,
            symbol: None,
            kind: UnitKind::Library,
            compiler_override: snippet.manifest.compiler_override.clone(),
        })
    }

    fn write_prelude(&self, out: &mut String, manifest: &Manifest, origin: &SourceOrigin) {
        let command = manifest
            .compiler_override
            .as_deref()
            .unwrap_or(&self.default_command);
        let _ = writeln!(
            out,
            "/* generated by embedc (layout {}); compiler: {}; toolchain: {} */",
            GENERATOR_VERSION,
            sanitize_comment(command),
            sanitize_comment(&self.toolchain)
        );
        for include in STANDARD_INCLUDES {
            out.push_str(include);
            out.push('\n');
        }
        out.push_str(EXPORT_MACRO);
        out.push('\n');

        for fragment in &manifest.globals {
            let _ = writeln!(
                out,
                "#line {} \"{}\"",
                origin.host_line(fragment.line),
                origin.display_name()
            );
            out.push_str(&fragment.code);
            out.push('\n');
        }
    }

    fn render_wrapper(&self, snippet: &Snippet, manifest: &Manifest, symbol: &str) -> String {
        let origin = &snippet.origin;
        let ret_ty = manifest.return_type();
        let mut out = String::new();

        self.write_prelude(&mut out, manifest, origin);
        out.push_str("#ifdef __cplusplus\nextern \"C\" {\n#endif\n");

        let needs_store = manifest
            .variables
            .iter()
            .any(|v| v.ty == NativeType::Str && v.is_by_ref());
        if needs_store {
            out.push_str(STORE_STRING_HELPER);
            out.push('\n');
        }

        let params = parameter_list(manifest);
        let _ = writeln!(
            out,
            "EMBEDC_EXPORT {} {}({}) {{",
            c_return_type(ret_ty),
            symbol,
            if params.is_empty() {
                "void".to_string()
            } else {
                params.join(", ")
            }
        );

        let zero = if ret_ty == NativeType::Str { "NULL" } else { "0" };
        let _ = writeln!(out, "    {} {} = {};", c_return_type(ret_ty), RESULT_VAR, zero);

        for var in manifest.variables.iter().filter(|v| v.is_by_ref()) {
            match var.ty {
                NativeType::Scalar(s) => {
                    let _ = writeln!(
                        out,
                        "    {} {} = *{};",
                        s.c_name(),
                        var.name,
                        ref_param(&var.name)
                    );
                }
                NativeType::Str => {
                    let _ = writeln!(out, "    char *{} = {};", var.name, ref_param(&var.name));
                }
                NativeType::Array(_) | NativeType::Void => {}
            }
        }

        // Body in its own block: jumps to the exit label never cross an
        // initialization in the label's scope.
        let joined: Vec<&str> = snippet.body.iter().map(|l| l.text.as_str()).collect();
        let rewritten = rewrite_returns(&joined.join("\n"));
        let body: Vec<BodyLine> = snippet
            .body
            .iter()
            .zip(rewritten.text.split('\n'))
            .map(|(original, text)| BodyLine {
                line: original.line,
                text: text.to_string(),
            })
            .collect();

        out.push_str("    {\n");
        write_lines(&mut out, &body, origin);
        if let Some(spec) = &manifest.return_spec {
            let _ = writeln!(
                out,
                "#line {} \"{}\"\n    {} = ({});",
                origin.host_line(spec.line),
                origin.display_name(),
                RESULT_VAR,
                spec.expr
            );
        }
        out.push_str("    }\n");

        if rewritten.count > 0 {
            let _ = writeln!(out, "{}: ;", EXIT_LABEL);
        }

        write_lines(
            &mut out,
            &manifest
                .post
                .iter()
                .map(|p| BodyLine {
                    line: p.line,
                    text: format!("    {}", p.code),
                })
                .collect::<Vec<_>>(),
            origin,
        );

        for var in manifest.variables.iter().filter(|v| v.is_by_ref()) {
            match var.ty {
                NativeType::Scalar(_) => {
                    let _ = writeln!(out, "    *{} = {};", ref_param(&var.name), var.name);
                }
                NativeType::Str => {
                    let _ = writeln!(
                        out,
                        "    embedc_store_string({}, {}, {});",
                        ref_param(&var.name),
                        var.name,
                        cap_param(&var.name)
                    );
                }
                // Arrays are mutated in place through the shared pointer.
                NativeType::Array(_) | NativeType::Void => {}
            }
        }

        let _ = writeln!(out, "    return {};\n}}", RESULT_VAR);
        out.push_str("#ifdef __cplusplus\n}\n#endif\n");
        out
    }
}

/// Reject callback signatures the proxy layer cannot honor.
pub fn validate_callbacks(functions: &[FunctionBinding]) -> Result<()> {
    for func in functions {
        match func.ret {
            NativeType::Scalar(_) | NativeType::Void => {}
            NativeType::Array(_) | NativeType::Str => {
                return Err(Error::UnsupportedCallbackReturn {
                    function: func.name.clone(),
                    ty: func.ret.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// C parameter declarations, in argument order.
pub fn parameter_list(manifest: &Manifest) -> Vec<String> {
    let mut params = Vec::new();
    for var in &manifest.variables {
        params.extend(variable_params(var));
    }
    for func in &manifest.functions {
        let args: Vec<&str> = func.params.iter().map(|p| c_param_type(*p)).collect();
        params.push(format!(
            "{} (*{})({})",
            c_return_type(func.ret),
            func.name,
            if args.is_empty() {
                "void".to_string()
            } else {
                args.join(", ")
            }
        ));
    }
    params
}

fn variable_params(var: &VariableBinding) -> Vec<String> {
    match (var.ty, var.mode) {
        (NativeType::Scalar(s), BindingMode::ByValue) => {
            vec![format!("{} {}", s.c_name(), var.name)]
        }
        (NativeType::Scalar(s), BindingMode::ByReference) => {
            vec![format!("{} *{}", s.c_name(), ref_param(&var.name))]
        }
        (NativeType::Array(s), _) => vec![
            format!("{} *{}", s.c_name(), var.name),
            format!("size_t {}", len_param(&var.name)),
        ],
        (NativeType::Str, BindingMode::ByValue) => vec![format!("const char *{}", var.name)],
        (NativeType::Str, BindingMode::ByReference) => vec![
            format!("char *{}", ref_param(&var.name)),
            format!("size_t {}", cap_param(&var.name)),
        ],
        (NativeType::Void, _) => Vec::new(),
    }
}

/// Name of the pointer parameter behind a by-reference scalar or string.
pub fn ref_param(name: &str) -> String {
    format!("embedc_ref_{}", name)
}

/// Name of the element-count parameter of an array binding.
pub fn len_param(name: &str) -> String {
    format!("{}_len", name)
}

/// Name of the capacity parameter of a by-reference string binding.
pub fn cap_param(name: &str) -> String {
    format!("{}_cap", name)
}

fn c_return_type(ty: NativeType) -> &'static str {
    match ty {
        NativeType::Scalar(s) => s.c_name(),
        NativeType::Str => "const char *",
        NativeType::Void | NativeType::Array(_) => "void",
    }
}

fn c_param_type(ty: NativeType) -> &'static str {
    match ty {
        NativeType::Scalar(s) => s.c_name(),
        NativeType::Str => "const char *",
        NativeType::Void | NativeType::Array(_) => "void *",
    }
}

/// Emit lines, inserting a `#line` marker wherever numbering jumps.
fn write_lines(out: &mut String, lines: &[BodyLine], origin: &SourceOrigin) {
    let mut expected: Option<usize> = None;
    for line in lines {
        if expected != Some(line.line) {
            let _ = writeln!(
                out,
                "#line {} \"{}\"",
                origin.host_line(line.line),
                origin.display_name()
            );
        }
        out.push_str(&line.text);
        out.push('\n');
        expected = Some(line.line + 1);
    }
}

fn sanitize_comment(text: &str) -> String {
    text.replace("*/", "* /").replace('\n', " ")
}

fn first_call_directive_line(snippet: &Snippet) -> usize {
    snippet
        .manifest
        .return_spec
        .as_ref()
        .map(|r| r.line)
        .or_else(|| snippet.manifest.post.first().map(|p| p.line))
        .unwrap_or(1)
}
