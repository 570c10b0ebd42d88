//! Integration tests for the three calling modes and library mode.
//!
//! Tests that compile native code need a C compiler on `PATH` and skip
//! themselves when none is found.

use std::fs;
use std::path::PathBuf;

use embedc::{
    CacheDirs, CompilerConfig, Delimiters, Embedder, Error, HostValue, MarshalError, Scope,
    SourceOrigin,
};
use embedc_core::compile::DiagnosticLevel;
use embedc_core::{CodeGenerator, DirectiveError, Snippet};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Test Helpers
// =============================================================================

/// An embedder whose cache lives in a temporary directory.
struct TestEmbedder {
    dir: TempDir,
    embedder: Embedder,
}

impl TestEmbedder {
    /// `None` when no compiler is available.
    fn new() -> Option<Self> {
        Self::with_config(|config| config)
    }

    /// `None` when no C++ compiler is available.
    fn cpp() -> Option<Self> {
        Self::with_config(CompilerConfig::cpp)
    }

    fn with_config(adjust: impl FnOnce(CompilerConfig) -> CompilerConfig) -> Option<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let dir = TempDir::new().expect("Failed to create temp dir");
        let dirs = CacheDirs::at(dir.path().join("cache"));
        let config = adjust(CompilerConfig::with_dirs(&dirs));
        match Embedder::new(config) {
            Ok(embedder) => Some(Self { dir, embedder }),
            Err(e) => {
                eprintln!("skipping: {}", e);
                None
            }
        }
    }

    /// Write a host source file next to the cache.
    fn host_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("Failed to write host file");
        path
    }

    fn compilations(&self) -> u64 {
        self.embedder.cache().stats().compilations
    }
}

fn ints(values: &[i64]) -> HostValue {
    HostValue::List(values.iter().map(|v| HostValue::Int(*v)).collect())
}

// =============================================================================
// Explicit Import
// =============================================================================

#[test]
fn test_scalar_by_reference_increment() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("x", 41);

    t.embedder.inline("IMPORT int &x\nx = x + 1;", &mut scope).unwrap();
    assert_eq!(scope.get("x"), Some(&HostValue::Int(42)));
}

#[test]
fn test_array_sum() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("values", vec![5, 6, 7]);

    let source = "\
IMPORT int[] values
RETURN int total
int total = 0;
for (size_t i = 0; i < values_len; i++) total += values[i];";
    let result = t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(result, HostValue::Int(18));
    assert_eq!(scope.get("values"), Some(&ints(&[5, 6, 7])));
}

#[test]
fn test_array_by_reference_mutation() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("values", vec![1, 2, 3]);

    let source = "IMPORT int[] &values\nfor (size_t i = 0; i < values_len; i++) values[i] *= 2;";
    t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(scope.get("values"), Some(&ints(&[2, 4, 6])));
}

#[test]
fn test_tuple_cannot_be_bound_by_reference() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("t", HostValue::Tuple(vec![HostValue::Int(1)]));

    let err = t.embedder.inline("IMPORT int[] &t\nt[0] = 2;", &mut scope).unwrap_err();
    assert!(matches!(err, Error::Marshaling(MarshalError::ImmutableTarget { .. })));
}

#[test]
fn test_missing_variable() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    let err = t.embedder.inline("IMPORT int &x\nx++;", &mut scope).unwrap_err();
    assert!(matches!(err, Error::Marshaling(MarshalError::MissingVariable { .. })));
}

#[test]
fn test_global_written_back_to_global_layer() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set_global("counter", 10);

    t.embedder.inline("IMPORT int &counter\ncounter += 5;", &mut scope).unwrap();
    assert_eq!(scope.global("counter"), Some(&HostValue::Int(15)));
}

// =============================================================================
// Strings
// =============================================================================

#[test]
fn test_string_by_reference_write_back() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("s", "hi");

    let source = "IMPORT string &s\nsnprintf(s, s_cap, \"%s there\", \"hello\");";
    t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(scope.get("s"), Some(&HostValue::Str("hello there".to_string())));
}

#[test]
fn test_string_result() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("n", 2);

    let source = "IMPORT int n\nRETURN string n > 1 ? \"many\" : \"one\"";
    let result = t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(result, HostValue::Str("many".to_string()));
}

// =============================================================================
// Automatic Import
// =============================================================================

#[test]
fn test_automatic_import_writes_back() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope
        .set("v", 3)
        .set("ratio", 1.5)
        .set("items", vec![1, 2])
        .set("label", HostValue::Opaque("object".to_string()));

    let source = "v = v * 10;\nratio = ratio * 2;\nitems[0] = 9;";
    t.embedder.inline(source, &mut scope).unwrap();

    assert_eq!(scope.get("v"), Some(&HostValue::Int(30)));
    assert_eq!(scope.get("ratio"), Some(&HostValue::Float(3.0)));
    assert_eq!(scope.get("items"), Some(&ints(&[9, 2])));
    assert_eq!(scope.get("label"), Some(&HostValue::Opaque("object".to_string())));
}

#[test]
fn test_automatic_import_skips_strings_with_nul() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("v", 3).set("blob", "a\0b");

    t.embedder.inline("v = v * 10;", &mut scope).unwrap();

    assert_eq!(scope.get("v"), Some(&HostValue::Int(30)));
    assert_eq!(scope.get("blob"), Some(&HostValue::Str("a\0b".to_string())));
}

// =============================================================================
// Callbacks
// =============================================================================

#[test]
fn test_callback_square() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("result", 0).define("square", |args: &[HostValue]| match args {
        [HostValue::Int(x)] => Ok(HostValue::Int(x * x)),
        _ => Err("square takes one int".to_string()),
    });

    let source = "IMPORT int &result\nDEF int square int\nresult = square(9);";
    t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(scope.get("result"), Some(&HostValue::Int(81)));
}

#[test]
fn test_callback_failure_skips_write_back() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope
        .set("result", 1)
        .define("fail", |_: &[HostValue]| -> Result<HostValue, String> { Err("no".to_string()) });

    let source = "IMPORT int &result\nDEF int fail\nresult = fail() + 5;";
    let err = t.embedder.inline(source, &mut scope).unwrap_err();
    assert!(matches!(
        err,
        Error::Marshaling(MarshalError::Callback { ref function, .. }) if function == "fail"
    ));
    assert_eq!(scope.get("result"), Some(&HostValue::Int(1)));
}

#[test]
fn test_missing_callback_function() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    let err = t.embedder.inline("DEF void log_it int\nlog_it(1);", &mut scope).unwrap_err();
    assert!(matches!(err, Error::Marshaling(MarshalError::MissingFunction { .. })));
}

#[test]
fn test_unsupported_callback_return_rejected_at_generation() {
    let snippet = Snippet::parse("DEF int[] f\nf();").unwrap();
    let err = CodeGenerator::new("cc", "test")
        .generate(&snippet, &snippet.manifest)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedCallbackReturn { ref function, .. } if function == "f"
    ));
}

// =============================================================================
// Directives
// =============================================================================

#[test]
fn test_unknown_directive() {
    let err = Snippet::parse("int x = 0;\nFOO bar").unwrap_err();
    assert!(matches!(
        err,
        Error::Directive {
            line: 2,
            source: DirectiveError::Unknown { .. }
        }
    ));
}

#[test]
fn test_early_return_runs_post_and_write_back() {
    let Some(t) = TestEmbedder::new() else { return };
    let source = "\
IMPORT int &x
POST x = x * 2;
RETURN int -1
if (x > 0) return x + 100;
x = 0;";

    let mut scope = Scope::new();
    scope.set("x", 5);
    let result = t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(result, HostValue::Int(105));
    assert_eq!(scope.get("x"), Some(&HostValue::Int(10)));

    scope.set("x", -3);
    let result = t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(result, HostValue::Int(-1));
    assert_eq!(scope.get("x"), Some(&HostValue::Int(0)));
    assert_eq!(t.compilations(), 1);
}

#[test]
fn test_cpp_lambda_return_stays_in_lambda() {
    let Some(t) = TestEmbedder::cpp() else { return };
    let mut scope = Scope::new();
    scope.set("x", 4);

    let source = "IMPORT int &x\nauto twice = [](int a) { return a * 2; };\nx = twice(x);";
    t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(scope.get("x"), Some(&HostValue::Int(8)));
}

#[test]
fn test_upper_case_typedef_in_body() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    scope.set("x", 1);

    let source = "GLOBAL typedef int COUNT;\nIMPORT int &x\nCOUNT n = 2;\nx += n;";
    t.embedder.inline(source, &mut scope).unwrap();
    assert_eq!(scope.get("x"), Some(&HostValue::Int(3)));
}

#[test]
fn test_duplicate_return_last_wins() {
    let Some(t) = TestEmbedder::new() else { return };
    let mut scope = Scope::new();
    let result = t.embedder.inline("RETURN int 1\nRETURN int 2", &mut scope).unwrap();
    assert_eq!(result, HostValue::Int(2));
}

#[test]
fn test_compiler_override() {
    let Some(t) = TestEmbedder::new() else { return };
    let compiler = t.embedder.cache().toolchain().compiler_path().display().to_string();
    let source = format!("CC \"{}\" -shared -fPIC -o {{out}}\nRETURN int 4", compiler);

    let mut scope = Scope::new();
    assert_eq!(t.embedder.inline(&source, &mut scope).unwrap(), HostValue::Int(4));
}

#[test]
fn test_diagnostics_point_at_host_file() {
    let Some(t) = TestEmbedder::new() else { return };
    let origin = SourceOrigin::new("host.py", 10);
    let mut scope = Scope::new();

    let err = t
        .embedder
        .inline_at("int ok = 1;\nint broken = ;", origin, &mut scope)
        .unwrap_err();
    match err {
        Error::Compilation { diagnostics, output, .. } => {
            assert!(
                diagnostics.iter().any(|d| d.file.ends_with("host.py")
                    && d.line == 11
                    && d.level == DiagnosticLevel::Error),
                "unexpected diagnostics: {}",
                output
            );
        }
        other => panic!("expected a compilation error, got {:?}", other),
    }
}

// =============================================================================
// Precompiled Mode
// =============================================================================

const HOST_SOURCE: &str = r#"def total(values):
    return inline_c_precompile("""
IMPORT int[] values
RETURN int s
int s = 0;
for (size_t i = 0; i < values_len; i++) s += values[i];
    """)

one = inline_c_precompile("""RETURN int 1""")
"#;

#[test]
fn test_precompiled_compiles_once() {
    let Some(t) = TestEmbedder::new() else { return };
    let path = t.host_file("host.py", HOST_SOURCE);
    let mut scope = Scope::new();
    scope.set("values", vec![5, 6, 7]).set("ignored", 1);

    assert_eq!(t.embedder.precompiled(&path, 7, &mut scope).unwrap(), HostValue::Int(18));
    scope.set("values", vec![1, 1]);
    assert_eq!(t.embedder.precompiled(&path, 7, &mut scope).unwrap(), HostValue::Int(2));

    assert_eq!(t.compilations(), 1);
    assert_eq!(t.embedder.precompiled_count(), 1);
}

#[test]
fn test_precompile_file() {
    let Some(t) = TestEmbedder::new() else { return };
    let path = t.host_file("host.py", HOST_SOURCE);

    assert_eq!(t.embedder.precompile_file(&path).unwrap(), 2);
    assert_eq!(t.compilations(), 2);

    let mut scope = Scope::new();
    assert_eq!(t.embedder.precompiled(&path, 9, &mut scope).unwrap(), HostValue::Int(1));
    assert_eq!(t.compilations(), 2);
}

#[test]
fn test_precompiled_bad_line() {
    let Some(t) = TestEmbedder::new() else { return };
    let path = t.host_file("host.py", HOST_SOURCE);
    let mut scope = Scope::new();
    let err = t.embedder.precompiled(&path, 3, &mut scope).unwrap_err();
    assert!(matches!(err, Error::Extraction { line: 3, .. }));
}

#[test]
fn test_prepared_snippet_reuse() {
    let Some(t) = TestEmbedder::new() else { return };
    let prepared = t
        .embedder
        .prepare("IMPORT int &n\nn *= 3;", SourceOrigin::default())
        .unwrap();

    let mut scope = Scope::new();
    scope.set("n", 2);
    prepared.call(&mut scope).unwrap();
    prepared.call(&mut scope).unwrap();
    assert_eq!(scope.get("n"), Some(&HostValue::Int(18)));
    assert!(prepared.symbol().starts_with("embedc_entry_"));
}

// =============================================================================
// Library Mode
// =============================================================================

#[test]
fn test_embed_library() {
    let Some(t) = TestEmbedder::new() else { return };
    let module = t
        .embedder
        .embed("GLOBAL static int bias = 1;\nint add(int a, int b) { return a + b + bias; }")
        .unwrap();

    let add = unsafe { module.get::<unsafe extern "C" fn(i32, i32) -> i32>("add") }.unwrap();
    assert_eq!(unsafe { add(2, 3) }, 6);
}

#[test]
fn test_embed_rejects_call_directives() {
    let Some(t) = TestEmbedder::new() else { return };
    let err = t.embedder.embed("IMPORT int x\nint f(void) { return 0; }").unwrap_err();
    assert!(matches!(err, Error::Directive { .. }));
}

#[test]
fn test_embed_precompiled_with_custom_delimiters() {
    let Some(TestEmbedder { dir, embedder }) = TestEmbedder::new() else { return };
    let embedder = embedder.with_delimiters(Delimiters::new("R\"(", ")\""));
    let path = dir.path().join("lib.cc");
    fs::write(
        &path,
        "auto lib = embed_c_precompile(R\"(\nint triple(int v) { return v * 3; }\n)\");\n",
    )
    .expect("Failed to write host file");

    let module = embedder.embed_precompiled(&path, 3).unwrap();
    let triple = unsafe { module.get::<unsafe extern "C" fn(i32) -> i32>("triple") }.unwrap();
    assert_eq!(unsafe { triple(7) }, 21);
}
