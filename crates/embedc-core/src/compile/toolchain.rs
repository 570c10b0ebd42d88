//! Toolchain management.
//!
//! Resolves the external C/C++ compiler and the default command template.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

use super::command::CommandTemplate;
use super::types::CompilerConfig;

/// Manages the native toolchain used to build snippets.
#[derive(Debug, Clone)]
pub struct ToolchainManager {
    /// Resolved compiler executable
    compiler_path: PathBuf,

    /// Default command template
    template: CommandTemplate,

    /// First line of `<compiler> --version`
    version: String,
}

impl ToolchainManager {
    /// Create a new toolchain manager, detecting available tools.
    ///
    /// A configured command template wins; otherwise the language's usual
    /// compilers are looked up on `PATH`.
    pub fn new(config: &CompilerConfig) -> Result<Self> {
        let (compiler_path, template) = match &config.compiler {
            Some(text) => {
                let template = CommandTemplate::parse(text)?;
                let program = template.program().to_string();
                let path = which::which(&program).map_err(|_| {
                    Error::Toolchain(format!("compiler `{}` not found in PATH", program))
                })?;
                (path, template)
            }
            None => {
                let path = Self::find_compiler(config)?;
                let template = Self::default_template(&path, config);
                (path, template)
            }
        };

        let version = Self::get_version(&compiler_path);
        tracing::debug!("Using compiler {} ({})", compiler_path.display(), version);

        Ok(Self {
            compiler_path,
            template,
            version,
        })
    }

    /// Build a manager from known parts, without probing the system.
    pub fn from_parts(
        compiler_path: PathBuf,
        template: CommandTemplate,
        version: impl Into<String>,
    ) -> Self {
        Self {
            compiler_path,
            template,
            version: version.into(),
        }
    }

    /// Get the compiler path.
    pub fn compiler_path(&self) -> &Path {
        &self.compiler_path
    }

    /// Get the default command template.
    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// Get the toolchain version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Find the first available compiler for the configured language.
    fn find_compiler(config: &CompilerConfig) -> Result<PathBuf> {
        let candidates = config.language.compiler_candidates();
        candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                Error::Toolchain(format!(
                    "no C compiler found in PATH (tried {}); set EMBEDC_CC",
                    candidates.join(", ")
                ))
            })
    }

    /// `<cc> -shared -fPIC -O<n> [-g] <extra> -o {out}`; the source is
    /// appended at expansion time.
    fn default_template(compiler: &Path, config: &CompilerConfig) -> CommandTemplate {
        let mut args = vec![
            compiler.display().to_string(),
            "-shared".to_string(),
            "-fPIC".to_string(),
            format!("-O{}", config.opt_level.min(3)),
        ];
        if config.debug_info {
            args.push("-g".to_string());
        }
        args.extend(config.extra_flags.iter().cloned());
        args.push("-o".to_string());
        args.push(super::command::OUT_PLACEHOLDER.to_string());
        CommandTemplate::from_args(args)
    }

    /// Get the compiler version string. Unknown compilers still work; the
    /// version only feeds the fingerprint.
    fn get_version(compiler: &Path) -> String {
        let output = Command::new(compiler).arg("--version").output();
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string(),
            _ => "unknown".to_string(),
        }
    }
}
