//! Line-oriented reference executor
//!
//! Runs a small Python-like statement subset, one statement per line:
//!
//! ```text
//! # comment
//! import pkg.mod            # binds `pkg`
//! import pkg.mod as m       # binds `m` to `pkg.mod`
//! from pkg import a, b as c # attributes, or submodules when not attributes
//! from . import sibling     # relative to the module's package
//! from ..up.mod import x
//! name = "text"             # str, int, True/False, None
//! alias = pkg.mod.name      # dotted reference
//! raise "message"
//! ```

use crate::error::ImportError;
use crate::runtime::{Importer, ModuleObject, SourceExecutor, Value};
use std::sync::Arc;
use tracing::trace;

/// Executor for the statement subset above
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptExecutor;

impl ScriptExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl SourceExecutor for ScriptExecutor {
    fn execute(&self, source: &str, module: &Arc<ModuleObject>, importer: &dyn Importer) -> Result<(), ImportError> {
        let mut frame = Frame { module, importer };
        for (index, line) in source.lines().enumerate() {
            let statement = strip_comment(line).trim();
            if statement.is_empty() {
                continue;
            }
            trace!("{}:{}: {}", module.name(), index + 1, statement);
            frame.run(statement, index + 1)?;
        }
        Ok(())
    }
}

struct Frame<'a> {
    module: &'a Arc<ModuleObject>,
    importer: &'a dyn Importer,
}

impl Frame<'_> {
    fn error(&self, line: usize, message: impl std::fmt::Display) -> ImportError {
        ImportError::execution(self.module.name(), format!("line {}: {}", line, message))
    }

    fn run(&mut self, statement: &str, line: usize) -> Result<(), ImportError> {
        if let Some(rest) = keyword(statement, "import") {
            return self.import(rest, line);
        }
        if let Some(rest) = keyword(statement, "from") {
            return self.from_import(rest, line);
        }
        if let Some(rest) = keyword(statement, "raise") {
            let message = match parse_literal(rest) {
                Some(Value::Str(text)) => text,
                _ => rest.to_string(),
            };
            return Err(self.error(line, message));
        }
        if let Some((target, expr)) = statement.split_once('=') {
            let target = target.trim();
            if is_identifier(target) {
                let value = self.evaluate(expr.trim(), line)?;
                self.module.set(target, value);
                return Ok(());
            }
        }
        Err(self.error(line, format!("unsupported statement: {}", statement)))
    }

    fn import(&mut self, rest: &str, line: usize) -> Result<(), ImportError> {
        for item in rest.split(',') {
            let (name, alias) = split_alias(item.trim());
            if !is_dotted(name) {
                return Err(self.error(line, format!("invalid module name: {:?}", name)));
            }

            let module = self.importer.import_module(name)?;
            match alias {
                Some(alias) => self.module.set(alias, Value::Module(module)),
                None => {
                    let top = name.split('.').next().unwrap_or(name);
                    let top_module = self.importer.import_module(top)?;
                    self.module.set(top, Value::Module(top_module));
                }
            }
        }
        Ok(())
    }

    fn from_import(&mut self, rest: &str, line: usize) -> Result<(), ImportError> {
        let Some((module_ref, names)) = rest.split_once(" import ") else {
            return Err(self.error(line, "expected 'from <module> import <names>'"));
        };
        let target = self.resolve_relative(module_ref.trim(), line)?;
        let source = self.importer.import_module(&target)?;

        for item in names.split(',') {
            let (name, alias) = split_alias(item.trim());
            if !is_identifier(name) {
                return Err(self.error(line, format!("invalid name: {:?}", name)));
            }

            let value = match source.get(name) {
                Some(value) => value,
                None => {
                    let submodule = format!("{}.{}", target, name);
                    match self.importer.import_module(&submodule) {
                        Ok(module) => Value::Module(module),
                        Err(e) if e.is_not_found() => {
                            return Err(self.error(
                                line,
                                format!("cannot import name '{}' from '{}'", name, target),
                            ));
                        }
                        Err(e) => return Err(e),
                    }
                }
            };
            self.module.set(alias.unwrap_or(name), value);
        }
        Ok(())
    }

    /// Absolute module name for a possibly relative `from` target
    fn resolve_relative(&self, module_ref: &str, line: usize) -> Result<String, ImportError> {
        let level = module_ref.chars().take_while(|c| *c == '.').count();
        let rest = &module_ref[level..];
        if level == 0 {
            if !is_dotted(rest) {
                return Err(self.error(line, format!("invalid module name: {:?}", module_ref)));
            }
            return Ok(rest.to_string());
        }

        let Some(package) = self.module.package() else {
            return Err(self.error(line, "attempted relative import with no known parent package"));
        };

        let parts: Vec<&str> = package.split('.').collect();
        if level > parts.len() {
            return Err(self.error(line, "attempted relative import beyond top-level package"));
        }
        let base = parts[..parts.len() - (level - 1)].join(".");

        if rest.is_empty() {
            Ok(base)
        } else if is_dotted(rest) {
            Ok(format!("{}.{}", base, rest))
        } else {
            Err(self.error(line, format!("invalid module name: {:?}", module_ref)))
        }
    }

    fn evaluate(&self, expr: &str, line: usize) -> Result<Value, ImportError> {
        if let Some(value) = parse_literal(expr) {
            return Ok(value);
        }
        if !is_dotted(expr) {
            return Err(self.error(line, format!("invalid expression: {}", expr)));
        }

        let mut parts = expr.split('.');
        let first = parts.next().unwrap_or(expr);
        let mut value = self
            .module
            .get(first)
            .ok_or_else(|| self.error(line, format!("name '{}' is not defined", first)))?;

        for attr in parts {
            value = match value {
                Value::Module(module) => module.get(attr).ok_or_else(|| {
                    self.error(
                        line,
                        format!("module '{}' has no attribute '{}'", module.name(), attr),
                    )
                })?,
                other => {
                    return Err(self.error(line, format!("{} has no attribute '{}'", other, attr)));
                }
            };
        }
        Ok(value)
    }
}

fn keyword<'s>(statement: &'s str, word: &str) -> Option<&'s str> {
    statement
        .strip_prefix(word)
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map(str::trim)
}

fn split_alias(item: &str) -> (&str, Option<&str>) {
    match item.split_once(" as ") {
        Some((name, alias)) => (name.trim(), Some(alias.trim())),
        None => (item, None),
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (pos, c) in line.char_indices() {
        match (quote, c) {
            (None, '#') => return &line[..pos],
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    line
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

fn is_dotted(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

fn parse_literal(expr: &str) -> Option<Value> {
    match expr {
        "None" => return Some(Value::None),
        "True" | "true" => return Some(Value::Bool(true)),
        "False" | "false" => return Some(Value::Bool(false)),
        _ => {}
    }

    for quote in ['"', '\''] {
        if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
            return Some(Value::Str(expr[1..expr.len() - 1].to_string()));
        }
    }

    expr.parse::<i64>().ok().map(Value::Int)
}
