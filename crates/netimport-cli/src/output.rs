//! Colored module reports.
//!
//! Respects `NO_COLOR`.

use netimport::ModuleObject;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

pub fn color_choice() -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

/// Metadata lines of a module, in display order
pub fn metadata(module: &ModuleObject) -> Vec<(&'static str, String)> {
    let or_none = |value: Option<&str>| value.unwrap_or("None").to_string();
    vec![
        ("name", module.name().to_string()),
        ("origin", or_none(module.origin())),
        ("path", or_none(module.path())),
        ("package", or_none(module.package())),
        ("loader", module.loader().to_string()),
        (
            "kind",
            if module.is_package() { "package" } else { "module" }.to_string(),
        ),
    ]
}

/// Print a module's metadata and public attributes to stdout
pub fn print_module(module: &ModuleObject) -> io::Result<()> {
    let mut out = StandardStream::stdout(color_choice());

    out.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
    write!(out, "<module '{}'>", module.name())?;
    out.reset()?;
    writeln!(out)?;

    for (key, value) in metadata(module) {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(out, "  {:<8}", key)?;
        out.reset()?;
        writeln!(out, " {}", value)?;
    }

    let attributes = module.public_attributes();
    if !attributes.is_empty() {
        out.set_color(ColorSpec::new().set_bold(true))?;
        write!(out, "attributes")?;
        out.reset()?;
        writeln!(out)?;
        for (name, value) in attributes {
            writeln!(out, "  {} = {}", name, value)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_order() {
        let module = ModuleObject::new("pkg.mod", "https://example.com")
            .with_origin("https://example.com/pkg/mod.py")
            .with_package(Some("pkg".to_string()));

        let keys: Vec<_> = metadata(&module).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["name", "origin", "path", "package", "loader", "kind"]);
        assert_eq!(metadata(&module)[3].1, "pkg");
    }

    #[test]
    fn test_metadata_without_origin() {
        let module = ModuleObject::new("netimport", "builtin");
        assert_eq!(metadata(&module)[1].1, "None");
    }
}
