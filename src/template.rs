//! Rendering of beat configuration templates.
//!
//! Templates are plain text with `{{ name }}` placeholders. Every placeholder must
//! resolve to a supplied variable. An opening `{{` that does not start a valid
//! placeholder is rejected; a lone `}}` is ordinary text (YAML flow mappings).
use regex::Regex;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing::debug;

use crate::error::RenderError;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Finds an opening `{{` that is not part of a valid placeholder.
fn find_stray_braces(segment: &str) -> Option<usize> {
    segment.find("{{")
}

/// Substitutes `vars` into `template`.
pub fn render_str(
    template: &str,
    vars: &HashMap<String, String>,
) -> Result<String, RenderError> {
    let mut rendered = String::with_capacity(template.len());
    let mut cursor = 0;

    for caps in placeholder_re().captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let literal = &template[cursor..whole.start()];
        if let Some(offset) = find_stray_braces(literal) {
            return Err(RenderError::Malformed {
                offset: cursor + offset,
            });
        }
        rendered.push_str(literal);

        let name = &caps[1];
        let value = vars
            .get(name)
            .ok_or_else(|| RenderError::UnknownVariable(name.to_string()))?;
        rendered.push_str(value);
        cursor = whole.end();
    }

    let tail = &template[cursor..];
    if let Some(offset) = find_stray_braces(tail) {
        return Err(RenderError::Malformed {
            offset: cursor + offset,
        });
    }
    rendered.push_str(tail);

    Ok(rendered)
}

/// Reads `template_path`, substitutes `vars` and writes the result to `output_path`,
/// creating parent directories as needed.
pub fn render_file(
    template_path: &Path,
    output_path: &Path,
    vars: &HashMap<String, String>,
) -> Result<PathBuf, RenderError> {
    let template =
        fs::read_to_string(template_path).map_err(|source| RenderError::ReadError {
            path: template_path.to_path_buf(),
            source,
        })?;

    let rendered = render_str(&template, vars)?;

    let write_error = |source| RenderError::WriteError {
        path: output_path.to_path_buf(),
        source,
    };
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(output_path, rendered).map_err(write_error)?;

    debug!(
        "Rendered {:?} into {:?} with {} variable(s)",
        template_path,
        output_path,
        vars.len()
    );
    Ok(output_path.to_path_buf())
}
