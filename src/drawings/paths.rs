//! Folder and file naming rules for drawing uploads.
//!
//! Everything here is pure: storage paths are derived from the destination's
//! project / category / discipline names, an optional module package folder,
//! and the versions that already exist for a drawing.

use std::sync::LazyLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use crate::core::{Destination, QueueError, Result};

static BUILDING_LEVEL_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)B\d+[-_]?L\d+[-_]?M\d+").expect("valid regex"));
static LEVEL_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)L\d+[-_]?M\d+").expect("valid regex"));
static BARE_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[^A-Za-z0-9])(M(?:odule)?[-_]?\d+)").expect("valid regex"));
static GENERIC_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:module|mod|unit)[-_\s]*\d+").expect("valid regex"));

/// Package folder name for a module: `"{serial}"`, `"{serial} | {blm}"` or
/// `"{serial} | {hitch} / {rear}"`.
///
/// An empty serial number yields an empty name; callers decide whether that is
/// acceptable.
pub fn module_package_folder_name(serial_number: &str, hitch_blm: &str, rear_blm: &str) -> String {
    let serial = serial_number.trim();
    if serial.is_empty() {
        return String::new();
    }

    let hitch = hitch_blm.trim();
    let rear = rear_blm.trim();
    match (hitch.is_empty(), rear.is_empty()) {
        (false, false) if hitch != rear => format!("{serial} | {hitch} / {rear}"),
        (false, _) => format!("{serial} | {hitch}"),
        (true, false) => format!("{serial} | {rear}"),
        (true, true) => serial.to_string(),
    }
}

/// Best-effort module id extraction from a file name.
///
/// Patterns are tried in order (`B1L2M3`, `L2M3`, `M3`/`Module3`, then a
/// `module|mod|unit` prefix followed by digits) and the first match wins. The
/// result is uppercased with separators removed.
pub fn parse_module_id(file_name: &str) -> Option<String> {
    let matched = BUILDING_LEVEL_MODULE
        .find(file_name)
        .or_else(|| LEVEL_MODULE.find(file_name))
        .or_else(|| {
            BARE_MODULE
                .captures(file_name)
                .and_then(|captures| captures.get(1))
        })
        .or_else(|| GENERIC_MODULE.find(file_name))?;

    Some(
        matched
            .as_str()
            .chars()
            .filter(|c| !matches!(c, '-' | '_') && !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect(),
    )
}

/// `max(existing) + 1` formatted with one decimal; unparseable labels count as 0.
pub fn next_version_label<I, S>(existing: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let max = existing
        .into_iter()
        .filter_map(|label| label.as_ref().trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .fold(0.0_f64, f64::max);

    format!("{:.1}", max + 1.0)
}

/// Split `name.ext` into `("name", Some("ext"))`. Dotfiles have no extension.
pub fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(index) if index > 0 && index + 1 < file_name.len() => {
            (&file_name[..index], Some(&file_name[index + 1..]))
        }
        _ => (file_name, None),
    }
}

/// `{base}_v{version}.{ext}`
pub fn versioned_file_name(file_name: &str, version: &str) -> String {
    match split_extension(file_name) {
        (base, Some(ext)) => format!("{base}_v{version}.{ext}"),
        (base, None) => format!("{base}_v{version}"),
    }
}

/// Returns `original_name` unless it collides (case-insensitively) with an
/// existing name, in which case `_v{N}` is appended before the extension. `N` is
/// one more than the highest `_v{k}` already used for the same base name; an
/// unsuffixed original counts as `_v1`.
pub fn next_available_filename<S: AsRef<str>>(original_name: &str, existing: &[S]) -> String {
    let collides = existing
        .iter()
        .any(|name| name.as_ref().to_lowercase() == original_name.to_lowercase());
    if !collides {
        return original_name.to_string();
    }

    let (base, ext) = split_extension(original_name);
    let ext_pattern = ext
        .map(|ext| format!(r"\.{}", regex::escape(ext)))
        .unwrap_or_default();
    let pattern = format!(r"(?i)^{}_v(\d+){}$", regex::escape(base), ext_pattern);

    let highest = Regex::new(&pattern)
        .ok()
        .map(|suffix| {
            existing
                .iter()
                .filter_map(|name| {
                    suffix
                        .captures(name.as_ref())
                        .and_then(|captures| captures[1].parse::<u32>().ok())
                })
                .fold(1, u32::max)
        })
        .unwrap_or(1);

    let next = highest + 1;
    match ext {
        Some(ext) => format!("{base}_v{next}.{ext}"),
        None => format!("{base}_v{next}"),
    }
}

pub fn is_module_packages(discipline_name: &str, module_packages_discipline: &str) -> bool {
    discipline_name
        .trim()
        .eq_ignore_ascii_case(module_packages_discipline.trim())
}

/// Canonical storage location: `project/category/discipline[/module]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FolderPath {
    pub project: String,
    pub category: String,
    pub discipline: String,
    pub module: Option<String>,
}

impl FolderPath {
    /// Resolve the destination folder for `file_name`.
    ///
    /// Module package uploads always land in a module subfolder, taken from the
    /// explicit folder name, the module's serial/BLM tags, or the id parsed from
    /// the file name, in that order.
    pub fn resolve(destination: &Destination, file_name: &str, module_packages_discipline: &str) -> Result<Self> {
        let project = required(&destination.project_name, "project name")?;
        let category = required(&destination.category_name, "category name")?;
        let discipline = required(&destination.discipline_name, "discipline name")?;

        let explicit = destination
            .module_folder_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let module = if explicit.is_some() {
            explicit
        } else if is_module_packages(&discipline, module_packages_discipline) {
            let derived = destination
                .module
                .as_ref()
                .map(|module| module_package_folder_name(&module.serial_number, &module.hitch_blm, &module.rear_blm))
                .filter(|name| !name.is_empty())
                .or_else(|| parse_module_id(file_name));

            match derived {
                Some(name) => Some(name),
                None => {
                    return Err(QueueError::folder(format!(
                        "cannot determine module folder for {file_name}"
                    )));
                }
            }
        } else {
            None
        };

        Ok(Self {
            project,
            category,
            discipline,
            module,
        })
    }

    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.project.as_str(), self.category.as_str(), self.discipline.as_str()];
        if let Some(module) = &self.module {
            segments.push(module);
        }
        segments
    }
}

impl std::fmt::Display for FolderPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments().join("/"))
    }
}

fn required(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QueueError::folder(format!("missing {what}")));
    }
    Ok(value.to_string())
}
