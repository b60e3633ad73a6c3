//! Output location of a job: base directory, filename template, optional
//! subfolder and the path the tool finally reported.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Template used when the request does not rename the file.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "%(title)s.%(ext)s";

const EXT_PLACEHOLDER: &str = ".%(ext)s";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutput {
    pub path: String,
    pub filename: String,
    #[serde(rename = "savedFilePath")]
    pub saved_file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_folder: Option<String>,
}

impl DownloadOutput {
    /// Output with a sanitized subfolder (see [`sanitize_folder_name`]).
    pub fn new(path: String, filename: String, channel_folder: Option<&str>) -> Self {
        Self {
            path,
            filename,
            saved_file_path: String::new(),
            channel_folder: channel_folder
                .filter(|f| !f.is_empty())
                .map(sanitize_folder_name),
        }
    }

    /// Fills in the base path and filename template when missing and
    /// normalizes the extension placeholder.
    pub fn apply_defaults(&mut self, default_path: &str) {
        if self.path.is_empty() {
            self.path = default_path.to_string();
        }
        if self.filename.is_empty() {
            self.filename = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
        self.filename = build_filename(&self.filename);
    }

    /// `<path>/<channel_folder>/<filename>`, or `<path>/<filename>` without a subfolder.
    pub fn full_template(&self) -> String {
        let mut full = PathBuf::from(&self.path);
        if let Some(folder) = &self.channel_folder {
            full.push(folder);
        }
        full.push(&self.filename);
        full.to_string_lossy().into_owned()
    }
}

/// Appends `.%(ext)s` when the template has no extension placeholder and
/// collapses an accidental double placeholder.
pub fn build_filename(name: &str) -> String {
    let mut out = name.to_string();
    if !out.is_empty() && !out.contains("%(ext)s") {
        out.push_str(EXT_PLACEHOLDER);
    }
    out.replacen(".%(ext)s.%(ext)s", EXT_PLACEHOLDER, 1)
}

/// Makes a requested subfolder safe to join under the download path.
///
/// - Replaces `/`, `\` and `..` with `_`
/// - Replaces `< > : " | ? *` with `_`
/// - An empty result becomes `_`
pub fn sanitize_folder_name(raw: &str) -> String {
    let mut out = raw.replace(['/', '\\'], "_").replace("..", "_");
    out = out.replace(['<', '>', ':', '"', '|', '?', '*'], "_");
    if out.is_empty() {
        out.push('_');
    }
    out
}
