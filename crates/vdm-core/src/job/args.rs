//! Download invocation arguments.

use super::format::FormatSelector;
use super::progress::{DOWNLOAD_TEMPLATE, POSTPROCESS_TEMPLATE};

const FORMAT_FLAGS: &[&str] = &["-f", "--format"];
const OUTPUT_FLAGS: &[&str] = &["-o", "-P", "--paths"];

/// Drops empty arguments and anything that looks like shell expansion or chaining.
pub fn sanitize_params(params: Vec<String>) -> Vec<String> {
    params
        .into_iter()
        .filter(|p| !p.is_empty() && !p.contains("${") && !p.contains("&&"))
        .collect()
}

/// Returns true when `params` already contains one of `flags`.
fn has_flag(params: &[String], flags: &[&str]) -> bool {
    params.iter().any(|p| flags.contains(&p.as_str()))
}

/// Truncates the URL at the first `?list` so a single video is downloaded.
pub fn strip_playlist_suffix(url: &str) -> &str {
    url.split("?list").next().unwrap_or(url)
}

/// Builds the argv (without the program) for a download.
///
/// A derived `-f` is dropped if the caller passed `-f`/`--format`, and `-o` is
/// skipped if the caller chose the output with `-o`/`-P`/`--paths`.
pub fn download_args(
    url: &str,
    params: &[String],
    format: Option<&FormatSelector>,
    output_template: &str,
) -> Vec<String> {
    let mut args: Vec<String> = [
        strip_playlist_suffix(url),
        "--newline",
        "--no-colors",
        "--no-playlist",
        "--progress-template",
        DOWNLOAD_TEMPLATE,
        "--progress-template",
        POSTPROCESS_TEMPLATE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(selector) = format {
        if has_flag(params, FORMAT_FLAGS) {
            tracing::debug!(url, "caller supplied a format, ignoring preferences");
        } else {
            args.push("-f".to_string());
            args.push(selector.to_string());
        }
    }

    if !has_flag(params, OUTPUT_FLAGS) {
        args.push("-o".to_string());
        args.push(output_template.to_string());
    }

    args.extend(params.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::format::FormatPreference;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sanitize_drops_expansions_and_empties() {
        let params = strings(&["--embed-thumbnail", "", "${HOME}", "a && rm -rf /", "-x"]);
        assert_eq!(sanitize_params(params), strings(&["--embed-thumbnail", "-x"]));
    }

    #[test]
    fn playlist_suffix_is_stripped() {
        assert_eq!(
            strip_playlist_suffix("https://e.com/watch?v=a?list=PL1"),
            "https://e.com/watch?v=a"
        );
        assert_eq!(strip_playlist_suffix("https://e.com/watch?v=a"), "https://e.com/watch?v=a");
    }

    #[test]
    fn base_layout() {
        let args = download_args("https://e.com/v", &[], None, "/m/%(title)s.%(ext)s");
        assert_eq!(
            args,
            strings(&[
                "https://e.com/v",
                "--newline",
                "--no-colors",
                "--no-playlist",
                "--progress-template",
                DOWNLOAD_TEMPLATE,
                "--progress-template",
                POSTPROCESS_TEMPLATE,
                "-o",
                "/m/%(title)s.%(ext)s",
            ])
        );
    }

    #[test]
    fn derived_format_precedes_output_and_params() {
        let sel = FormatPreference::new(["720p"], ["mp4"]).selector();
        let args = download_args("u", &strings(&["--embed-subs"]), sel.as_ref(), "t");
        let tail = &args[8..];
        assert_eq!(tail[0], "-f");
        assert!(tail[1].starts_with("bv*[height<=720][ext=mp4]"));
        assert_eq!(&tail[2..], &strings(&["-o", "t", "--embed-subs"])[..]);
    }

    #[test]
    fn user_format_suppresses_derived_one() {
        let sel = FormatPreference::new(["1080p"], ["mp4"]).selector();
        let args = download_args("u", &strings(&["-f", "opus"]), sel.as_ref(), "t");
        assert_eq!(args.iter().filter(|a| *a == "-f").count(), 1);
        assert!(!args.iter().any(|a| a.contains("height<=")));
        assert_eq!(&args[args.len() - 2..], &strings(&["-f", "opus"])[..]);
    }

    #[test]
    fn user_output_flags_suppress_template() {
        for flag in ["-o", "-P", "--paths"] {
            let args = download_args("u", &strings(&[flag, "/elsewhere"]), None, "t");
            assert!(!args.contains(&"t".to_string()), "flag {}", flag);
        }
    }
}
