//! Format selector construction from quality and container preferences.
//!
//! Preferences are expanded into an ordered list of alternatives which the
//! tool tries left to right, so earlier entries win:
//!
//! 1. for each quality, merged video+audio in each container, video-only in
//!    each container, then the quality alone;
//! 2. best single file in each container;
//! 3. `best`.

use std::fmt;

/// One quality token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    /// `"1080p"`: best video no taller than the given height.
    MaxHeight(u32),
    /// `"best"`: best video, any height.
    Best,
    /// Anything else is passed through as a raw selector.
    Raw(String),
}

impl Quality {
    pub fn parse(token: &str) -> Self {
        if token == "best" {
            return Quality::Best;
        }
        match token.strip_suffix('p').map(str::parse::<u32>) {
            Some(Ok(h)) => Quality::MaxHeight(h),
            _ => Quality::Raw(token.to_string()),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::MaxHeight(h) => write!(f, "bv*[height<={}]", h),
            Quality::Best => f.write_str("bv*"),
            Quality::Raw(s) => f.write_str(s),
        }
    }
}

/// One `/`-separated alternative of a [`FormatSelector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alternative {
    /// `Q[ext=E]+ba[ext=E]`
    Merged { quality: Quality, ext: String },
    /// `Q[ext=E]`
    VideoIn { quality: Quality, ext: String },
    /// `Q`
    Video(Quality),
    /// `b[ext=E]`
    BestIn(String),
    /// `best`
    Best,
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alternative::Merged { quality, ext } => {
                write!(f, "{}[ext={}]+ba[ext={}]", quality, ext, ext)
            }
            Alternative::VideoIn { quality, ext } => write!(f, "{}[ext={}]", quality, ext),
            Alternative::Video(q) => write!(f, "{}", q),
            Alternative::BestIn(ext) => write!(f, "b[ext={}]", ext),
            Alternative::Best => f.write_str("best"),
        }
    }
}

/// Complete selector passed to `-f`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSelector(Vec<Alternative>);

impl FormatSelector {
    pub fn alternatives(&self) -> &[Alternative] {
        &self.0
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, alt) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", alt)?;
        }
        Ok(())
    }
}

/// Requested qualities and containers for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatPreference {
    qualities: Vec<Quality>,
    extensions: Vec<String>,
}

impl FormatPreference {
    pub fn new<Q, E>(qualities: Q, extensions: E) -> Self
    where
        Q: IntoIterator,
        Q::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            qualities: qualities
                .into_iter()
                .map(|q| Quality::parse(q.as_ref()))
                .collect(),
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.qualities.is_empty() && self.extensions.is_empty()
    }

    /// Selector for this preference; `None` when nothing was requested.
    pub fn selector(&self) -> Option<FormatSelector> {
        if self.is_empty() {
            return None;
        }
        let mut alts = Vec::new();
        for q in &self.qualities {
            for ext in &self.extensions {
                alts.push(Alternative::Merged {
                    quality: q.clone(),
                    ext: ext.clone(),
                });
                alts.push(Alternative::VideoIn {
                    quality: q.clone(),
                    ext: ext.clone(),
                });
            }
            alts.push(Alternative::Video(q.clone()));
        }
        alts.extend(self.extensions.iter().cloned().map(Alternative::BestIn));
        alts.push(Alternative::Best);
        Some(FormatSelector(alts))
    }
}
