//! Form registry entries and URL-to-form matching.
//!
//! A registered form is identified by its `FormCode` and mapped to the
//! application by a `FormUrl`. Request paths are resolved to a form by
//! testing every entry, in order, against four rules:
//!
//! 1. **Exact**: normalized path equals the normalized form URL
//! 2. **Segment**: path starts with `form_url + "/"`
//! 3. **Loose prefix**: path starts with `form_url` with no boundary
//! 4. **Wildcard**: form URL contains `*`, which matches any sequence
//!
//! The first entry satisfying any rule wins, so entries must be ordered
//! longest URL first for the most specific form to be chosen.
//!
//! Rule 3 subsumes rule 2. It is kept because some registered URLs rely on
//! it, but it also lets `/abcsomething` resolve to a form at `/abc`, so a
//! match that depends on it alone is reported with a warning.

use serde::{Deserialize, Serialize};

/// A form as stored in the form registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FormRegistryEntry {
    /// Stable identifier used as the permission grant key.
    pub form_code: String,
    /// Human readable form name.
    pub form_name: String,
    /// Module the form belongs to (inspections, HR, ...).
    #[serde(default)]
    pub module_name: String,
    /// URL pattern, may contain `*`.
    pub form_url: String,
    /// Inactive forms are never loaded into the cache.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl FormRegistryEntry {
    /// Create an active entry.
    pub fn new(
        form_code: impl Into<String>,
        form_name: impl Into<String>,
        form_url: impl Into<String>,
    ) -> Self {
        Self {
            form_code: form_code.into(),
            form_name: form_name.into(),
            module_name: String::new(),
            form_url: form_url.into(),
            is_active: true,
        }
    }

    /// Set the module name.
    pub fn module(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = module_name.into();
        self
    }

    /// Mark the entry inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Length used to order entries, most specific first.
    pub fn url_len(&self) -> usize {
        self.form_url.chars().count()
    }
}

/// Normalize a request path or form URL for matching.
///
/// Strips the query string and fragment, one trailing slash, and lowercases.
///
/// ```
/// use axum_form_access::normalize_path;
///
/// assert_eq!(normalize_path("/OHS-Inspection/List/?page=2"), "/ohs-inspection/list");
/// assert_eq!(normalize_path("/"), "");
/// ```
pub fn normalize_path(path: &str) -> String {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    let path = path.strip_suffix('/').unwrap_or(path);
    path.to_ascii_lowercase()
}

/// A compiled `*` wildcard pattern.
///
/// `*` matches any, possibly empty, sequence of characters including `/`.
/// Every other character is matched literally. The pattern is anchored at
/// both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Literal pieces between the stars.
    parts: Vec<String>,
}

impl UrlPattern {
    /// Compile a pattern. Returns `None` when the input has no `*`.
    pub fn compile(pattern: &str) -> Option<Self> {
        if !pattern.contains('*') {
            return None;
        }
        Some(Self {
            parts: pattern.split('*').map(str::to_string).collect(),
        })
    }

    /// Test a full match against `path`.
    pub fn matches(&self, path: &str) -> bool {
        // split on '*' always yields at least two parts for a compiled pattern
        let (first, rest) = match self.parts.split_first() {
            Some(split) => split,
            None => return false,
        };
        let (last, middle) = match rest.split_last() {
            Some(split) => split,
            None => return path == first,
        };

        let Some(mut remaining) = path.strip_prefix(first.as_str()) else {
            return false;
        };
        for part in middle {
            match remaining.find(part.as_str()) {
                Some(idx) => remaining = &remaining[idx + part.len()..],
                None => return false,
            }
        }
        remaining.len() >= last.len() && remaining.ends_with(last.as_str())
    }
}

/// Which matching rule resolved a path to a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Path equals the form URL.
    Exact,
    /// Path is below the form URL on a `/` boundary.
    Segment,
    /// Path merely starts with the form URL.
    LoosePrefix,
    /// Path matches the form URL's `*` pattern.
    Wildcard,
}

/// A registry entry with its URL normalized and its wildcard precompiled.
#[derive(Debug, Clone)]
pub struct CompiledForm {
    /// The registry entry.
    pub entry: FormRegistryEntry,
    normalized_url: String,
    wildcard: Option<UrlPattern>,
}

impl CompiledForm {
    /// Compile an entry for matching.
    pub fn new(entry: FormRegistryEntry) -> Self {
        let normalized_url = normalize_path(&entry.form_url);
        let wildcard = UrlPattern::compile(&normalized_url);
        Self {
            entry,
            normalized_url,
            wildcard,
        }
    }

    /// The normalized form URL.
    pub fn normalized_url(&self) -> &str {
        &self.normalized_url
    }

    /// The form code.
    pub fn form_code(&self) -> &str {
        &self.entry.form_code
    }

    /// Match an already normalized path against this form.
    pub fn matches(&self, path: &str) -> Option<MatchKind> {
        let url = self.normalized_url.as_str();

        if path == url {
            return Some(MatchKind::Exact);
        }

        // A root form ("/" normalizes to "") claims every path; sorted last, it
        // is only reached when nothing more specific matched.
        if path.len() > url.len() && path.starts_with(url) && path.as_bytes()[url.len()] == b'/' {
            return Some(MatchKind::Segment);
        }
        if path.starts_with(url) {
            return Some(MatchKind::LoosePrefix);
        }

        match &self.wildcard {
            Some(pattern) if pattern.matches(path) => Some(MatchKind::Wildcard),
            _ => None,
        }
    }
}

/// Result of resolving a path to a form.
#[derive(Debug, Clone, Copy)]
pub struct FormMatch<'a> {
    /// The matched form.
    pub form: &'a CompiledForm,
    /// The rule that matched.
    pub kind: MatchKind,
}

/// Find the first form in `forms` matching `path`.
///
/// `path` is normalized here; `forms` must already be ordered longest URL
/// first (see [`FormRegistryCache`](crate::FormRegistryCache)).
///
/// ```
/// use axum_form_access::{match_form, CompiledForm, FormRegistryEntry};
///
/// let forms = [
///     FormRegistryEntry::new("OHS_SETTINGS", "OHS Settings", "/ohs-inspection/settings"),
///     FormRegistryEntry::new("OHS", "OHS Inspection", "/ohs-inspection"),
/// ]
/// .into_iter()
/// .map(CompiledForm::new)
/// .collect::<Vec<_>>();
///
/// let found = match_form("/ohs-inspection/settings/areas", &forms).unwrap();
/// assert_eq!(found.form.form_code(), "OHS_SETTINGS");
/// ```
pub fn match_form<'a>(path: &str, forms: &'a [CompiledForm]) -> Option<FormMatch<'a>> {
    let path = normalize_path(path);
    let found = forms
        .iter()
        .find_map(|form| form.matches(&path).map(|kind| FormMatch { form, kind }))?;

    if found.kind == MatchKind::LoosePrefix {
        tracing::warn!(
            path = %path,
            form_code = %found.form.entry.form_code,
            form_url = %found.form.entry.form_url,
            "Form matched by loose prefix without a path boundary"
        );
    }

    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Log output collected by a test subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warnings_during(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = logs.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    fn compile(mut entries: Vec<FormRegistryEntry>) -> Vec<CompiledForm> {
        entries.sort_by_key(|e| std::cmp::Reverse(e.url_len()));
        entries.into_iter().map(CompiledForm::new).collect()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/Theft/Report/"), "/theft/report");
        assert_eq!(normalize_path("/theft/report?id=4&x=/"), "/theft/report");
        assert_eq!(normalize_path("/theft#top"), "/theft");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_exact_url_returns_entry() {
        let forms = compile(vec![
            FormRegistryEntry::new("SEC_LOG", "Security Log", "/security/logs"),
            FormRegistryEntry::new("HR_APPROVAL", "HR Approvals", "/hr/approvals"),
        ]);

        for form in &forms {
            let found = match_form(&form.entry.form_url, &forms).unwrap();
            assert_eq!(found.form.form_code(), form.form_code());
            assert_eq!(found.kind, MatchKind::Exact);
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let forms = compile(vec![
            FormRegistryEntry::new("A", "A", "/a"),
            FormRegistryEntry::new("AB", "A/B", "/a/b"),
        ]);

        let found = match_form("/a/b/c", &forms).unwrap();
        assert_eq!(found.form.form_code(), "AB");
        assert_eq!(found.kind, MatchKind::Segment);

        let found = match_form("/a/x", &forms).unwrap();
        assert_eq!(found.form.form_code(), "A");
    }

    #[test]
    fn test_unmatched_path_returns_none() {
        let forms = compile(vec![FormRegistryEntry::new("A", "A", "/a")]);
        assert!(match_form("/b", &forms).is_none());
        assert!(match_form("/", &forms).is_none());
    }

    #[test]
    fn test_loose_prefix_has_no_boundary() {
        // Kept for registered URLs that depend on it: /abc also claims /abcsomething.
        let forms = compile(vec![FormRegistryEntry::new("ABC", "ABC", "/abc")]);

        let found = match_form("/abcsomething", &forms).unwrap();
        assert_eq!(found.form.form_code(), "ABC");
        assert_eq!(found.kind, MatchKind::LoosePrefix);

        // With a boundary the segment rule is reported instead.
        let found = match_form("/abc/1", &forms).unwrap();
        assert_eq!(found.kind, MatchKind::Segment);
    }

    #[test]
    fn test_case_and_trailing_slash_ignored() {
        let forms = compile(vec![FormRegistryEntry::new("THEFT", "Theft", "/Theft-Report/")]);
        let found = match_form("/theft-report?x=1", &forms).unwrap();
        assert_eq!(found.kind, MatchKind::Exact);
    }

    #[test]
    fn test_wildcard_pattern() {
        let forms = compile(vec![FormRegistryEntry::new(
            "CLEAN",
            "Cleaning Checklist",
            "/inspections/*/cleaning",
        )]);

        let found = match_form("/inspections/42/cleaning", &forms).unwrap();
        assert_eq!(found.kind, MatchKind::Wildcard);
        // * spans segments
        assert!(match_form("/inspections/site/7/cleaning", &forms).is_some());
        assert!(match_form("/inspections/42/cleaning/edit", &forms).is_none());
    }

    #[test]
    fn test_url_pattern_edges() {
        let pattern = UrlPattern::compile("/a*").unwrap();
        assert!(pattern.matches("/a"));
        assert!(pattern.matches("/abc/d"));
        assert!(!pattern.matches("/b"));

        let pattern = UrlPattern::compile("*/x*y").unwrap();
        assert!(pattern.matches("/q/xzzy"));
        assert!(!pattern.matches("/q/xzz"));

        // overlapping prefix and suffix must not share characters
        let pattern = UrlPattern::compile("/ab*ba").unwrap();
        assert!(!pattern.matches("/aba"));
        assert!(pattern.matches("/abba"));

        assert!(UrlPattern::compile("/plain").is_none());
    }

    #[test]
    fn test_root_form_catches_unmatched_paths() {
        let forms = compile(vec![
            FormRegistryEntry::new("HOME", "Home", "/"),
            FormRegistryEntry::new("THEFT", "Theft Report", "/theft-report"),
        ]);

        let found = match_form("/", &forms).unwrap();
        assert_eq!(found.form.form_code(), "HOME");
        assert_eq!(found.kind, MatchKind::Exact);

        let found = match_form("/anything/here", &forms).unwrap();
        assert_eq!(found.form.form_code(), "HOME");
        assert_eq!(found.kind, MatchKind::Segment);

        let found = match_form("/theft-report/3", &forms).unwrap();
        assert_eq!(found.form.form_code(), "THEFT");
    }

    #[test]
    fn test_loose_prefix_match_is_logged() {
        let forms = compile(vec![FormRegistryEntry::new("ABC", "ABC", "/abc")]);

        let logs = warnings_during(|| {
            assert!(match_form("/abcsomething", &forms).is_some());
        });
        assert!(logs.contains("WARN"));
        assert!(logs.contains("loose prefix"));
        assert!(logs.contains("ABC"));
        assert!(logs.contains("/abcsomething"));
    }

    #[test]
    fn test_bounded_matches_are_not_logged() {
        let forms = compile(vec![FormRegistryEntry::new("ABC", "ABC", "/abc")]);

        let logs = warnings_during(|| {
            assert_eq!(match_form("/abc", &forms).unwrap().kind, MatchKind::Exact);
            assert_eq!(match_form("/abc/7", &forms).unwrap().kind, MatchKind::Segment);
            assert!(match_form("/xyz", &forms).is_none());
        });
        assert!(logs.is_empty(), "unexpected log output: {logs}");
    }
}
