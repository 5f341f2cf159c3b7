//! JavaScript dependency classifier
//!
//! Decides whether a page needs client-side script to render its content.
//! The decision is a fixed, ordered table of heuristics over the raw
//! markup; every rule that matches contributes its reason.

use regex::Regex;
use std::sync::OnceLock;

/// Outcome of classifying one page
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Classification {
    pub is_dependent: bool,
    /// Reasons of every matching rule, in rule order
    pub reasons: Vec<&'static str>,
}

impl Classification {
    /// Reasons encoded for the `javascript_dependency_reasons` column
    pub fn reasons_json(&self) -> String {
        serde_json::to_string(&self.reasons).unwrap_or_else(|_| "[]".to_string())
    }
}

enum Matcher {
    /// Matches if any needle occurs in the markup
    Literals(&'static [&'static str]),
    Pattern(Regex),
    /// Matches if any captured block contains any needle
    Block {
        block: Regex,
        needles: &'static [&'static str],
    },
}

struct Rule {
    matcher: Matcher,
    reason: &'static str,
}

impl Rule {
    fn matches(&self, html: &str) -> bool {
        match &self.matcher {
            Matcher::Literals(needles) => needles.iter().any(|n| html.contains(n)),
            Matcher::Pattern(re) => re.is_match(html),
            Matcher::Block { block, needles } => block
                .captures_iter(html)
                .filter_map(|caps| caps.get(1))
                .any(|inner| needles.iter().any(|n| inner.as_str().contains(n))),
        }
    }
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("classifier pattern is valid")
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Rule {
                matcher: Matcher::Block {
                    block: regex(r"(?is)<noscript[^>]*>(.*?)</noscript>"),
                    needles: &["JavaScript", "javascript", "enable", "browser"],
                },
                reason: "noscript block asks the browser to enable JavaScript",
            },
            Rule {
                matcher: Matcher::Literals(&[
                    "ember-application",
                    "ember-view",
                    "Ember.Application",
                    "ember.js",
                    "ember.min.js",
                ]),
                reason: "Ember.js application markers found",
            },
            Rule {
                matcher: Matcher::Literals(&[
                    "data-reactroot",
                    "data-reactid",
                    "react-dom",
                    "React.createElement",
                    "__NEXT_DATA__",
                ]),
                reason: "React application markers found",
            },
            Rule {
                matcher: Matcher::Literals(&[
                    "ng-app",
                    "ng-version",
                    "ng-controller",
                    "angular.js",
                    "angular.min.js",
                ]),
                reason: "Angular application markers found",
            },
            Rule {
                matcher: Matcher::Literals(&[
                    "data-v-",
                    "v-cloak",
                    "vue.js",
                    "vue.min.js",
                    "Vue.createApp",
                    "new Vue(",
                ]),
                reason: "Vue.js application markers found",
            },
            Rule {
                matcher: Matcher::Literals(&[
                    "webpackJsonp",
                    "__webpack_require__",
                    "webpackChunk",
                    "parcelRequire",
                    "rollup",
                    "browserify",
                ]),
                reason: "bundler runtime (webpack/parcel/rollup/browserify) found",
            },
            Rule {
                matcher: Matcher::Pattern(regex(
                    r#"(?i)<script[^>]*\bsrc\s*=\s*["'][^"']*bundle[^"']*["']"#,
                )),
                reason: "script bundle referenced",
            },
            Rule {
                matcher: Matcher::Literals(&[
                    "history.pushState",
                    "router-view",
                    "router-outlet",
                    "ng-view",
                    "react-router",
                    "data-router",
                ]),
                reason: "client-side SPA routing found",
            },
            Rule {
                matcher: Matcher::Pattern(regex(
                    r#"(?i)<div[^>]*\bid\s*=\s*["'](?:app|root)["'][^>]*>\s*</div>"#,
                )),
                reason: "empty SPA mount point found",
            },
        ]
    })
}

/// Classifies raw markup for JavaScript dependency
///
/// A page is dependent if at least one heuristic matches. Empty markup is
/// never dependent.
///
/// # Example
///
/// ```
/// use crawldb::classify;
///
/// let c = classify(r#"<script src="/static/bundle.js"></script>"#);
/// assert!(c.is_dependent);
/// assert_eq!(c.reasons, vec!["script bundle referenced"]);
///
/// assert!(!classify("<p>plain</p>").is_dependent);
/// ```
pub fn classify(html: &str) -> Classification {
    if html.trim().is_empty() {
        return Classification::default();
    }

    let reasons: Vec<&'static str> = rules()
        .iter()
        .filter(|rule| rule.matches(html))
        .map(|rule| rule.reason)
        .collect();

    Classification {
        is_dependent: !reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_markup_not_dependent() {
        assert_eq!(classify(""), Classification::default());
        assert_eq!(classify("   \n"), Classification::default());
    }

    #[test]
    fn test_static_page_not_dependent() {
        let c = classify("<html><body><h1>Hello</h1><a href='/x'>x</a></body></html>");
        assert!(!c.is_dependent);
        assert!(c.reasons.is_empty());
        assert_eq!(c.reasons_json(), "[]");
    }

    #[test]
    fn test_noscript_asking_for_javascript() {
        let c = classify("<noscript>Please enable JavaScript to continue</noscript>");
        assert!(c.is_dependent);
        assert_eq!(c.reasons, vec!["noscript block asks the browser to enable JavaScript"]);
    }

    #[test]
    fn test_noscript_without_request_ignored() {
        let c = classify("<noscript><img src='/pixel.gif'></noscript>");
        assert!(!c.is_dependent);
    }

    #[test]
    fn test_framework_markers() {
        assert_eq!(
            classify("<div class=\"ember-view\"></div>").reasons,
            vec!["Ember.js application markers found"]
        );
        assert_eq!(
            classify("<div data-reactroot=\"\">hi</div>").reasons,
            vec!["React application markers found"]
        );
        assert_eq!(
            classify("<html ng-app=\"shop\"><body>x</body></html>").reasons,
            vec!["Angular application markers found"]
        );
        assert_eq!(
            classify("<span data-v-3f1a>x</span>").reasons,
            vec!["Vue.js application markers found"]
        );
    }

    #[test]
    fn test_bundler_runtime() {
        let c = classify("<script>(window.webpackJsonp = window.webpackJsonp || [])</script>");
        assert_eq!(c.reasons, vec!["bundler runtime (webpack/parcel/rollup/browserify) found"]);
    }

    #[test]
    fn test_script_bundle() {
        let c = classify("<script defer SRC='/assets/app.bundle.js'></script>");
        assert_eq!(c.reasons, vec!["script bundle referenced"]);
    }

    #[test]
    fn test_bundle_word_outside_script_src_ignored() {
        assert!(!classify("<p>Buy the holiday bundle today</p>").is_dependent);
    }

    #[test]
    fn test_spa_routing() {
        let c = classify("<script>history.pushState({}, '', '/next')</script>");
        assert_eq!(c.reasons, vec!["client-side SPA routing found"]);
    }

    #[test]
    fn test_empty_mount_point() {
        let c = classify("<body><div id=\"root\"></div></body>");
        assert_eq!(c.reasons, vec!["empty SPA mount point found"]);

        assert!(!classify("<div id=\"root\"><p>server rendered</p></div>").is_dependent);
    }

    #[test]
    fn test_multiple_rules_keep_rule_order() {
        let html = r#"<body><div id="app"></div>
            <noscript>You need to enable JavaScript</noscript>
            <script src="/main.bundle.js"></script></body>"#;
        let c = classify(html);

        assert!(c.is_dependent);
        assert_eq!(
            c.reasons,
            vec![
                "noscript block asks the browser to enable JavaScript",
                "script bundle referenced",
                "empty SPA mount point found",
            ]
        );
    }

    #[test]
    fn test_reasons_json_encoding() {
        let c = classify(r#"<script src="b.bundle.js"></script>"#);
        assert_eq!(c.reasons_json(), r#"["script bundle referenced"]"#);
    }
}
